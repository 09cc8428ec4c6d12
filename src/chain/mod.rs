//! Chain Access Module
//!
//! One [`ChainClient`] implementation per chain family, selected once when the
//! service starts. Scanning, confirmation tracking and sweeping only ever talk
//! to the trait.
//!
//! - `evm` - Ethereum / BSC over JSON-RPC
//! - `tron` - TRON over the TronGrid REST API

pub mod abi;
pub mod evm;
pub mod evm_tx;
pub mod tron;

pub use evm::EvmClient;
pub use tron::TronClient;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::common::config::{NetworkConfig, UpstreamConfig};
use crate::keys::SigningKey;
use crate::types::{ChainFamily, Network};

/// Upstream chain errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("not supported by {0}")]
    Unsupported(String),
}

impl ChainError {
    /// Upstream availability problems, as opposed to bad data or rejections
    pub fn is_upstream(&self) -> bool {
        matches!(self, ChainError::Http(_) | ChainError::Timeout(_) | ChainError::Rpc(_))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChainError::Timeout(e.to_string())
        } else {
            ChainError::Http(e.to_string())
        }
    }
}

impl From<crate::keys::KeyError> for ChainError {
    fn from(e: crate::keys::KeyError) -> Self {
        ChainError::InvalidAddress(e.to_string())
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// How a chain can be searched for inbound transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Log query over a block range for many addresses at once
    BlockRange,
    /// Per-address recent history from an indexer, bounded by `limit`
    AddressHistory { limit: u32 },
}

/// Transfer query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferScope {
    Range {
        addresses: Vec<String>,
        from_block: u64,
        to_block: u64,
    },
    History {
        address: String,
        limit: u32,
    },
}

/// Inbound token transfer as reported by the chain
///
/// Addresses use the canonical encoding of the chain family (EIP-55 or
/// base58check), so they compare equal to stored deposit addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransfer {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    /// Token base units
    pub amount: u128,
    /// Unknown when the indexer does not report it
    pub block_height: Option<u64>,
}

/// Inclusion state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Included { block_height: u64 },
    Failed { block_height: u64 },
    NotFound,
}

/// Chain-specific signed transaction body
#[derive(Debug, Clone, PartialEq)]
pub enum SignedPayload {
    /// RLP bytes for `eth_sendRawTransaction`
    Raw(Vec<u8>),
    /// Signed transaction object for `/wallet/broadcasttransaction`
    Json(serde_json::Value),
}

/// A signed transfer awaiting broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransfer {
    pub tx_hash: String,
    pub payload: SignedPayload,
}

/// Capability interface over one network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn network(&self) -> Network;

    fn scan_strategy(&self) -> ScanStrategy;

    /// Current chain head height
    async fn head(&self) -> ChainResult<u64>;

    /// Inbound token transfers matching the scope
    async fn query_transfers(&self, scope: &TransferScope) -> ChainResult<Vec<ChainTransfer>>;

    async fn tx_status(&self, tx_hash: &str) -> ChainResult<TxStatus>;

    /// Token balance in base units
    async fn balance_of(&self, address: &str) -> ChainResult<u128>;

    /// Native coin balance (wei or sun)
    async fn native_balance(&self, address: &str) -> ChainResult<u128>;

    /// Current fee price (wei per gas or sun per energy)
    async fn fee_price(&self) -> ChainResult<u128>;

    /// Native coin a token transfer may consume at `fee_price`
    fn fee_budget(&self, fee_price: u128) -> u128;

    /// Build and sign a token transfer of `amount` base units from `from` to `to`
    async fn build_and_sign_transfer(
        &self,
        key: &SigningKey,
        from: &str,
        to: &str,
        amount: u128,
        fee_price: u128,
    ) -> ChainResult<SignedTransfer>;

    /// Broadcast and return the transaction hash
    async fn broadcast(&self, tx: &SignedTransfer) -> ChainResult<String>;
}

/// Build the client for a configured network
pub fn build_client(config: &NetworkConfig, upstream: &UpstreamConfig) -> ChainResult<Arc<dyn ChainClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(upstream.rpc_timeout_secs))
        .build()
        .map_err(ChainError::from)?;

    let client: Arc<dyn ChainClient> = match config.network.family() {
        ChainFamily::Evm => Arc::new(EvmClient::new(http, config, upstream)?),
        ChainFamily::Tron => Arc::new(TronClient::new(http, config, upstream)?),
    };

    Ok(client)
}
