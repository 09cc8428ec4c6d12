//! Storage Trait Definitions
//!
//! Persistence for wallets, deposit addresses, deposit orders, the wallet
//! balance ledger and per-network scan watermarks.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{DepositAddress, DepositOrder, Network, OrderStatus, Wallet};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl StorageError {
    /// Transient failures worth retrying on the next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Database(_) | StorageError::Connection(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A user's balance in one currency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub currency: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

impl WalletBalance {
    pub fn empty(user_id: &str, currency: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
        }
    }
}

/// Order counts by status and credited total
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Sum of net amounts of completed orders
    pub total_credited: Decimal,
}

/// Deposit pipeline storage interface
///
/// Implementations:
/// - `SqliteDepositStore` - Production storage with SQLite
/// - `MemoryDepositStore` - In-memory storage for testing
#[async_trait]
pub trait DepositStore: Send + Sync {
    // ------------------------------------------------------------------
    // Wallets and addresses
    // ------------------------------------------------------------------

    /// Allocate the next derivation index
    ///
    /// Atomic counter; an index is never returned twice, even if the wallet
    /// it was allocated for is never persisted.
    async fn next_derivation_index(&self) -> StorageResult<u32>;

    /// Get a user's wallet with all its addresses
    async fn get_wallet(&self, user_id: &str) -> StorageResult<Option<Wallet>>;

    /// Persist a wallet and its addresses in one transaction
    ///
    /// Fails with `Duplicate` if the user already has a wallet or any address
    /// is already taken.
    async fn insert_wallet(&self, wallet: &Wallet) -> StorageResult<()>;

    async fn get_addresses_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositAddress>>;

    /// Active deposit addresses on a network
    async fn active_addresses(&self, network: Network) -> StorageResult<Vec<DepositAddress>>;

    async fn find_address(&self, network: Network, address: &str) -> StorageResult<Option<DepositAddress>>;

    /// Deactivate an address; returns false if it was not active
    async fn deactivate_address(&self, network: Network, address: &str) -> StorageResult<bool>;

    /// Add a consolidated amount to the address's swept aggregates
    async fn record_sweep(&self, network: Network, address: &str, amount: Decimal, at: u64) -> StorageResult<()>;

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    async fn order_exists(&self, network: Network, tx_hash: &str) -> StorageResult<bool>;

    /// Insert a new order; `Duplicate` if `(tx_hash, network)` is already recorded
    async fn insert_order(&self, order: &DepositOrder) -> StorageResult<()>;

    async fn get_order(&self, order_no: &str) -> StorageResult<Option<DepositOrder>>;

    /// Orders in a status, oldest first
    async fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<DepositOrder>>;

    /// Persist a new confirmation count for a CONFIRMING order
    ///
    /// Records `confirmed_at` the first time the count is non-zero.
    async fn update_confirmations(&self, order_no: &str, confirmations: u64, at: u64) -> StorageResult<()>;

    /// Guarded status change `from -> to` that never credits
    ///
    /// Returns false if the order was no longer in `from`.
    async fn transition_order(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        error: Option<&str>,
        at: u64,
    ) -> StorageResult<bool>;

    /// Complete a CONFIRMING order and credit its net amount
    ///
    /// In one atomic transaction: set COMPLETED, increment the user's
    /// available balance, update the address aggregates. Returns false if the
    /// order was not CONFIRMING (already completed by another pass). On error
    /// nothing is applied.
    async fn complete_and_credit(
        &self,
        order_no: &str,
        confirmations: u64,
        currency: &str,
        at: u64,
    ) -> StorageResult<bool>;

    // ------------------------------------------------------------------
    // Balances, watermarks, stats
    // ------------------------------------------------------------------

    async fn get_balance(&self, user_id: &str, currency: &str) -> StorageResult<WalletBalance>;

    /// Last fully scanned block height
    async fn get_watermark(&self, network: Network) -> StorageResult<Option<u64>>;

    async fn set_watermark(&self, network: Network, height: u64) -> StorageResult<()>;

    async fn order_stats(&self) -> StorageResult<OrderStats>;
}
