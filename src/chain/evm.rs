//! EVM JSON-RPC Client
//!
//! Used for Ethereum and BNB Smart Chain. Inbound transfers are found with
//! `eth_getLogs` on the token's `Transfer` event, filtered by recipient topic.
//! Large scans are split by block range and by recipient batch so that no
//! single call exceeds provider limits.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

use super::abi;
use super::evm_tx::LegacyTransaction;
use super::{
    ChainClient, ChainError, ChainResult, ChainTransfer, ScanStrategy, SignedPayload, SignedTransfer,
    TransferScope, TxStatus,
};
use crate::common::config::{NetworkConfig, UpstreamConfig};
use crate::keys::encoding::{account_hash, evm_checksum_address, parse_evm_address};
use crate::keys::SigningKey;
use crate::types::Network;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Log entry returned by `eth_getLogs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

/// JSON-RPC client for one EVM network
pub struct EvmClient {
    network: Network,
    client: Client,
    rpc_url: String,
    token: [u8; 20],
    token_hex: String,
    chain_id: u64,
    gas_limit: u64,
    max_block_range: u64,
    address_batch: usize,
    request_id: AtomicU64,
}

impl EvmClient {
    pub fn new(client: Client, config: &NetworkConfig, upstream: &UpstreamConfig) -> ChainResult<Self> {
        let token = parse_evm_address(&config.token_contract)?;
        let chain_id = config
            .chain_id
            .ok_or_else(|| ChainError::Unsupported(format!("{} without chain id", config.network)))?;

        Ok(Self {
            network: config.network,
            client,
            rpc_url: config.rpc_url.clone(),
            token,
            token_hex: format!("0x{}", hex::encode(token)),
            chain_id,
            gas_limit: upstream.evm_gas_limit,
            max_block_range: upstream.evm_max_block_range.max(1),
            address_batch: upstream.evm_address_batch.max(1),
            request_id: AtomicU64::new(1),
        })
    }

    async fn rpc_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ChainResult<Option<T>> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self.client.post(&self.rpc_url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(ChainError::Http(format!("{} returned {}", method, resp.status())));
        }

        let parsed: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| ChainError::Parse(format!("{}: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc(format!("{} ({}): {}", method, err.code, err.message)));
        }

        Ok(parsed.result)
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> ChainResult<T> {
        self.rpc_optional(method, params)
            .await?
            .ok_or_else(|| ChainError::Parse(format!("{}: empty result", method)))
    }

    async fn rpc_quantity(&self, method: &str, params: serde_json::Value) -> ChainResult<u128> {
        let value: String = self.rpc(method, params).await?;
        abi::decode_uint(&value)
    }

    async fn get_logs(&self, recipients: &[String], from_block: u64, to_block: u64) -> ChainResult<Vec<RpcLog>> {
        self.rpc(
            "eth_getLogs",
            json!([{
                "fromBlock": quantity(from_block as u128),
                "toBlock": quantity(to_block as u128),
                "address": self.token_hex,
                "topics": [abi::transfer_topic(), null, recipients],
            }]),
        )
        .await
    }

    async fn scan_range(&self, addresses: &[String], from_block: u64, to_block: u64) -> ChainResult<Vec<ChainTransfer>> {
        let mut recipients = Vec::with_capacity(addresses.len());
        for address in addresses {
            let account = parse_evm_address(address)?;
            recipients.push(format!("0x{}", hex::encode(abi::address_word(&account))));
        }

        let mut transfers = Vec::new();
        for batch in recipients.chunks(self.address_batch) {
            let mut start = from_block;
            while start <= to_block {
                let end = to_block.min(start.saturating_add(self.max_block_range - 1));
                let logs = self.get_logs(batch, start, end).await?;

                tracing::debug!(
                    network = %self.network,
                    from_block = start,
                    to_block = end,
                    logs = logs.len(),
                    "eth_getLogs window"
                );

                for log in logs {
                    match decode_transfer_log(&log) {
                        Ok(Some(transfer)) => transfers.push(transfer),
                        Ok(None) => {}
                        Err(e) => tracing::warn!(
                            network = %self.network,
                            tx_hash = %log.transaction_hash,
                            error = %e,
                            "Skipping undecodable Transfer log"
                        ),
                    }
                }

                start = end + 1;
            }
        }

        Ok(transfers)
    }
}

/// Hex quantity as used in JSON-RPC params
fn quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

/// Decode a `Transfer(from, to, value)` log; removed logs yield `None`
pub fn decode_transfer_log(log: &RpcLog) -> ChainResult<Option<ChainTransfer>> {
    if log.removed {
        return Ok(None);
    }
    if log.topics.len() != 3 {
        return Err(ChainError::Parse(format!("expected 3 topics, got {}", log.topics.len())));
    }

    let from = abi::decode_address_word(&log.topics[1])?;
    let to = abi::decode_address_word(&log.topics[2])?;
    let amount = abi::decode_uint(&log.data)?;
    let block_height = match &log.block_number {
        Some(n) => Some(abi::decode_uint(n)? as u64),
        None => None,
    };

    Ok(Some(ChainTransfer {
        tx_hash: log.transaction_hash.to_lowercase(),
        from: evm_checksum_address(&from),
        to: evm_checksum_address(&to),
        amount,
        block_height,
    }))
}

#[async_trait]
impl ChainClient for EvmClient {
    fn network(&self) -> Network {
        self.network
    }

    fn scan_strategy(&self) -> ScanStrategy {
        ScanStrategy::BlockRange
    }

    async fn head(&self) -> ChainResult<u64> {
        Ok(self.rpc_quantity("eth_blockNumber", json!([])).await? as u64)
    }

    async fn query_transfers(&self, scope: &TransferScope) -> ChainResult<Vec<ChainTransfer>> {
        match scope {
            TransferScope::Range {
                addresses,
                from_block,
                to_block,
            } => {
                if addresses.is_empty() || from_block > to_block {
                    return Ok(Vec::new());
                }
                self.scan_range(addresses, *from_block, *to_block).await
            }
            TransferScope::History { .. } => Err(ChainError::Unsupported(format!(
                "{} address history",
                self.network
            ))),
        }
    }

    async fn tx_status(&self, tx_hash: &str) -> ChainResult<TxStatus> {
        let receipt: Option<RpcReceipt> = self
            .rpc_optional("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(TxStatus::NotFound);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(TxStatus::NotFound);
        };
        let block_height = abi::decode_uint(&block_number)? as u64;

        match receipt.status.as_deref() {
            Some("0x0") => Ok(TxStatus::Failed { block_height }),
            _ => Ok(TxStatus::Included { block_height }),
        }
    }

    async fn balance_of(&self, address: &str) -> ChainResult<u128> {
        let owner = parse_evm_address(address)?;
        let data = format!("0x{}", hex::encode(abi::balance_of_call(&owner)));
        self.rpc_quantity("eth_call", json!([{ "to": self.token_hex, "data": data }, "latest"]))
            .await
    }

    async fn native_balance(&self, address: &str) -> ChainResult<u128> {
        self.rpc_quantity("eth_getBalance", json!([address, "latest"])).await
    }

    async fn fee_price(&self) -> ChainResult<u128> {
        self.rpc_quantity("eth_gasPrice", json!([])).await
    }

    fn fee_budget(&self, fee_price: u128) -> u128 {
        fee_price.saturating_mul(self.gas_limit as u128)
    }

    async fn build_and_sign_transfer(
        &self,
        key: &SigningKey,
        from: &str,
        to: &str,
        amount: u128,
        fee_price: u128,
    ) -> ChainResult<SignedTransfer> {
        let from_account = parse_evm_address(from)?;
        if account_hash(&key.public_key()) != from_account {
            return Err(ChainError::Signing(format!("key does not control {}", from)));
        }
        let to_account = parse_evm_address(to)?;

        let nonce = self
            .rpc_quantity("eth_getTransactionCount", json!([from, "pending"]))
            .await? as u64;

        let tx = LegacyTransaction {
            nonce,
            gas_price: fee_price,
            gas_limit: self.gas_limit,
            to: self.token,
            value: 0,
            data: abi::transfer_call(&to_account, amount),
            chain_id: self.chain_id,
        };
        let signed = tx.sign(key);

        Ok(SignedTransfer {
            tx_hash: format!("0x{}", hex::encode(signed.hash)),
            payload: SignedPayload::Raw(signed.raw),
        })
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> ChainResult<String> {
        let SignedPayload::Raw(raw) = &tx.payload else {
            return Err(ChainError::Broadcast("expected raw EVM transaction".to_string()));
        };

        let hash: String = self
            .rpc("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await
            .map_err(|e| match e {
                ChainError::Rpc(msg) => ChainError::Broadcast(msg),
                other => other,
            })?;

        Ok(hash.to_lowercase())
    }
}
