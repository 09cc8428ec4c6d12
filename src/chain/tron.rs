//! TRON REST Client
//!
//! TRON has no cheap log-range query for arbitrary recipients, so inbound
//! transfers are read per address from TronGrid's TRC-20 history endpoint.
//! Transactions are built by the node (`triggersmartcontract`) and signed
//! locally after checking that the node returned what was asked for.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::abi;
use super::{
    ChainClient, ChainError, ChainResult, ChainTransfer, ScanStrategy, SignedPayload, SignedTransfer,
    TransferScope, TxStatus,
};
use crate::common::config::{NetworkConfig, UpstreamConfig};
use crate::keys::encoding::{account_hash, parse_tron_address, tron_address};
use crate::keys::SigningKey;
use crate::types::Network;

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

#[derive(Debug, Deserialize)]
struct Trc20History {
    #[serde(default)]
    data: Vec<Trc20Transfer>,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    transaction_id: String,
    from: String,
    to: String,
    value: String,
    token_info: Option<Trc20TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct Trc20TokenInfo {
    address: String,
}

/// TronGrid client for TRC-20 deposits
pub struct TronClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    token: String,
    fee_limit: u64,
    history_limit: u32,
}

impl TronClient {
    pub fn new(client: Client, config: &NetworkConfig, upstream: &UpstreamConfig) -> ChainResult<Self> {
        parse_tron_address(&config.token_contract)?;

        Ok(Self {
            client,
            base_url: config.rpc_url.trim_end_matches('/').to_string(),
            api_key: upstream.tron_api_key.clone(),
            token: config.token_contract.clone(),
            fee_limit: upstream.tron_fee_limit,
            history_limit: upstream.tron_history_limit.max(1),
        })
    }

    fn with_key(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key),
            None => req,
        }
    }

    async fn post(&self, path: &str, body: Value) -> ChainResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.with_key(self.client.post(&url)).json(&body).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::Http(format!("{} returned {}", path, resp.status())));
        }

        resp.json()
            .await
            .map_err(|e| ChainError::Parse(format!("{}: {}", path, e)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ChainResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.with_key(self.client.get(&url)).query(query).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::Http(format!("{} returned {}", path, resp.status())));
        }

        resp.json()
            .await
            .map_err(|e| ChainError::Parse(format!("{}: {}", path, e)))
    }

    async fn history(&self, address: &str, limit: u32) -> ChainResult<Vec<ChainTransfer>> {
        let path = format!("/v1/accounts/{}/transactions/trc20", address);
        let query = [
            ("only_to", "true".to_string()),
            ("limit", limit.min(self.history_limit).to_string()),
            ("contract_address", self.token.clone()),
        ];
        let history: Trc20History = self.get(&path, &query).await?;

        let mut transfers = Vec::new();
        for entry in history.data {
            if entry.to != address {
                continue;
            }
            if let Some(info) = &entry.token_info {
                if info.address != self.token {
                    continue;
                }
            }
            let amount = match entry.value.parse::<u128>() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(
                        tx_hash = %entry.transaction_id,
                        value = %entry.value,
                        "Skipping TRC-20 transfer with unparseable value"
                    );
                    continue;
                }
            };

            transfers.push(ChainTransfer {
                tx_hash: entry.transaction_id.to_lowercase(),
                from: entry.from,
                to: entry.to,
                amount,
                block_height: None,
            });
        }

        Ok(transfers)
    }
}

/// Decode a hex-encoded node error message
fn node_message(value: &Value) -> String {
    value
        .get("message")
        .and_then(Value::as_str)
        .map(|m| match hex::decode(m) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => m.to_string(),
        })
        .unwrap_or_else(|| value.to_string())
}

/// Check a node-built transaction before signing
///
/// The id must be the SHA-256 of the raw data, and the contract call must be
/// exactly `token.transfer(expected_args)` from `owner`. Returns the id.
pub fn verify_transaction(tx: &Value, owner: &str, token: &str, expected_args: &[u8]) -> ChainResult<[u8; 32]> {
    let tx_id = tx
        .get("txID")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::Signing("transaction without txID".to_string()))?;
    let raw_hex = tx
        .get("raw_data_hex")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::Signing("transaction without raw_data_hex".to_string()))?;

    let raw = hex::decode(raw_hex).map_err(|e| ChainError::Signing(format!("raw_data_hex: {}", e)))?;
    let digest: [u8; 32] = Sha256::digest(&raw).into();
    if hex::encode(digest) != tx_id.to_lowercase() {
        return Err(ChainError::Signing("txID does not match raw data".to_string()));
    }

    let value = tx
        .pointer("/raw_data/contract/0/parameter/value")
        .ok_or_else(|| ChainError::Signing("transaction without contract call".to_string()))?;
    let field = |name: &str| value.get(name).and_then(Value::as_str).unwrap_or_default();

    let mut expected_data = abi::TRANSFER_SELECTOR.to_vec();
    expected_data.extend_from_slice(expected_args);

    if field("owner_address") != owner
        || field("contract_address") != token
        || field("data").to_lowercase() != hex::encode(expected_data)
    {
        return Err(ChainError::Signing("node-built call does not match request".to_string()));
    }

    // The node must not have attached TRX to the call
    if value.get("call_value").and_then(Value::as_u64).unwrap_or(0) != 0 {
        return Err(ChainError::Signing("unexpected call value".to_string()));
    }

    Ok(digest)
}

#[async_trait]
impl ChainClient for TronClient {
    fn network(&self) -> Network {
        Network::Tron
    }

    fn scan_strategy(&self) -> ScanStrategy {
        ScanStrategy::AddressHistory {
            limit: self.history_limit,
        }
    }

    async fn head(&self) -> ChainResult<u64> {
        let block = self.post("/wallet/getnowblock", json!({})).await?;
        block
            .pointer("/block_header/raw_data/number")
            .and_then(Value::as_u64)
            .ok_or_else(|| ChainError::Parse("getnowblock: missing block number".to_string()))
    }

    async fn query_transfers(&self, scope: &TransferScope) -> ChainResult<Vec<ChainTransfer>> {
        match scope {
            TransferScope::History { address, limit } => self.history(address, *limit).await,
            TransferScope::Range { .. } => Err(ChainError::Unsupported("tron block range".to_string())),
        }
    }

    async fn tx_status(&self, tx_hash: &str) -> ChainResult<TxStatus> {
        let info = self
            .post("/wallet/gettransactioninfobyid", json!({ "value": tx_hash }))
            .await?;

        let Some(block_height) = info.get("blockNumber").and_then(Value::as_u64) else {
            return Ok(TxStatus::NotFound);
        };

        match info.pointer("/receipt/result").and_then(Value::as_str) {
            Some("SUCCESS") | None => Ok(TxStatus::Included { block_height }),
            Some(_) => Ok(TxStatus::Failed { block_height }),
        }
    }

    async fn balance_of(&self, address: &str) -> ChainResult<u128> {
        let owner = parse_tron_address(address)?;
        let resp = self
            .post(
                "/wallet/triggerconstantcontract",
                json!({
                    "owner_address": address,
                    "contract_address": self.token,
                    "function_selector": "balanceOf(address)",
                    "parameter": hex::encode(abi::address_word(&owner)),
                    "visible": true,
                }),
            )
            .await?;

        let word = resp
            .pointer("/constant_result/0")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Rpc(format!("balanceOf: {}", node_message(&resp))))?;
        abi::decode_uint(word)
    }

    async fn native_balance(&self, address: &str) -> ChainResult<u128> {
        let account = self
            .post("/wallet/getaccount", json!({ "address": address, "visible": true }))
            .await?;
        // Accounts with zero TRX omit the field
        Ok(account.get("balance").and_then(Value::as_u64).unwrap_or(0) as u128)
    }

    async fn fee_price(&self) -> ChainResult<u128> {
        let params = self.post("/wallet/getchainparameters", json!({})).await?;
        params
            .get("chainParameter")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find(|p| p.get("key").and_then(Value::as_str) == Some("getEnergyFee"))
            })
            .and_then(|p| p.get("value").and_then(Value::as_u64))
            .map(|v| v as u128)
            .ok_or_else(|| ChainError::Parse("getchainparameters: no getEnergyFee".to_string()))
    }

    fn fee_budget(&self, _fee_price: u128) -> u128 {
        self.fee_limit as u128
    }

    async fn build_and_sign_transfer(
        &self,
        key: &SigningKey,
        from: &str,
        to: &str,
        amount: u128,
        _fee_price: u128,
    ) -> ChainResult<SignedTransfer> {
        if tron_address(&account_hash(&key.public_key())) != from {
            return Err(ChainError::Signing(format!("key does not control {}", from)));
        }
        let to_account = parse_tron_address(to)?;
        let args = abi::transfer_args(&to_account, amount);

        let resp = self
            .post(
                "/wallet/triggersmartcontract",
                json!({
                    "owner_address": from,
                    "contract_address": self.token,
                    "function_selector": "transfer(address,uint256)",
                    "parameter": hex::encode(&args),
                    "fee_limit": self.fee_limit,
                    "call_value": 0,
                    "visible": true,
                }),
            )
            .await?;

        if resp.pointer("/result/result").and_then(Value::as_bool) != Some(true) {
            let detail = resp.get("result").map(node_message).unwrap_or_else(|| resp.to_string());
            return Err(ChainError::Rpc(format!("triggersmartcontract: {}", detail)));
        }

        let mut tx = resp
            .get("transaction")
            .cloned()
            .ok_or_else(|| ChainError::Parse("triggersmartcontract: no transaction".to_string()))?;
        let digest = verify_transaction(&tx, from, &self.token, &args)?;

        let (signature, recovery_id) = key.sign_recoverable(&digest);
        let mut sig = signature.to_vec();
        sig.push(recovery_id + 27);

        if let Some(obj) = tx.as_object_mut() {
            obj.insert("signature".to_string(), json!([hex::encode(sig)]));
        }

        Ok(SignedTransfer {
            tx_hash: hex::encode(digest),
            payload: SignedPayload::Json(tx),
        })
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> ChainResult<String> {
        let SignedPayload::Json(body) = &tx.payload else {
            return Err(ChainError::Broadcast("expected TRON transaction object".to_string()));
        };

        let resp = self.post("/wallet/broadcasttransaction", body.clone()).await?;
        if resp.get("result").and_then(Value::as_bool) != Some(true) {
            return Err(ChainError::Broadcast(node_message(&resp)));
        }

        Ok(resp
            .get("txid")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_else(|| tx.tx_hash.clone()))
    }
}
