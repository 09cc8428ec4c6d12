//! Shared fixtures for the pipeline integration tests
//!
//! `StubChain` is an in-process chain: tests move its head, add transfers and
//! set balances, and the pipeline sees them through the `ChainClient` trait.

#![allow(dead_code)]

use async_trait::async_trait;
use depositd::chain::{
    ChainClient, ChainError, ChainResult, ChainTransfer, ScanStrategy, SignedPayload, SignedTransfer,
    TransferScope, TxStatus,
};
use depositd::keys::SigningKey;
use depositd::{DepositTrackerService, DepositdConfig, KeyDerivationService, MemoryDepositStore, Network};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub const EVM_HOT_WALLET: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
pub const TRON_HOT_WALLET: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

#[derive(Default)]
struct StubState {
    head: u64,
    transfers: Vec<ChainTransfer>,
    statuses: HashMap<String, TxStatus>,
    balances: HashMap<String, u128>,
    native: u128,
    fee_price: u128,
    broadcasts: Vec<String>,
    fail_head: bool,
    scan_delay: Option<Duration>,
}

pub struct StubChain {
    network: Network,
    state: Mutex<StubState>,
}

impl StubChain {
    pub fn new(network: Network) -> Arc<Self> {
        Arc::new(Self {
            network,
            state: Mutex::new(StubState {
                native: u128::MAX,
                fee_price: 1,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn set_fail_head(&self, fail: bool) {
        self.state().fail_head = fail;
    }

    /// Make every transfer query take this long
    pub fn set_scan_delay(&self, delay: Duration) {
        self.state().scan_delay = Some(delay);
    }

    /// Add a successful inbound transfer mined at `block`
    pub fn transfer(&self, tx_hash: &str, to: &str, amount: u128, block: u64) {
        let mut state = self.state();
        state.transfers.push(ChainTransfer {
            tx_hash: tx_hash.to_string(),
            from: "sender".to_string(),
            to: to.to_string(),
            amount,
            block_height: Some(block),
        });
        state
            .statuses
            .insert(tx_hash.to_string(), TxStatus::Included { block_height: block });
        *state.balances.entry(to.to_string()).or_default() += amount;
    }

    pub fn set_status(&self, tx_hash: &str, status: TxStatus) {
        self.state().statuses.insert(tx_hash.to_string(), status);
    }

    pub fn set_balance(&self, address: &str, amount: u128) {
        self.state().balances.insert(address.to_string(), amount);
    }

    pub fn balance(&self, address: &str) -> u128 {
        self.state().balances.get(address).copied().unwrap_or(0)
    }

    pub fn set_fee_price(&self, fee_price: u128) {
        self.state().fee_price = fee_price;
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state().broadcasts.clone()
    }
}

#[async_trait]
impl ChainClient for StubChain {
    fn network(&self) -> Network {
        self.network
    }

    fn scan_strategy(&self) -> ScanStrategy {
        match self.network {
            Network::Tron => ScanStrategy::AddressHistory { limit: 50 },
            _ => ScanStrategy::BlockRange,
        }
    }

    async fn head(&self) -> ChainResult<u64> {
        let state = self.state();
        if state.fail_head {
            return Err(ChainError::Timeout("head".to_string()));
        }
        Ok(state.head)
    }

    async fn query_transfers(&self, scope: &TransferScope) -> ChainResult<Vec<ChainTransfer>> {
        let delay = self.state().scan_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        Ok(match scope {
            TransferScope::Range {
                addresses,
                from_block,
                to_block,
            } => state
                .transfers
                .iter()
                .filter(|t| addresses.contains(&t.to))
                .filter(|t| t.block_height.is_some_and(|h| h >= *from_block && h <= *to_block))
                .cloned()
                .collect(),
            // Indexers report history without heights
            TransferScope::History { address, .. } => state
                .transfers
                .iter()
                .filter(|t| &t.to == address)
                .map(|t| ChainTransfer {
                    block_height: None,
                    ..t.clone()
                })
                .collect(),
        })
    }

    async fn tx_status(&self, tx_hash: &str) -> ChainResult<TxStatus> {
        Ok(self
            .state()
            .statuses
            .get(tx_hash)
            .copied()
            .unwrap_or(TxStatus::NotFound))
    }

    async fn balance_of(&self, address: &str) -> ChainResult<u128> {
        Ok(self.balance(address))
    }

    async fn native_balance(&self, _address: &str) -> ChainResult<u128> {
        Ok(self.state().native)
    }

    async fn fee_price(&self) -> ChainResult<u128> {
        Ok(self.state().fee_price)
    }

    fn fee_budget(&self, fee_price: u128) -> u128 {
        fee_price * 100_000
    }

    async fn build_and_sign_transfer(
        &self,
        _key: &SigningKey,
        from: &str,
        to: &str,
        amount: u128,
        _fee_price: u128,
    ) -> ChainResult<SignedTransfer> {
        Ok(SignedTransfer {
            tx_hash: format!("sweep-{}", from),
            payload: SignedPayload::Json(json!({ "from": from, "to": to, "amount": amount.to_string() })),
        })
    }

    async fn broadcast(&self, tx: &SignedTransfer) -> ChainResult<String> {
        let SignedPayload::Json(body) = &tx.payload else {
            return Err(ChainError::Broadcast("unexpected payload".to_string()));
        };
        let from = body["from"].as_str().unwrap_or_default().to_string();
        let to = body["to"].as_str().unwrap_or_default().to_string();
        let amount: u128 = body["amount"].as_str().unwrap_or("0").parse().unwrap_or(0);

        let mut state = self.state();
        let moved = state.balances.get(&from).copied().unwrap_or(0).min(amount);
        *state.balances.entry(from).or_default() -= moved;
        *state.balances.entry(to).or_default() += moved;
        state.broadcasts.push(tx.tx_hash.clone());
        Ok(tx.tx_hash.clone())
    }
}

pub fn config_with(extra: &[(&str, &str)]) -> DepositdConfig {
    let mut vars: HashMap<String, String> = [
        ("DEPOSITD_MNEMONIC", MNEMONIC),
        ("DEPOSITD_ETH_RPC", "http://eth.invalid"),
        ("DEPOSITD_BSC_RPC", "http://bsc.invalid"),
        ("DEPOSITD_TRON_RPC", "http://tron.invalid"),
        ("DEPOSITD_ETH_HOT_WALLET", EVM_HOT_WALLET),
        ("DEPOSITD_BSC_HOT_WALLET", EVM_HOT_WALLET),
        ("DEPOSITD_TRON_HOT_WALLET", TRON_HOT_WALLET),
        ("DEPOSITD_SWEEP_COOLDOWN_SECS", "0"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    DepositdConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Service over a memory store and one stub chain per network
pub struct Harness {
    pub service: Arc<DepositTrackerService>,
    pub store: Arc<MemoryDepositStore>,
    pub chains: BTreeMap<Network, Arc<StubChain>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config_with(&[]))
    }

    pub fn with_config(config: DepositdConfig) -> Self {
        let store = Arc::new(MemoryDepositStore::new());
        let keys = Arc::new(KeyDerivationService::from_mnemonic(MNEMONIC, "").unwrap());
        let chains: BTreeMap<Network, Arc<StubChain>> =
            Network::ALL.iter().map(|n| (*n, StubChain::new(*n))).collect();
        let clients: BTreeMap<Network, Arc<dyn ChainClient>> = chains
            .iter()
            .map(|(n, c)| (*n, c.clone() as Arc<dyn ChainClient>))
            .collect();

        let service = DepositTrackerService::new(config, store.clone(), keys, clients).unwrap();
        Self {
            service: Arc::new(service),
            store,
            chains,
        }
    }

    pub fn chain(&self, network: Network) -> &StubChain {
        &self.chains[&network]
    }
}
