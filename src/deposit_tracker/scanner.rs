//! Chain Scanner
//!
//! One scanner per network. The scan cursor is not held here: the caller
//! passes in the persisted watermark and persists the returned one only after
//! the events have been recorded, so a failed cycle is simply re-scanned.
//!
//! # Strategies:
//! - Block range (EVM): transfer logs in `(watermark, head]` for all active
//!   addresses, then advance to head whether or not anything matched
//! - Address history (TRON): bounded recent history per active address; one
//!   failing address does not hide the others

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::TrackerError;
use crate::chain::{ChainClient, ChainTransfer, ScanStrategy, TransferScope, TxStatus};
use crate::common::config::NetworkConfig;
use crate::common::logging::log_scan_event;
use crate::storage::DepositStore;
use crate::types::{base_units_to_decimal, DepositAddress, Network, TransferEvent};

/// Result of one scan cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    /// Qualifying, not yet recorded transfers
    pub events: Vec<TransferEvent>,
    /// Watermark to persist once `events` are recorded
    pub next_watermark: Option<u64>,
}

pub struct ChainScanner {
    network: Network,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn DepositStore>,
    decimals: u32,
    min_deposit: Decimal,
}

impl ChainScanner {
    pub fn new(
        network: Network,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn DepositStore>,
        decimals: u32,
        min_deposit: Decimal,
    ) -> Self {
        Self {
            network,
            client,
            store,
            decimals,
            min_deposit,
        }
    }

    pub fn from_config(config: &NetworkConfig, client: Arc<dyn ChainClient>, store: Arc<dyn DepositStore>) -> Self {
        Self::new(config.network, client, store, config.token_decimals, config.min_deposit)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Run one scan cycle starting after `watermark`
    pub async fn scan(&self, watermark: Option<u64>) -> Result<ScanOutcome, TrackerError> {
        match self.client.scan_strategy() {
            ScanStrategy::BlockRange => self.scan_block_range(watermark).await,
            ScanStrategy::AddressHistory { limit } => {
                let events = self.scan_history(limit).await?;
                Ok(ScanOutcome {
                    events,
                    next_watermark: watermark,
                })
            }
        }
    }

    async fn scan_block_range(&self, watermark: Option<u64>) -> Result<ScanOutcome, TrackerError> {
        let head = self.client.head().await?;

        let last = match watermark {
            Some(last) => last,
            None => {
                info!(network = %self.network, head, "no watermark, starting scan at chain head");
                return Ok(ScanOutcome {
                    events: Vec::new(),
                    next_watermark: Some(head),
                });
            }
        };

        if head <= last {
            return Ok(ScanOutcome {
                events: Vec::new(),
                next_watermark: Some(last),
            });
        }

        let addresses = self.store.active_addresses(self.network).await?;
        if addresses.is_empty() {
            return Ok(ScanOutcome {
                events: Vec::new(),
                next_watermark: Some(head),
            });
        }

        let started = Instant::now();
        let from_block = last + 1;
        let scope = TransferScope::Range {
            addresses: addresses.iter().map(|a| a.address.clone()).collect(),
            from_block,
            to_block: head,
        };
        let transfers = self.client.query_transfers(&scope).await?;
        let events = self.qualify(transfers, &index_by_address(&addresses)).await?;

        log_scan_event(
            self.network.as_str(),
            from_block,
            head,
            events.len(),
            started.elapsed().as_millis() as u64,
        );

        Ok(ScanOutcome {
            events,
            next_watermark: Some(head),
        })
    }

    async fn scan_history(&self, limit: u32) -> Result<Vec<TransferEvent>, TrackerError> {
        let addresses = self.store.active_addresses(self.network).await?;
        let by_address = index_by_address(&addresses);

        let started = Instant::now();
        let mut events = Vec::new();
        let mut failures = 0usize;
        let mut last_error = None;

        for address in &addresses {
            let scope = TransferScope::History {
                address: address.address.clone(),
                limit,
            };
            match self.client.query_transfers(&scope).await {
                Ok(transfers) => {
                    let mut found = self.qualify(transfers, &by_address).await?;
                    events.append(&mut found);
                }
                Err(e) => {
                    warn!(network = %self.network, address = %address.address, "history query failed: {}", e);
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures > 0 && failures == addresses.len() {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        // The same transfer can show up in two addresses' histories
        let mut seen = HashSet::new();
        events.retain(|e| seen.insert(e.tx_hash.clone()));

        info!(
            network = %self.network,
            addresses = addresses.len(),
            failures,
            found = events.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "history scan completed"
        );

        Ok(events)
    }

    /// Keep transfers to our addresses that are above dust and not yet recorded
    async fn qualify(
        &self,
        transfers: Vec<ChainTransfer>,
        by_address: &HashMap<&str, &DepositAddress>,
    ) -> Result<Vec<TransferEvent>, TrackerError> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for transfer in transfers {
            let Some(deposit_address) = by_address.get(transfer.to.as_str()) else {
                continue;
            };

            let amount = match base_units_to_decimal(transfer.amount, self.decimals) {
                Some(amount) => amount,
                None => {
                    warn!(network = %self.network, tx_hash = %transfer.tx_hash, "amount out of range: {}", transfer.amount);
                    continue;
                }
            };
            if amount.is_zero() || amount < self.min_deposit {
                debug!(network = %self.network, tx_hash = %transfer.tx_hash, %amount, "below minimum deposit");
                continue;
            }

            if !seen.insert(transfer.tx_hash.clone()) {
                continue;
            }
            if self.store.order_exists(self.network, &transfer.tx_hash).await? {
                continue;
            }

            let block_height = match transfer.block_height {
                Some(height) => height,
                None => match self.client.tx_status(&transfer.tx_hash).await {
                    Ok(TxStatus::Included { block_height }) => block_height,
                    Ok(TxStatus::Failed { .. }) => {
                        debug!(network = %self.network, tx_hash = %transfer.tx_hash, "skipping reverted transfer");
                        continue;
                    }
                    // Confirmation tracking re-reads the height later
                    Ok(TxStatus::NotFound) | Err(_) => 0,
                },
            };

            events.push(TransferEvent {
                user_id: deposit_address.user_id.clone(),
                address: deposit_address.address.clone(),
                network: self.network,
                tx_hash: transfer.tx_hash,
                from_address: transfer.from,
                amount,
                block_height,
            });
        }

        Ok(events)
    }
}

fn index_by_address(addresses: &[DepositAddress]) -> HashMap<&str, &DepositAddress> {
    addresses.iter().map(|a| (a.address.as_str(), a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, MockChainClient};
    use crate::storage::MemoryDepositStore;
    use crate::types::{DepositOrder, DerivedAddress, Wallet};
    use std::str::FromStr;

    async fn store_with(network: Network, addresses: &[&str]) -> Arc<MemoryDepositStore> {
        let store = Arc::new(MemoryDepositStore::new());
        for (i, address) in addresses.iter().enumerate() {
            let derived = DerivedAddress {
                address: address.to_string(),
                network,
                derivation_path: network.family().derivation_path(i as u32),
            };
            let wallet = Wallet {
                user_id: format!("user-{}", i),
                derivation_index: i as u32,
                created_at: 0,
                addresses: vec![DepositAddress::new(&format!("user-{}", i), &derived, i as u32, 0)],
            };
            store.insert_wallet(&wallet).await.unwrap();
        }
        store
    }

    fn transfer(tx_hash: &str, to: &str, amount: u128, block_height: Option<u64>) -> ChainTransfer {
        ChainTransfer {
            tx_hash: tx_hash.to_string(),
            from: "sender".to_string(),
            to: to.to_string(),
            amount,
            block_height,
        }
    }

    fn evm_mock(head: u64, transfers: Vec<ChainTransfer>) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_scan_strategy().return_const(ScanStrategy::BlockRange);
        client.expect_head().returning(move || Ok(head));
        client
            .expect_query_transfers()
            .returning(move |_| Ok(transfers.clone()));
        client
    }

    #[tokio::test]
    async fn test_bootstrap_starts_at_head() {
        let store = store_with(Network::Eth, &["0xA"]).await;
        let mut client = MockChainClient::new();
        client.expect_scan_strategy().return_const(ScanStrategy::BlockRange);
        client.expect_head().returning(|| Ok(5_000));
        client.expect_query_transfers().never();

        let scanner = ChainScanner::new(Network::Eth, Arc::new(client), store, 6, Decimal::ZERO);
        let outcome = scanner.scan(None).await.unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.next_watermark, Some(5_000));
    }

    #[tokio::test]
    async fn test_block_range_filters_and_advances() {
        let store = store_with(Network::Eth, &["0xA"]).await;
        let client = evm_mock(
            1_000,
            vec![
                transfer("0x01", "0xA", 120_500_000, Some(995)),
                transfer("0x01", "0xA", 120_500_000, Some(995)),
                transfer("0x02", "0xB", 5_000_000, Some(996)),
                transfer("0x03", "0xA", 0, Some(997)),
            ],
        );

        let scanner = ChainScanner::new(Network::Eth, Arc::new(client), store, 6, Decimal::ZERO);
        let outcome = scanner.scan(Some(990)).await.unwrap();

        assert_eq!(outcome.next_watermark, Some(1_000));
        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.user_id, "user-0");
        assert_eq!(event.amount, Decimal::from_str("120.5").unwrap());
        assert_eq!(event.block_height, 995);
    }

    #[tokio::test]
    async fn test_block_range_advances_without_matches() {
        let store = store_with(Network::Bsc, &["0xA"]).await;
        let client = evm_mock(1_200, Vec::new());

        let scanner = ChainScanner::new(Network::Bsc, Arc::new(client), store, 18, Decimal::ZERO);
        let outcome = scanner.scan(Some(1_000)).await.unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.next_watermark, Some(1_200));
    }

    #[tokio::test]
    async fn test_head_not_advanced() {
        let store = store_with(Network::Eth, &["0xA"]).await;
        let mut client = MockChainClient::new();
        client.expect_scan_strategy().return_const(ScanStrategy::BlockRange);
        client.expect_head().returning(|| Ok(1_000));
        client.expect_query_transfers().never();

        let scanner = ChainScanner::new(Network::Eth, Arc::new(client), store, 6, Decimal::ZERO);
        let outcome = scanner.scan(Some(1_000)).await.unwrap();

        assert_eq!(outcome.next_watermark, Some(1_000));
    }

    #[tokio::test]
    async fn test_query_failure_is_error() {
        let store = store_with(Network::Eth, &["0xA"]).await;
        let mut client = MockChainClient::new();
        client.expect_scan_strategy().return_const(ScanStrategy::BlockRange);
        client.expect_head().returning(|| Ok(1_000));
        client
            .expect_query_transfers()
            .returning(|_| Err(ChainError::Timeout("eth_getLogs".to_string())));

        let scanner = ChainScanner::new(Network::Eth, Arc::new(client), store, 6, Decimal::ZERO);
        assert!(matches!(
            scanner.scan(Some(900)).await,
            Err(TrackerError::Chain(ChainError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_recorded_and_dust_transfers_skipped() {
        let store = store_with(Network::Eth, &["0xA"]).await;
        let recorded = TransferEvent {
            user_id: "user-0".to_string(),
            address: "0xA".to_string(),
            network: Network::Eth,
            tx_hash: "0x01".to_string(),
            from_address: "sender".to_string(),
            amount: Decimal::from(10),
            block_height: 950,
        };
        store
            .insert_order(&DepositOrder::from_event(&recorded, Decimal::ZERO, 60, 0))
            .await
            .unwrap();

        let client = evm_mock(
            1_000,
            vec![
                transfer("0x01", "0xA", 10_000_000, Some(950)),
                transfer("0x02", "0xA", 500_000, Some(960)),
                transfer("0x03", "0xA", 2_000_000, Some(970)),
            ],
        );

        let scanner = ChainScanner::new(Network::Eth, Arc::new(client), store, 6, Decimal::ONE);
        let outcome = scanner.scan(Some(900)).await.unwrap();

        let hashes: Vec<_> = outcome.events.iter().map(|e| e.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x03"]);
    }

    #[tokio::test]
    async fn test_history_isolates_failing_address() {
        let store = store_with(Network::Tron, &["TA", "TB"]).await;
        let mut client = MockChainClient::new();
        client
            .expect_scan_strategy()
            .return_const(ScanStrategy::AddressHistory { limit: 50 });
        client.expect_query_transfers().returning(|scope| match scope {
            TransferScope::History { address, .. } if address == "TA" => {
                Err(ChainError::Http("429 Too Many Requests".to_string()))
            }
            _ => Ok(vec![transfer("abc123", "TB", 120_500_000, None)]),
        });
        client
            .expect_tx_status()
            .returning(|_| Ok(TxStatus::Included { block_height: 1_000 }));

        let scanner = ChainScanner::new(Network::Tron, Arc::new(client), store, 6, Decimal::ZERO);
        let outcome = scanner.scan(None).await.unwrap();

        assert_eq!(outcome.next_watermark, None);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].user_id, "user-1");
        assert_eq!(outcome.events[0].block_height, 1_000);
    }

    #[tokio::test]
    async fn test_history_all_failing_is_error() {
        let store = store_with(Network::Tron, &["TA", "TB"]).await;
        let mut client = MockChainClient::new();
        client
            .expect_scan_strategy()
            .return_const(ScanStrategy::AddressHistory { limit: 50 });
        client
            .expect_query_transfers()
            .returning(|_| Err(ChainError::Timeout("trc20".to_string())));

        let scanner = ChainScanner::new(Network::Tron, Arc::new(client), store, 6, Decimal::ZERO);
        assert!(scanner.scan(None).await.is_err());
    }
}
