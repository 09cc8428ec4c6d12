//! Deposit Ledger and Confirmation Tracking
//!
//! Owns the order state machine:
//!
//! ```text
//! CONFIRMING → COMPLETED   (confirmations >= required, credited atomically)
//!            → FAILED      (transfer transaction reverted)
//!            → EXPIRED     (transaction still unknown after expires_at)
//!            → CANCELLED   (operator action)
//! ```
//!
//! Crediting only ever happens inside `DepositStore::complete_and_credit`,
//! so a failed or repeated confirmation pass cannot credit twice.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{DepositEvent, DepositEventPublisher};
use super::TrackerError;
use crate::chain::{ChainClient, TxStatus};
use crate::common::logging::log_deposit_event;
use crate::storage::{DepositStore, StorageError};
use crate::types::{now_secs, DepositOrder, Network, OrderStatus, TransferEvent};

/// Attempts at drawing an unused order number for one transfer
const ORDER_NO_ATTEMPTS: usize = 3;

pub struct DepositLedger {
    store: Arc<dyn DepositStore>,
    publisher: DepositEventPublisher,
    fee_rate: Decimal,
    expiry_secs: u64,
    currency: String,
}

impl DepositLedger {
    pub fn new(
        store: Arc<dyn DepositStore>,
        publisher: DepositEventPublisher,
        fee_rate: Decimal,
        expiry_secs: u64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            fee_rate,
            expiry_secs,
            currency: currency.into(),
        }
    }

    /// Record scanned transfers as CONFIRMING orders
    ///
    /// Transfers already recorded are ignored. Returns the number of new
    /// orders. Any other storage failure aborts so the caller keeps its
    /// watermark and the window is scanned again.
    pub async fn ingest(&self, events: &[TransferEvent]) -> Result<usize, TrackerError> {
        let mut created = 0;
        for event in events {
            if let Some(order) = self.create_order(event).await? {
                log_deposit_event(
                    "deposit_detected",
                    &order.order_no,
                    order.network.as_str(),
                    order.amount,
                    true,
                    None,
                );
                self.publisher.publish(DepositEvent::order_created(&order));
                created += 1;
            }
        }
        Ok(created)
    }

    async fn create_order(&self, event: &TransferEvent) -> Result<Option<DepositOrder>, TrackerError> {
        for _ in 0..ORDER_NO_ATTEMPTS {
            let order = DepositOrder::from_event(event, self.fee_rate, self.expiry_secs, now_secs());
            match self.store.insert_order(&order).await {
                Ok(()) => return Ok(Some(order)),
                Err(StorageError::Duplicate(_)) => {
                    if self.store.order_exists(event.network, &event.tx_hash).await? {
                        debug!(network = %event.network, tx_hash = %event.tx_hash, "transfer already recorded");
                        return Ok(None);
                    }
                    // Order number collision, draw another
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TrackerError::InvalidState(format!(
            "no free order number for {} tx {}",
            event.network, event.tx_hash
        )))
    }

    /// Advance every CONFIRMING order; returns the number completed
    ///
    /// Networks are processed concurrently. A network whose head cannot be
    /// read is skipped; an order that fails stays CONFIRMING for the next pass.
    pub async fn confirm_pending(
        &self,
        clients: &BTreeMap<Network, Arc<dyn ChainClient>>,
    ) -> Result<usize, TrackerError> {
        let mut by_network: BTreeMap<Network, Vec<DepositOrder>> = BTreeMap::new();
        for order in self.store.orders_by_status(OrderStatus::Confirming).await? {
            by_network.entry(order.network).or_default().push(order);
        }

        let passes = by_network.into_iter().filter_map(|(network, orders)| match clients.get(&network) {
            Some(client) => Some(self.confirm_network(client.clone(), orders)),
            None => {
                warn!(%network, pending = orders.len(), "no client configured, orders left pending");
                None
            }
        });

        Ok(join_all(passes).await.into_iter().sum())
    }

    /// Advance the CONFIRMING orders of the client's network only
    pub async fn confirm_network_pending(&self, client: Arc<dyn ChainClient>) -> Result<usize, TrackerError> {
        let network = client.network();
        let orders: Vec<DepositOrder> = self
            .store
            .orders_by_status(OrderStatus::Confirming)
            .await?
            .into_iter()
            .filter(|order| order.network == network)
            .collect();

        if orders.is_empty() {
            return Ok(0);
        }
        Ok(self.confirm_network(client, orders).await)
    }

    async fn confirm_network(&self, client: Arc<dyn ChainClient>, orders: Vec<DepositOrder>) -> usize {
        let network = client.network();
        let head = match client.head().await {
            Ok(head) => head,
            Err(e) => {
                warn!(%network, "skipping confirmation pass, head unavailable: {}", e);
                return 0;
            }
        };

        let mut completed = 0;
        for order in &orders {
            match self.confirm_order(client.as_ref(), head, order).await {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    %network,
                    order_no = %order.order_no,
                    tx_hash = %order.tx_hash,
                    "confirmation check failed: {}", e
                ),
            }
        }
        completed
    }

    /// Returns true if this call completed and credited the order
    async fn confirm_order(
        &self,
        client: &dyn ChainClient,
        head: u64,
        order: &DepositOrder,
    ) -> Result<bool, TrackerError> {
        let now = now_secs();

        match client.tx_status(&order.tx_hash).await? {
            TxStatus::NotFound => {
                if order.is_expired(now) {
                    self.expire(order, now).await?;
                }
                Ok(false)
            }
            TxStatus::Failed { .. } => {
                self.fail(order, "transaction reverted", now).await?;
                Ok(false)
            }
            TxStatus::Included { block_height } => {
                let confirmations = head.saturating_sub(block_height);

                if order.is_confirmed_enough(confirmations) {
                    return self.complete(order, confirmations, now).await;
                }

                if confirmations != order.confirmations {
                    self.store
                        .update_confirmations(&order.order_no, confirmations, now)
                        .await?;
                    self.publisher.publish(DepositEvent::OrderConfirming {
                        order_no: order.order_no.clone(),
                        confirmations,
                        required: order.required_confirmations(),
                    });
                }
                Ok(false)
            }
        }
    }

    async fn complete(&self, order: &DepositOrder, confirmations: u64, now: u64) -> Result<bool, TrackerError> {
        let credited = match self
            .store
            .complete_and_credit(&order.order_no, confirmations, &self.currency, now)
            .await
        {
            Ok(credited) => credited,
            Err(e) => {
                log_deposit_event(
                    "deposit_credit_failed",
                    &order.order_no,
                    order.network.as_str(),
                    order.net_amount,
                    false,
                    Some(&e.to_string()),
                );
                return Err(e.into());
            }
        };

        if !credited {
            debug!(order_no = %order.order_no, "order already completed by another pass");
            return Ok(false);
        }

        log_deposit_event(
            "deposit_credited",
            &order.order_no,
            order.network.as_str(),
            order.net_amount,
            true,
            None,
        );
        self.publisher.publish(DepositEvent::order_completed(order));
        Ok(true)
    }

    async fn fail(&self, order: &DepositOrder, reason: &str, now: u64) -> Result<(), TrackerError> {
        if self
            .store
            .transition_order(&order.order_no, OrderStatus::Confirming, OrderStatus::Failed, Some(reason), now)
            .await?
        {
            log_deposit_event(
                "deposit_failed",
                &order.order_no,
                order.network.as_str(),
                order.amount,
                false,
                Some(reason),
            );
            self.publisher.publish(DepositEvent::OrderFailed {
                order_no: order.order_no.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn expire(&self, order: &DepositOrder, now: u64) -> Result<(), TrackerError> {
        if self
            .store
            .transition_order(
                &order.order_no,
                OrderStatus::Confirming,
                OrderStatus::Expired,
                Some("transaction not found before expiry"),
                now,
            )
            .await?
        {
            info!(order_no = %order.order_no, tx_hash = %order.tx_hash, "deposit order expired");
            self.publisher.publish(DepositEvent::OrderExpired {
                order_no: order.order_no.clone(),
            });
        }
        Ok(())
    }

    /// Operator cancellation of a CONFIRMING order
    pub async fn cancel_order(&self, order_no: &str, reason: &str) -> Result<DepositOrder, TrackerError> {
        let order = self
            .store
            .get_order(order_no)
            .await?
            .ok_or_else(|| TrackerError::OrderNotFound(order_no.to_string()))?;

        let cancelled = self
            .store
            .transition_order(order_no, OrderStatus::Confirming, OrderStatus::Cancelled, Some(reason), now_secs())
            .await?;
        if !cancelled {
            return Err(TrackerError::InvalidState(format!(
                "order {} is {}",
                order_no, order.status
            )));
        }

        info!(order_no, reason, "deposit order cancelled");
        self.publisher.publish(DepositEvent::OrderCancelled {
            order_no: order_no.to_string(),
            reason: reason.to_string(),
        });

        self.store
            .get_order(order_no)
            .await?
            .ok_or_else(|| TrackerError::OrderNotFound(order_no.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, MockChainClient};
    use crate::storage::MemoryDepositStore;
    use crate::types::{DepositAddress, DerivedAddress, Wallet};
    use std::str::FromStr;

    async fn seeded_store() -> Arc<MemoryDepositStore> {
        let store = Arc::new(MemoryDepositStore::new());
        let derived = DerivedAddress {
            address: "TDeposit".to_string(),
            network: Network::Tron,
            derivation_path: "m/44'/195'/0'/0/7".to_string(),
        };
        let wallet = Wallet {
            user_id: "user-7".to_string(),
            derivation_index: 7,
            created_at: 0,
            addresses: vec![DepositAddress::new("user-7", &derived, 7, 0)],
        };
        store.insert_wallet(&wallet).await.unwrap();
        store
    }

    fn event(tx_hash: &str) -> TransferEvent {
        TransferEvent {
            user_id: "user-7".to_string(),
            address: "TDeposit".to_string(),
            network: Network::Tron,
            tx_hash: tx_hash.to_string(),
            from_address: "TSender".to_string(),
            amount: Decimal::from_str("120.5").unwrap(),
            block_height: 1_000,
        }
    }

    fn ledger(store: Arc<MemoryDepositStore>) -> DepositLedger {
        DepositLedger::new(store, DepositEventPublisher::default(), Decimal::ZERO, 3_600, "USDT")
    }

    fn tron_client(head: u64, status: TxStatus) -> BTreeMap<Network, Arc<dyn ChainClient>> {
        let mut client = MockChainClient::new();
        client.expect_network().return_const(Network::Tron);
        client.expect_head().returning(move || Ok(head));
        client.expect_tx_status().returning(move |_| Ok(status));
        let client: Arc<dyn ChainClient> = Arc::new(client);
        BTreeMap::from([(Network::Tron, client)])
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());

        assert_eq!(ledger.ingest(&[event("abc123"), event("abc123")]).await.unwrap(), 1);
        assert_eq!(ledger.ingest(&[event("abc123")]).await.unwrap(), 0);
        assert_eq!(store.orders_by_status(OrderStatus::Confirming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_stays_confirming() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let clients = tron_client(1_019, TxStatus::Included { block_height: 1_000 });
        assert_eq!(ledger.confirm_pending(&clients).await.unwrap(), 0);

        let orders = store.orders_by_status(OrderStatus::Confirming).await.unwrap();
        assert_eq!(orders[0].confirmations, 19);
        assert!(orders[0].confirmed_at.is_some());
        assert_eq!(store.get_balance("user-7", "USDT").await.unwrap().available, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_threshold_completes_and_credits() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        let mut rx = ledger.publisher.subscribe();
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let clients = tron_client(1_020, TxStatus::Included { block_height: 1_000 });
        assert_eq!(ledger.confirm_pending(&clients).await.unwrap(), 1);

        let balance = store.get_balance("user-7", "USDT").await.unwrap();
        assert_eq!(balance.available, Decimal::from_str("120.5").unwrap());
        let address = store.find_address(Network::Tron, "TDeposit").await.unwrap().unwrap();
        assert_eq!(address.total_received, Decimal::from_str("120.5").unwrap());
        assert_eq!(address.total_transactions, 1);

        assert!(matches!(rx.recv().await.unwrap(), DepositEvent::OrderCreated { .. }));
        assert!(matches!(rx.recv().await.unwrap(), DepositEvent::OrderCompleted { .. }));

        // A second pass finds nothing left to credit
        assert_eq!(ledger.confirm_pending(&clients).await.unwrap(), 0);
        assert_eq!(
            store.get_balance("user-7", "USDT").await.unwrap().available,
            Decimal::from_str("120.5").unwrap()
        );
    }

    #[tokio::test]
    async fn test_reverted_transfer_fails_order() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let clients = tron_client(1_020, TxStatus::Failed { block_height: 1_000 });
        ledger.confirm_pending(&clients).await.unwrap();

        let failed = store.orders_by_status(OrderStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("transaction reverted"));
    }

    #[tokio::test]
    async fn test_unknown_transaction_expires() {
        let store = seeded_store().await;
        let ledger = DepositLedger::new(store.clone(), DepositEventPublisher::default(), Decimal::ZERO, 0, "USDT");
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let clients = tron_client(1_020, TxStatus::NotFound);
        ledger.confirm_pending(&clients).await.unwrap();

        assert_eq!(store.orders_by_status(OrderStatus::Expired).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_head_failure_leaves_orders_pending() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let mut client = MockChainClient::new();
        client.expect_network().return_const(Network::Tron);
        client
            .expect_head()
            .returning(|| Err(ChainError::Timeout("getnowblock".to_string())));
        client.expect_tx_status().never();
        let client: Arc<dyn ChainClient> = Arc::new(client);
        let clients = BTreeMap::from([(Network::Tron, client)]);

        assert_eq!(ledger.confirm_pending(&clients).await.unwrap(), 0);
        assert_eq!(store.orders_by_status(OrderStatus::Confirming).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_pass_ignores_other_networks() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        ledger.ingest(&[event("abc123")]).await.unwrap();

        let mut eth = MockChainClient::new();
        eth.expect_network().return_const(Network::Eth);
        eth.expect_head().never();
        eth.expect_tx_status().never();
        assert_eq!(ledger.confirm_network_pending(Arc::new(eth)).await.unwrap(), 0);

        let tron = tron_client(1_020, TxStatus::Included { block_height: 1_000 })
            .remove(&Network::Tron)
            .unwrap();
        assert_eq!(ledger.confirm_network_pending(tron).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let store = seeded_store().await;
        let ledger = ledger(store.clone());
        ledger.ingest(&[event("abc123")]).await.unwrap();
        let order_no = store.orders_by_status(OrderStatus::Confirming).await.unwrap()[0]
            .order_no
            .clone();

        let cancelled = ledger.cancel_order(&order_no, "sanctioned sender").await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(matches!(
            ledger.cancel_order(&order_no, "again").await,
            Err(TrackerError::InvalidState(_))
        ));
        assert!(matches!(
            ledger.cancel_order("DEP-missing", "x").await,
            Err(TrackerError::OrderNotFound(_))
        ));
    }
}
