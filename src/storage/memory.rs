//! In-Memory Storage Implementation
//!
//! Data is lost when the service restarts. Used by tests and dry runs.
//! All tables sit behind one mutex, so every operation is atomic.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::traits::{DepositStore, OrderStats, StorageError, StorageResult, WalletBalance};
use crate::types::{DepositAddress, DepositOrder, Network, OrderStatus, Wallet};

#[derive(Default)]
struct Tables {
    next_index: u32,
    /// user_id -> (derivation_index, created_at)
    wallets: HashMap<String, (u32, u64)>,
    addresses: Vec<DepositAddress>,
    orders: Vec<DepositOrder>,
    balances: HashMap<(String, String), WalletBalance>,
    watermarks: HashMap<Network, u64>,
}

impl Tables {
    fn address_mut(&mut self, network: Network, address: &str) -> Option<&mut DepositAddress> {
        self.addresses
            .iter_mut()
            .find(|a| a.network == network && a.address == address)
    }

    fn order_mut(&mut self, order_no: &str) -> Option<&mut DepositOrder> {
        self.orders.iter_mut().find(|o| o.order_no == order_no)
    }
}

/// In-memory deposit store
pub struct MemoryDepositStore {
    tables: Mutex<Tables>,
}

impl MemoryDepositStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for MemoryDepositStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DepositStore for MemoryDepositStore {
    async fn next_derivation_index(&self) -> StorageResult<u32> {
        let mut tables = self.tables.lock().await;
        let index = tables.next_index;
        tables.next_index = index
            .checked_add(1)
            .ok_or_else(|| StorageError::InvalidData("derivation index exhausted".to_string()))?;
        Ok(index)
    }

    async fn get_wallet(&self, user_id: &str) -> StorageResult<Option<Wallet>> {
        let tables = self.tables.lock().await;

        Ok(tables.wallets.get(user_id).map(|(index, created_at)| Wallet {
            user_id: user_id.to_string(),
            derivation_index: *index,
            created_at: *created_at,
            addresses: tables
                .addresses
                .iter()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect(),
        }))
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;

        if tables.wallets.contains_key(&wallet.user_id) {
            return Err(StorageError::Duplicate(format!("wallet for {}", wallet.user_id)));
        }
        if tables.wallets.values().any(|(index, _)| *index == wallet.derivation_index) {
            return Err(StorageError::Duplicate(format!(
                "derivation index {}",
                wallet.derivation_index
            )));
        }
        for addr in &wallet.addresses {
            if tables
                .addresses
                .iter()
                .any(|a| a.network == addr.network && a.address == addr.address)
            {
                return Err(StorageError::Duplicate(format!(
                    "{} address {}",
                    addr.network, addr.address
                )));
            }
        }

        tables
            .wallets
            .insert(wallet.user_id.clone(), (wallet.derivation_index, wallet.created_at));
        tables.addresses.extend(wallet.addresses.iter().cloned());

        Ok(())
    }

    async fn get_addresses_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositAddress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .addresses
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn active_addresses(&self, network: Network) -> StorageResult<Vec<DepositAddress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .addresses
            .iter()
            .filter(|a| a.network == network && a.is_active)
            .cloned()
            .collect())
    }

    async fn find_address(&self, network: Network, address: &str) -> StorageResult<Option<DepositAddress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .addresses
            .iter()
            .find(|a| a.network == network && a.address == address)
            .cloned())
    }

    async fn deactivate_address(&self, network: Network, address: &str) -> StorageResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.address_mut(network, address) {
            Some(addr) if addr.is_active => {
                addr.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_sweep(&self, network: Network, address: &str, amount: Decimal, at: u64) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        let addr = tables
            .address_mut(network, address)
            .ok_or_else(|| StorageError::NotFound(format!("{} address {}", network, address)))?;

        addr.total_swept += amount;
        addr.last_swept_at = Some(at);
        Ok(())
    }

    async fn order_exists(&self, network: Network, tx_hash: &str) -> StorageResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .iter()
            .any(|o| o.network == network && o.tx_hash == tx_hash))
    }

    async fn insert_order(&self, order: &DepositOrder) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;

        if tables
            .orders
            .iter()
            .any(|o| (o.network == order.network && o.tx_hash == order.tx_hash) || o.order_no == order.order_no)
        {
            return Err(StorageError::Duplicate(format!("{} tx {}", order.network, order.tx_hash)));
        }

        tables.orders.push(order.clone());
        Ok(())
    }

    async fn get_order(&self, order_no: &str) -> StorageResult<Option<DepositOrder>> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.iter().find(|o| o.order_no == order_no).cloned())
    }

    async fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<DepositOrder>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<_> = tables
            .orders
            .iter()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by(|a, b| (a.created_at, &a.order_no).cmp(&(b.created_at, &b.order_no)));
        Ok(orders)
    }

    async fn update_confirmations(&self, order_no: &str, confirmations: u64, at: u64) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        let order = tables
            .order_mut(order_no)
            .filter(|o| o.status == OrderStatus::Confirming)
            .ok_or_else(|| StorageError::NotFound(order_no.to_string()))?;

        order.confirmations = confirmations;
        order.updated_at = at;
        if order.confirmed_at.is_none() && confirmations > 0 {
            order.confirmed_at = Some(at);
        }
        Ok(())
    }

    async fn transition_order(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        error: Option<&str>,
        at: u64,
    ) -> StorageResult<bool> {
        if !from.can_transition_to(to) || to == OrderStatus::Completed {
            return Err(StorageError::InvalidData(format!(
                "transition {} -> {} not allowed",
                from, to
            )));
        }

        let mut tables = self.tables.lock().await;
        match tables.order_mut(order_no) {
            Some(order) if order.status == from => {
                order.status = to;
                order.error = error.map(str::to_string);
                order.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_and_credit(
        &self,
        order_no: &str,
        confirmations: u64,
        currency: &str,
        at: u64,
    ) -> StorageResult<bool> {
        let mut tables = self.tables.lock().await;

        let (user_id, network, to_address, amount, net_amount) = match tables.order_mut(order_no) {
            Some(order) if order.status == OrderStatus::Confirming => (
                order.user_id.clone(),
                order.network,
                order.to_address.clone(),
                order.amount,
                order.net_amount,
            ),
            _ => return Ok(false),
        };

        // Validate everything before mutating anything
        if tables.address_mut(network, &to_address).is_none() {
            return Err(StorageError::NotFound(format!("{} address {}", network, to_address)));
        }

        if let Some(order) = tables.order_mut(order_no) {
            order.status = OrderStatus::Completed;
            order.confirmations = confirmations;
            order.completed_at = Some(at);
            order.updated_at = at;
            order.confirmed_at.get_or_insert(at);
        }

        tables
            .balances
            .entry((user_id.clone(), currency.to_string()))
            .or_insert_with(|| WalletBalance::empty(&user_id, currency))
            .available += net_amount;

        if let Some(addr) = tables.address_mut(network, &to_address) {
            addr.total_received += amount;
            addr.total_transactions += 1;
            addr.last_received_at = Some(at);
        }

        Ok(true)
    }

    async fn get_balance(&self, user_id: &str, currency: &str) -> StorageResult<WalletBalance> {
        let tables = self.tables.lock().await;
        Ok(tables
            .balances
            .get(&(user_id.to_string(), currency.to_string()))
            .cloned()
            .unwrap_or_else(|| WalletBalance::empty(user_id, currency)))
    }

    async fn get_watermark(&self, network: Network) -> StorageResult<Option<u64>> {
        let tables = self.tables.lock().await;
        Ok(tables.watermarks.get(&network).copied())
    }

    async fn set_watermark(&self, network: Network, height: u64) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;
        tables.watermarks.insert(network, height);
        Ok(())
    }

    async fn order_stats(&self) -> StorageResult<OrderStats> {
        let tables = self.tables.lock().await;

        let mut stats = OrderStats::default();
        for order in &tables.orders {
            stats.total += 1;
            *stats.by_status.entry(order.status.as_str().to_string()).or_default() += 1;
            if order.status == OrderStatus::Completed {
                stats.total_credited += order.net_amount;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DerivedAddress, TransferEvent};
    use std::str::FromStr;
    use std::sync::Arc;

    async fn seeded() -> (MemoryDepositStore, DepositOrder) {
        let store = MemoryDepositStore::new();
        let derived = DerivedAddress {
            address: "TDeposit7".to_string(),
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

        let event = TransferEvent {
            user_id: "user-7".to_string(),
            address: "TDeposit7".to_string(),
            network: Network::Tron,
            tx_hash: "abc123".to_string(),
            from_address: "TSender".to_string(),
            amount: Decimal::from_str("120.5").unwrap(),
            block_height: 1000,
        };
        (store, DepositOrder::from_event(&event, Decimal::ZERO, 60, 0))
    }

    #[tokio::test]
    async fn test_duplicate_order_rejected() {
        let (store, order) = seeded().await;
        store.insert_order(&order).await.unwrap();

        let mut again = order.clone();
        again.order_no = "DEP-other".to_string();
        assert!(matches!(
            store.insert_order(&again).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_credit_applies_once() {
        let (store, order) = seeded().await;
        store.insert_order(&order).await.unwrap();
        let store = Arc::new(store);

        let (a, b) = tokio::join!(
            store.complete_and_credit(&order.order_no, 20, "USDT", 1),
            store.complete_and_credit(&order.order_no, 20, "USDT", 1),
        );
        assert_ne!(a.unwrap(), b.unwrap());

        let balance = store.get_balance("user-7", "USDT").await.unwrap();
        assert_eq!(balance.available, Decimal::from_str("120.5").unwrap());
    }

    #[tokio::test]
    async fn test_received_total_is_gross_of_fee() {
        let (store, order) = seeded().await;
        let event = TransferEvent {
            user_id: order.user_id.clone(),
            address: order.to_address.clone(),
            network: order.network,
            tx_hash: order.tx_hash.clone(),
            from_address: order.from_address.clone(),
            amount: Decimal::from(100),
            block_height: order.block_number,
        };
        let order = DepositOrder::from_event(&event, Decimal::from_str("0.01").unwrap(), 60, 0);
        store.insert_order(&order).await.unwrap();

        assert!(store.complete_and_credit(&order.order_no, 20, "USDT", 1).await.unwrap());

        let balance = store.get_balance("user-7", "USDT").await.unwrap();
        assert_eq!(balance.available, Decimal::from(99));
        let address = store.find_address(Network::Tron, "TDeposit7").await.unwrap().unwrap();
        assert_eq!(address.total_received, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_credit_without_address_changes_nothing() {
        let (store, mut order) = seeded().await;
        order.to_address = "TUnknown".to_string();
        store.insert_order(&order).await.unwrap();

        assert!(store.complete_and_credit(&order.order_no, 20, "USDT", 1).await.is_err());
        let stored = store.get_order(&order.order_no).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirming);
        assert_eq!(
            store.get_balance("user-7", "USDT").await.unwrap().available,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_derivation_counter() {
        let store = MemoryDepositStore::new();
        assert_eq!(store.next_derivation_index().await.unwrap(), 0);
        assert_eq!(store.next_derivation_index().await.unwrap(), 1);
    }
}
