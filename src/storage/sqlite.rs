//! SQLite Persistent Storage for the Deposit Pipeline
//!
//! Durable storage that survives service restarts. Uses connection pooling
//! via r2d2 for concurrent access.
//!
//! Decimal amounts are stored as TEXT. Every write that does arithmetic on
//! stored amounts runs in a `BEGIN IMMEDIATE` transaction, so concurrent
//! writers are serialised by SQLite's write lock.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;

use super::traits::{DepositStore, OrderStats, StorageError, StorageResult, WalletBalance};
use crate::types::{DepositAddress, DepositOrder, Network, OrderStatus, Wallet};

/// SQLite-backed store with connection pooling
pub struct SqliteDepositStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDepositStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        // Writers serialise on IMMEDIATE transactions; wait instead of failing
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS derivation_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_index INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO derivation_counter (id, next_index) VALUES (1, 0);

            CREATE TABLE IF NOT EXISTS wallets (
                user_id TEXT PRIMARY KEY,
                derivation_index INTEGER NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deposit_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                network TEXT NOT NULL,
                address TEXT NOT NULL,
                derivation_index INTEGER NOT NULL,
                derivation_path TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                total_received TEXT NOT NULL DEFAULT '0',
                total_transactions INTEGER NOT NULL DEFAULT 0,
                last_received_at INTEGER,
                total_swept TEXT NOT NULL DEFAULT '0',
                last_swept_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE (network, address)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_deposit_addresses_active_user
                ON deposit_addresses(user_id, network) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_deposit_addresses_network
                ON deposit_addresses(network, is_active);

            CREATE TABLE IF NOT EXISTS deposit_orders (
                order_no TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                network TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                confirmations INTEGER NOT NULL DEFAULT 0,
                amount TEXT NOT NULL,
                fee TEXT NOT NULL,
                net_amount TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                confirmed_at INTEGER,
                completed_at INTEGER,
                expires_at INTEGER NOT NULL,
                UNIQUE (tx_hash, network)
            );

            CREATE INDEX IF NOT EXISTS idx_deposit_orders_status ON deposit_orders(status);
            CREATE INDEX IF NOT EXISTS idx_deposit_orders_user ON deposit_orders(user_id);

            CREATE TABLE IF NOT EXISTS wallet_balances (
                user_id TEXT NOT NULL,
                currency TEXT NOT NULL,
                available TEXT NOT NULL DEFAULT '0',
                frozen TEXT NOT NULL DEFAULT '0',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, currency)
            );

            CREATE TABLE IF NOT EXISTS scan_watermarks (
                network TEXT PRIMARY KEY,
                block_height INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_address(row: &rusqlite::Row) -> rusqlite::Result<DepositAddress> {
        Ok(DepositAddress {
            user_id: row.get("user_id")?,
            network: parse_col(row, "network")?,
            address: row.get("address")?,
            derivation_index: row.get::<_, i64>("derivation_index")? as u32,
            derivation_path: row.get("derivation_path")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            total_received: parse_col(row, "total_received")?,
            total_transactions: row.get::<_, i64>("total_transactions")? as u64,
            last_received_at: row.get::<_, Option<i64>>("last_received_at")?.map(|v| v as u64),
            total_swept: parse_col(row, "total_swept")?,
            last_swept_at: row.get::<_, Option<i64>>("last_swept_at")?.map(|v| v as u64),
            created_at: row.get::<_, i64>("created_at")? as u64,
        })
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<DepositOrder> {
        Ok(DepositOrder {
            order_no: row.get("order_no")?,
            user_id: row.get("user_id")?,
            network: parse_col(row, "network")?,
            tx_hash: row.get("tx_hash")?,
            from_address: row.get("from_address")?,
            to_address: row.get("to_address")?,
            block_number: row.get::<_, i64>("block_number")? as u64,
            confirmations: row.get::<_, i64>("confirmations")? as u64,
            amount: parse_col(row, "amount")?,
            fee: parse_col(row, "fee")?,
            net_amount: parse_col(row, "net_amount")?,
            status: parse_col(row, "status")?,
            error: row.get("error")?,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
            confirmed_at: row.get::<_, Option<i64>>("confirmed_at")?.map(|v| v as u64),
            completed_at: row.get::<_, Option<i64>>("completed_at")?.map(|v| v as u64),
            expires_at: row.get::<_, i64>("expires_at")? as u64,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn next_derivation_index_sync(&self) -> StorageResult<u32> {
        let conn = self.conn()?;

        let index: i64 = conn
            .query_row(
                "UPDATE derivation_counter SET next_index = next_index + 1 WHERE id = 1 RETURNING next_index - 1",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        u32::try_from(index).map_err(|_| StorageError::InvalidData(format!("derivation index {}", index)))
    }

    fn get_addresses_for_user_sync(&self, user_id: &str) -> StorageResult<Vec<DepositAddress>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM deposit_addresses WHERE user_id = ?1 ORDER BY id ASC")
            .map_err(db_err)?;

        let addresses = stmt
            .query_map(params![user_id], |row| Self::row_to_address(row))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(addresses)
    }

    fn get_wallet_sync(&self, user_id: &str) -> StorageResult<Option<Wallet>> {
        let header = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT derivation_index, created_at FROM wallets WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(db_err)?
        };

        let Some((derivation_index, created_at)) = header else {
            return Ok(None);
        };

        Ok(Some(Wallet {
            user_id: user_id.to_string(),
            derivation_index: derivation_index as u32,
            created_at: created_at as u64,
            addresses: self.get_addresses_for_user_sync(user_id)?,
        }))
    }

    fn insert_wallet_sync(&self, wallet: &Wallet) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        tx.execute(
            "INSERT INTO wallets (user_id, derivation_index, created_at) VALUES (?1, ?2, ?3)",
            params![wallet.user_id, wallet.derivation_index as i64, wallet.created_at as i64],
        )
        .map_err(|e| unique_err(e, &format!("wallet for {}", wallet.user_id)))?;

        for addr in &wallet.addresses {
            tx.execute(
                r#"
                INSERT INTO deposit_addresses (
                    user_id, network, address, derivation_index, derivation_path,
                    is_active, total_received, total_transactions, last_received_at,
                    total_swept, last_swept_at, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    addr.user_id,
                    addr.network.as_str(),
                    addr.address,
                    addr.derivation_index as i64,
                    addr.derivation_path,
                    addr.is_active as i64,
                    addr.total_received.to_string(),
                    addr.total_transactions as i64,
                    addr.last_received_at.map(|v| v as i64),
                    addr.total_swept.to_string(),
                    addr.last_swept_at.map(|v| v as i64),
                    addr.created_at as i64,
                ],
            )
            .map_err(|e| unique_err(e, &format!("{} address {}", addr.network, addr.address)))?;
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn active_addresses_sync(&self, network: Network) -> StorageResult<Vec<DepositAddress>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM deposit_addresses WHERE network = ?1 AND is_active = 1 ORDER BY id ASC")
            .map_err(db_err)?;

        let addresses = stmt
            .query_map(params![network.as_str()], |row| Self::row_to_address(row))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(addresses)
    }

    fn find_address_sync(&self, network: Network, address: &str) -> StorageResult<Option<DepositAddress>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM deposit_addresses WHERE network = ?1 AND address = ?2",
            params![network.as_str(), address],
            |row| Self::row_to_address(row),
        )
        .optional()
        .map_err(db_err)
    }

    fn deactivate_address_sync(&self, network: Network, address: &str) -> StorageResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE deposit_addresses SET is_active = 0 WHERE network = ?1 AND address = ?2 AND is_active = 1",
                params![network.as_str(), address],
            )
            .map_err(db_err)?;

        Ok(rows > 0)
    }

    fn record_sweep_sync(&self, network: Network, address: &str, amount: Decimal, at: u64) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT total_swept FROM deposit_addresses WHERE network = ?1 AND address = ?2",
                params![network.as_str(), address],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let current = current.ok_or_else(|| StorageError::NotFound(format!("{} address {}", network, address)))?;
        let total = parse_decimal(&current)? + amount;

        tx.execute(
            "UPDATE deposit_addresses SET total_swept = ?3, last_swept_at = ?4 WHERE network = ?1 AND address = ?2",
            params![network.as_str(), address, total.to_string(), at as i64],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn order_exists_sync(&self, network: Network, tx_hash: &str) -> StorageResult<bool> {
        let conn = self.conn()?;

        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM deposit_orders WHERE network = ?1 AND tx_hash = ?2",
                params![network.as_str(), tx_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        Ok(found.is_some())
    }

    fn insert_order_sync(&self, order: &DepositOrder) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO deposit_orders (
                order_no, user_id, network, tx_hash, from_address, to_address,
                block_number, confirmations, amount, fee, net_amount, status,
                error, created_at, updated_at, confirmed_at, completed_at, expires_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18
            )
            "#,
            params![
                order.order_no,
                order.user_id,
                order.network.as_str(),
                order.tx_hash,
                order.from_address,
                order.to_address,
                order.block_number as i64,
                order.confirmations as i64,
                order.amount.to_string(),
                order.fee.to_string(),
                order.net_amount.to_string(),
                order.status.as_str(),
                order.error,
                order.created_at as i64,
                order.updated_at as i64,
                order.confirmed_at.map(|v| v as i64),
                order.completed_at.map(|v| v as i64),
                order.expires_at as i64,
            ],
        )
        .map_err(|e| unique_err(e, &format!("{} tx {}", order.network, order.tx_hash)))?;

        Ok(())
    }

    fn get_order_sync(&self, order_no: &str) -> StorageResult<Option<DepositOrder>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM deposit_orders WHERE order_no = ?1",
            params![order_no],
            |row| Self::row_to_order(row),
        )
        .optional()
        .map_err(db_err)
    }

    fn orders_by_status_sync(&self, status: OrderStatus) -> StorageResult<Vec<DepositOrder>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM deposit_orders WHERE status = ?1 ORDER BY created_at ASC, order_no ASC")
            .map_err(db_err)?;

        let orders = stmt
            .query_map(params![status.as_str()], |row| Self::row_to_order(row))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(orders)
    }

    fn update_confirmations_sync(&self, order_no: &str, confirmations: u64, at: u64) -> StorageResult<()> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
                UPDATE deposit_orders SET
                    confirmations = ?2,
                    updated_at = ?3,
                    confirmed_at = CASE
                        WHEN confirmed_at IS NULL AND ?2 > 0 THEN ?3
                        ELSE confirmed_at
                    END
                WHERE order_no = ?1 AND status = 'confirming'
                "#,
                params![order_no, confirmations as i64, at as i64],
            )
            .map_err(db_err)?;

        if rows == 0 {
            return Err(StorageError::NotFound(order_no.to_string()));
        }

        Ok(())
    }

    fn transition_order_sync(
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

        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE deposit_orders SET status = ?3, error = ?4, updated_at = ?5 WHERE order_no = ?1 AND status = ?2",
                params![order_no, from.as_str(), to.as_str(), error, at as i64],
            )
            .map_err(db_err)?;

        Ok(rows > 0)
    }

    fn complete_and_credit_sync(
        &self,
        order_no: &str,
        confirmations: u64,
        currency: &str,
        at: u64,
    ) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        // Claim the order; a second pass finds nothing to claim
        let claimed = tx
            .execute(
                r#"
                UPDATE deposit_orders SET
                    status = 'completed',
                    confirmations = ?2,
                    completed_at = ?3,
                    updated_at = ?3,
                    confirmed_at = COALESCE(confirmed_at, ?3)
                WHERE order_no = ?1 AND status = 'confirming'
                "#,
                params![order_no, confirmations as i64, at as i64],
            )
            .map_err(db_err)?;

        if claimed == 0 {
            return Ok(false);
        }

        let (user_id, network, to_address, amount, net_amount): (String, String, String, String, String) = tx
            .query_row(
                "SELECT user_id, network, to_address, amount, net_amount FROM deposit_orders WHERE order_no = ?1",
                params![order_no],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .map_err(db_err)?;
        let amount = parse_decimal(&amount)?;
        let net_amount = parse_decimal(&net_amount)?;

        // Balance increment
        let available: Option<String> = tx
            .query_row(
                "SELECT available FROM wallet_balances WHERE user_id = ?1 AND currency = ?2",
                params![user_id, currency],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let available = match available {
            Some(v) => parse_decimal(&v)?,
            None => Decimal::ZERO,
        } + net_amount;

        tx.execute(
            r#"
            INSERT INTO wallet_balances (user_id, currency, available, frozen, updated_at)
            VALUES (?1, ?2, ?3, '0', ?4)
            ON CONFLICT (user_id, currency) DO UPDATE SET
                available = excluded.available,
                updated_at = excluded.updated_at
            "#,
            params![user_id, currency, available.to_string(), at as i64],
        )
        .map_err(db_err)?;

        // Address aggregates track what arrived on-chain, before the fee
        let total_received: String = tx
            .query_row(
                "SELECT total_received FROM deposit_addresses WHERE network = ?1 AND address = ?2",
                params![network, to_address],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let total_received = parse_decimal(&total_received)? + amount;

        tx.execute(
            r#"
            UPDATE deposit_addresses SET
                total_received = ?3,
                total_transactions = total_transactions + 1,
                last_received_at = ?4
            WHERE network = ?1 AND address = ?2
            "#,
            params![network, to_address, total_received.to_string(), at as i64],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    fn get_balance_sync(&self, user_id: &str, currency: &str) -> StorageResult<WalletBalance> {
        let conn = self.conn()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT available, frozen FROM wallet_balances WHERE user_id = ?1 AND currency = ?2",
                params![user_id, currency],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((available, frozen)) => Ok(WalletBalance {
                user_id: user_id.to_string(),
                currency: currency.to_string(),
                available: parse_decimal(&available)?,
                frozen: parse_decimal(&frozen)?,
            }),
            None => Ok(WalletBalance::empty(user_id, currency)),
        }
    }

    fn get_watermark_sync(&self, network: Network) -> StorageResult<Option<u64>> {
        let conn = self.conn()?;

        let height: Option<i64> = conn
            .query_row(
                "SELECT block_height FROM scan_watermarks WHERE network = ?1",
                params![network.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        Ok(height.map(|h| h as u64))
    }

    fn set_watermark_sync(&self, network: Network, height: u64) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO scan_watermarks (network, block_height, updated_at)
            VALUES (?1, ?2, strftime('%s', 'now'))
            ON CONFLICT (network) DO UPDATE SET
                block_height = excluded.block_height,
                updated_at = excluded.updated_at
            "#,
            params![network.as_str(), height as i64],
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn order_stats_sync(&self) -> StorageResult<OrderStats> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM deposit_orders GROUP BY status")
            .map_err(db_err)?;

        let mut stats = OrderStats::default();
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db_err)?;

        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            stats.total += count as u64;
            stats.by_status.insert(status, count as u64);
        }

        let mut stmt = conn
            .prepare("SELECT net_amount FROM deposit_orders WHERE status = 'completed'")
            .map_err(db_err)?;
        let amounts = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        for amount in amounts {
            stats.total_credited += parse_decimal(&amount.map_err(db_err)?)?;
        }

        Ok(stats)
    }
}

#[async_trait]
impl DepositStore for SqliteDepositStore {
    async fn next_derivation_index(&self) -> StorageResult<u32> {
        self.next_derivation_index_sync()
    }

    async fn get_wallet(&self, user_id: &str) -> StorageResult<Option<Wallet>> {
        self.get_wallet_sync(user_id)
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StorageResult<()> {
        self.insert_wallet_sync(wallet)
    }

    async fn get_addresses_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositAddress>> {
        self.get_addresses_for_user_sync(user_id)
    }

    async fn active_addresses(&self, network: Network) -> StorageResult<Vec<DepositAddress>> {
        self.active_addresses_sync(network)
    }

    async fn find_address(&self, network: Network, address: &str) -> StorageResult<Option<DepositAddress>> {
        self.find_address_sync(network, address)
    }

    async fn deactivate_address(&self, network: Network, address: &str) -> StorageResult<bool> {
        self.deactivate_address_sync(network, address)
    }

    async fn record_sweep(&self, network: Network, address: &str, amount: Decimal, at: u64) -> StorageResult<()> {
        self.record_sweep_sync(network, address, amount, at)
    }

    async fn order_exists(&self, network: Network, tx_hash: &str) -> StorageResult<bool> {
        self.order_exists_sync(network, tx_hash)
    }

    async fn insert_order(&self, order: &DepositOrder) -> StorageResult<()> {
        self.insert_order_sync(order)
    }

    async fn get_order(&self, order_no: &str) -> StorageResult<Option<DepositOrder>> {
        self.get_order_sync(order_no)
    }

    async fn orders_by_status(&self, status: OrderStatus) -> StorageResult<Vec<DepositOrder>> {
        self.orders_by_status_sync(status)
    }

    async fn update_confirmations(&self, order_no: &str, confirmations: u64, at: u64) -> StorageResult<()> {
        self.update_confirmations_sync(order_no, confirmations, at)
    }

    async fn transition_order(
        &self,
        order_no: &str,
        from: OrderStatus,
        to: OrderStatus,
        error: Option<&str>,
        at: u64,
    ) -> StorageResult<bool> {
        self.transition_order_sync(order_no, from, to, error, at)
    }

    async fn complete_and_credit(
        &self,
        order_no: &str,
        confirmations: u64,
        currency: &str,
        at: u64,
    ) -> StorageResult<bool> {
        self.complete_and_credit_sync(order_no, confirmations, currency, at)
    }

    async fn get_balance(&self, user_id: &str, currency: &str) -> StorageResult<WalletBalance> {
        self.get_balance_sync(user_id, currency)
    }

    async fn get_watermark(&self, network: Network) -> StorageResult<Option<u64>> {
        self.get_watermark_sync(network)
    }

    async fn set_watermark(&self, network: Network, height: u64) -> StorageResult<()> {
        self.set_watermark_sync(network, height)
    }

    async fn order_stats(&self) -> StorageResult<OrderStats> {
        self.order_stats_sync()
    }
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Map primary key / unique constraint violations to `Duplicate`
fn unique_err(e: rusqlite::Error, what: &str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.extended_code == 1555 || err.extended_code == 2067 {
            return StorageError::Duplicate(what.to_string());
        }
    }
    db_err(e)
}

fn parse_decimal(s: &str) -> StorageResult<Decimal> {
    s.parse()
        .map_err(|_| StorageError::InvalidData(format!("bad decimal: {}", s)))
}

/// Read a TEXT column through `FromStr`
fn parse_col<T>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("{}: {}", column, e).into(),
        )
    })
}
