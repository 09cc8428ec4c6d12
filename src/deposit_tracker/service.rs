//! Deposit Tracker Service
//!
//! Main service wiring allocator, scanners, ledger and sweep engines over one
//! store, and running the three periodic cycles:
//!
//! - scan: discover transfers and record orders
//! - confirm: advance CONFIRMING orders and credit completed ones
//! - sweep: consolidate balances into the hot wallets
//!
//! Every cycle kind is scheduled per network, each with its own ticker and
//! lock, so a slow upstream only delays its own network. A tick that arrives
//! while the previous run for the same network and kind is still going is
//! skipped.

use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use super::allocator::AddressAllocator;
use super::events::{DepositEvent, DepositEventPublisher};
use super::ledger::DepositLedger;
use super::scanner::ChainScanner;
use super::sweeper::{SweepEngine, SweepReport};
use super::TrackerError;
use crate::chain::{build_client, ChainClient};
use crate::common::config::DepositdConfig;
use crate::common::error::DepositdError;
use crate::common::logging::{generate_correlation_id, log_security_event};
use crate::keys::KeyDerivationService;
use crate::storage::{DepositStore, OrderStats, SqliteDepositStore, WalletBalance};
use crate::types::{DepositOrder, DerivedAddress, Network, Wallet};

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStats {
    pub orders: OrderStats,
    pub active_addresses: BTreeMap<Network, usize>,
    pub watermarks: BTreeMap<Network, Option<u64>>,
}

/// Periodic cycle kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Scan,
    Confirm,
    Sweep,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Confirm => "confirm",
            Self::Sweep => "sweep",
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory locks of one network
#[derive(Default)]
struct CycleLocks {
    scan: Mutex<()>,
    confirm: Mutex<()>,
    sweep: Mutex<()>,
}

impl CycleLocks {
    fn get(&self, kind: CycleKind) -> &Mutex<()> {
        match kind {
            CycleKind::Scan => &self.scan,
            CycleKind::Confirm => &self.confirm,
            CycleKind::Sweep => &self.sweep,
        }
    }
}

/// Main deposit tracker service
pub struct DepositTrackerService {
    config: DepositdConfig,
    store: Arc<dyn DepositStore>,
    keys: Arc<KeyDerivationService>,
    clients: BTreeMap<Network, Arc<dyn ChainClient>>,
    allocator: AddressAllocator,
    scanners: BTreeMap<Network, ChainScanner>,
    ledger: DepositLedger,
    sweepers: BTreeMap<Network, SweepEngine>,
    publisher: DepositEventPublisher,
    locks: BTreeMap<Network, CycleLocks>,
}

/// Shared tracker service type
pub type SharedTrackerService = Arc<DepositTrackerService>;

impl DepositTrackerService {
    /// Wire the service from its parts
    ///
    /// Every configured network must have a client.
    pub fn new(
        config: DepositdConfig,
        store: Arc<dyn DepositStore>,
        keys: Arc<KeyDerivationService>,
        clients: BTreeMap<Network, Arc<dyn ChainClient>>,
    ) -> Result<Self, TrackerError> {
        let publisher = DepositEventPublisher::default();
        let mut scanners = BTreeMap::new();
        let mut sweepers = BTreeMap::new();
        let mut locks = BTreeMap::new();

        for (network, network_config) in &config.networks {
            let client = clients
                .get(network)
                .cloned()
                .ok_or(TrackerError::NetworkNotConfigured(*network))?;

            scanners.insert(
                *network,
                ChainScanner::from_config(network_config, client.clone(), store.clone()),
            );
            sweepers.insert(
                *network,
                SweepEngine::new(
                    network_config.clone(),
                    client,
                    store.clone(),
                    keys.clone(),
                    publisher.clone(),
                    config.schedule.sweep_cooldown_secs,
                ),
            );
            locks.insert(*network, CycleLocks::default());
        }

        let ledger = DepositLedger::new(
            store.clone(),
            publisher.clone(),
            config.deposit_fee_rate,
            config.order_expiry_secs,
            config.currency.clone(),
        );
        let allocator = AddressAllocator::new(keys.clone(), store.clone());

        Ok(Self {
            config,
            store,
            keys,
            clients,
            allocator,
            scanners,
            ledger,
            sweepers,
            publisher,
            locks,
        })
    }

    /// Build seed, store and chain clients from configuration
    ///
    /// Any failure here is fatal: the service never runs half-configured.
    pub fn from_config(config: DepositdConfig) -> Result<Self, DepositdError> {
        let keys = KeyDerivationService::from_mnemonic(&config.mnemonic, &config.mnemonic_passphrase)?;
        log_security_event("master_seed_loaded", true, serde_json::json!({}), None);

        let store: Arc<dyn DepositStore> = Arc::new(SqliteDepositStore::new(&config.db_path)?);

        let mut clients = BTreeMap::new();
        for (network, network_config) in &config.networks {
            clients.insert(*network, build_client(network_config, &config.upstream)?);
        }

        Ok(Self::new(config, store, Arc::new(keys), clients)?)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DepositEvent> {
        self.publisher.subscribe()
    }

    pub fn config(&self) -> &DepositdConfig {
        &self.config
    }

    /// Get or create a user's deposit wallet
    pub async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, TrackerError> {
        self.allocator.get_or_create_wallet(user_id).await
    }

    /// Addresses for a derivation index on every network
    pub fn derive_all_addresses(&self, index: u32) -> Result<Vec<DerivedAddress>, TrackerError> {
        Ok(self.keys.derive_all_addresses(index)?)
    }

    /// Scan every network once; returns the number of new orders
    pub async fn process_new_deposits(&self) -> Result<usize, TrackerError> {
        let networks: Vec<Network> = self.scanners.keys().copied().collect();
        let results = join_all(networks.iter().map(|network| self.scan_network(*network))).await;

        let mut created = 0;
        for (network, result) in networks.iter().zip(results) {
            match result {
                Ok(count) => created += count,
                Err(e) => warn!(%network, "scan failed: {}", e),
            }
        }
        Ok(created)
    }

    /// Scan one network from its stored watermark; returns the number of new orders
    pub async fn scan_network(&self, network: Network) -> Result<usize, TrackerError> {
        let scanner = self
            .scanners
            .get(&network)
            .ok_or(TrackerError::NetworkNotConfigured(network))?;

        let watermark = self.store.get_watermark(network).await?;
        let outcome = scanner.scan(watermark).await?;

        let created = self.ledger.ingest(&outcome.events).await?;

        // Only after the window's orders are stored
        if let Some(next) = outcome.next_watermark {
            if Some(next) != watermark {
                self.store.set_watermark(network, next).await?;
            }
        }
        Ok(created)
    }

    /// Run one confirmation pass; returns the number of completed orders
    pub async fn confirm_pending_deposits(&self) -> Result<usize, TrackerError> {
        self.ledger.confirm_pending(&self.clients).await
    }

    /// Confirmation pass over one network's orders
    pub async fn confirm_network(&self, network: Network) -> Result<usize, TrackerError> {
        let client = self
            .clients
            .get(&network)
            .cloned()
            .ok_or(TrackerError::NetworkNotConfigured(network))?;
        self.ledger.confirm_network_pending(client).await
    }

    /// Sweep every network; a network that fails entirely reports no addresses
    pub async fn sweep_all(&self) -> Result<BTreeMap<Network, Vec<SweepReport>>, TrackerError> {
        let results = join_all(self.sweepers.values().map(|sweeper| sweeper.sweep_network())).await;

        let mut reports = BTreeMap::new();
        for (network, result) in self.sweepers.keys().zip(results) {
            let network_reports = match result {
                Ok(network_reports) => network_reports,
                Err(e) => {
                    warn!(%network, "sweep failed: {}", e);
                    Vec::new()
                }
            };
            reports.insert(*network, network_reports);
        }
        Ok(reports)
    }

    /// Operator cancellation of a pending order
    pub async fn cancel_order(&self, order_no: &str, reason: &str) -> Result<DepositOrder, TrackerError> {
        self.ledger.cancel_order(order_no, reason).await
    }

    /// Stop watching an address; returns false if it was not active
    pub async fn deactivate_address(&self, network: Network, address: &str) -> Result<bool, TrackerError> {
        let deactivated = self.store.deactivate_address(network, address).await?;
        if deactivated {
            info!(%network, address, "deposit address deactivated");
        }
        Ok(deactivated)
    }

    /// Wallet balance in the configured deposit currency
    pub async fn get_balance(&self, user_id: &str) -> Result<WalletBalance, TrackerError> {
        Ok(self.store.get_balance(user_id, &self.config.currency).await?)
    }

    pub async fn get_order(&self, order_no: &str) -> Result<Option<DepositOrder>, TrackerError> {
        Ok(self.store.get_order(order_no).await?)
    }

    /// Get statistics
    pub async fn stats(&self) -> Result<TrackerStats, TrackerError> {
        let mut stats = TrackerStats {
            orders: self.store.order_stats().await?,
            ..Default::default()
        };
        for network in self.config.networks.keys() {
            stats
                .active_addresses
                .insert(*network, self.store.active_addresses(*network).await?.len());
            stats
                .watermarks
                .insert(*network, self.store.get_watermark(*network).await?);
        }
        Ok(stats)
    }

    // =========================================================================
    // Scheduled cycles
    // =========================================================================

    /// One guarded cycle for a network; false if the previous one is still running
    pub async fn run_cycle(&self, kind: CycleKind, network: Network) -> bool {
        let Some(locks) = self.locks.get(&network) else {
            warn!(%network, cycle = %kind, "network not configured, skipping tick");
            return false;
        };
        let Ok(_guard) = locks.get(kind).try_lock() else {
            warn!(%network, cycle = %kind, "previous cycle still running, skipping tick");
            return false;
        };

        let span = info_span!(
            "cycle",
            cycle = %kind,
            %network,
            correlation_id = %generate_correlation_id()
        );
        async {
            let started = Instant::now();
            match kind {
                CycleKind::Scan => match self.scan_network(network).await {
                    Ok(created) => info!(
                        created,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "scan cycle done"
                    ),
                    Err(e) => error!("scan cycle failed: {}", e),
                },
                CycleKind::Confirm => match self.confirm_network(network).await {
                    Ok(completed) => info!(completed, "confirmation cycle done"),
                    Err(e) => error!("confirmation cycle failed: {}", e),
                },
                CycleKind::Sweep => match self.sweepers.get(&network) {
                    Some(sweeper) => match sweeper.sweep_network().await {
                        Ok(reports) => {
                            let swept = reports.iter().filter(|r| r.success).count();
                            info!(swept, attempted = reports.len(), "sweep cycle done");
                        }
                        Err(e) => error!("sweep cycle failed: {}", e),
                    },
                    None => warn!("no sweep engine"),
                },
            }
        }
        .instrument(span)
        .await;
        true
    }

    /// Run the scheduler until ctrl-c
    ///
    /// Each network gets its own scan, confirm and (if enabled) sweep loop.
    pub async fn run(self: Arc<Self>) -> Result<(), TrackerError> {
        let schedule = self.config.schedule.clone();
        info!(
            scan_secs = schedule.scan_interval_secs,
            confirm_secs = schedule.confirm_interval_secs,
            sweep_secs = schedule.sweep_interval_secs,
            sweep_enabled = schedule.sweep_enabled,
            networks = self.locks.len(),
            "deposit tracker started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut loops = Vec::new();
        for network in self.locks.keys() {
            loops.push(self.spawn_loop(CycleKind::Scan, *network, schedule.scan_interval_secs, shutdown_rx.clone()));
            loops.push(self.spawn_loop(
                CycleKind::Confirm,
                *network,
                schedule.confirm_interval_secs,
                shutdown_rx.clone(),
            ));
            if schedule.sweep_enabled {
                loops.push(self.spawn_loop(CycleKind::Sweep, *network, schedule.sweep_interval_secs, shutdown_rx.clone()));
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
        info!("shutdown requested, stopping scheduler");

        // Loops finish their in-flight cycle before observing the signal
        let _ = shutdown_tx.send(true);
        for result in join_all(loops).await {
            if let Err(e) = result {
                error!("scheduler loop ended abnormally: {}", e);
            }
        }
        info!("deposit tracker stopped");
        Ok(())
    }

    fn spawn_loop(
        self: &Arc<Self>,
        kind: CycleKind,
        network: Network,
        secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = ticker(secs);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.run_cycle(kind, network).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
