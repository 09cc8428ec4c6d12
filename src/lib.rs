//! depositd - Custodial Token Deposit Pipeline
//!
//! Derives one receiving address per user per chain from a single master
//! seed, watches Ethereum, BNB Smart Chain and TRON for inbound USDT
//! transfers, credits the wallet ledger exactly once per transfer and
//! periodically sweeps deposit addresses into the hot wallets.
//!
//! ## Pipeline
//!
//! 1. **Allocation** - one derivation index per user, all addresses at once
//! 2. **Scanning** - per-network watermark (EVM) or address history (TRON)
//! 3. **Confirmation** - CONFIRMING orders credited once deep enough
//! 4. **Sweeping** - balances above a threshold moved to hot wallets
//!
//! Everything user-facing (REST, notifications, fiat) consumes this crate
//! through [`DepositTrackerService`] and its lifecycle events.

pub mod chain;
pub mod common;
pub mod deposit_tracker;
pub mod keys;
pub mod storage;
pub mod types;

pub use common::{config, error, logging};

// Re-exports: configuration and errors
pub use common::{ConfigError, DepositdConfig, DepositdError, NetworkConfig, Result};

// Re-exports: keys
pub use keys::{KeyDerivationService, KeyError, SigningKey};

// Re-exports: chain access
pub use chain::{build_client, ChainClient, ChainError, EvmClient, TronClient};

// Re-exports: storage
pub use storage::{DepositStore, MemoryDepositStore, SqliteDepositStore, StorageError, WalletBalance};

// Re-exports: Deposit Tracker
pub use deposit_tracker::{
    AddressAllocator, ChainScanner, CycleKind, DepositEvent, DepositEventPublisher, DepositLedger,
    DepositTrackerService, SharedTrackerService, SweepEngine, SweepError, SweepReport,
    TrackerError, TrackerStats,
};

// Re-exports: domain types
pub use types::{DepositAddress, DepositOrder, DerivedAddress, Network, OrderStatus, TransferEvent, Wallet};
