//! Deposit Tracker Module
//!
//! Tracks custodial token deposits through their complete lifecycle:
//!
//! ```text
//! CONFIRMING → COMPLETED | FAILED | CANCELLED | EXPIRED
//! ```
//!
//! ## Components
//!
//! - **allocator**: Assigns a derivation index per user and persists its addresses
//! - **scanner**: Discovers inbound transfers on one network since a watermark
//! - **ledger**: Creates orders, tracks confirmations, credits balances exactly once
//! - **sweeper**: Consolidates deposit address balances into hot wallets
//! - **events**: Lifecycle events for notification and audit consumers
//! - **service**: Main service orchestrating all components on a schedule
//!
//! ## Flow Overview
//!
//! 1. A user's wallet is created on first request (one index, one address per network)
//! 2. Scanners poll each network and emit transfer events to our addresses
//! 3. The ledger records one CONFIRMING order per `(tx_hash, network)`
//! 4. Confirmation passes credit the wallet balance once the network threshold is met
//! 5. Sweeps periodically move on-chain balances to the hot wallets

pub mod allocator;
pub mod events;
pub mod ledger;
pub mod scanner;
pub mod service;
pub mod sweeper;

// Re-exports
pub use allocator::AddressAllocator;
pub use events::{DepositEvent, DepositEventPublisher};
pub use ledger::DepositLedger;
pub use scanner::{ChainScanner, ScanOutcome};
pub use service::{CycleKind, DepositTrackerService, SharedTrackerService, TrackerStats};
pub use sweeper::{SweepCandidate, SweepEngine, SweepError, SweepReport};

use crate::chain::ChainError;
use crate::keys::KeyError;
use crate::storage::StorageError;
use crate::types::Network;

/// Deposit tracker errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network not configured: {0}")]
    NetworkNotConfigured(Network),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TrackerError {
    /// Failures that clear up on their own by the next cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Chain(e) => e.is_upstream(),
            TrackerError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
