//! Shared Types Module
//!
//! Data types shared across the deposit pipeline.

pub mod address;
pub mod network;
pub mod order;
pub mod units;

// Re-exports for convenience
pub use address::{DepositAddress, DerivedAddress, Wallet};
pub use network::{ChainFamily, Network};
pub use order::{generate_order_no, DepositOrder, OrderStatus, TransferEvent};
pub use units::{base_units_to_decimal, format_amount};

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
