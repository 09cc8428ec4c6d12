//! Deposit Order Types
//!
//! Orders track a single inbound transfer through its lifecycle:
//! confirming → completed | failed | cancelled | expired
//!
//! Crypto deposits start directly in CONFIRMING: the deposit address already
//! attributes the transfer to a user.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::network::Network;

/// Status of a deposit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Seen on-chain, waiting for confirmations
    Confirming,
    /// Confirmed and credited to the wallet balance
    Completed,
    /// Transfer transaction reverted on-chain
    Failed,
    /// Cancelled by an operator
    Cancelled,
    /// Transaction disappeared and the order timed out
    Expired,
}

impl OrderStatus {
    /// Status only moves forward, and only out of CONFIRMING
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == OrderStatus::Confirming && next != OrderStatus::Confirming
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirming => "confirming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirming" => Ok(Self::Confirming),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A qualifying inbound transfer to one of our deposit addresses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferEvent {
    pub user_id: String,
    pub address: String,
    pub network: Network,
    pub tx_hash: String,
    pub from_address: String,
    pub amount: Decimal,
    pub block_height: u64,
}

/// Append-only record of one deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositOrder {
    /// Business order number
    pub order_no: String,
    pub user_id: String,
    pub network: Network,
    /// Idempotency key together with `network`
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub block_number: u64,
    pub confirmations: u64,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub status: OrderStatus,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// First time the transfer was seen with at least one confirmation
    pub confirmed_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub expires_at: u64,
}

impl DepositOrder {
    /// Build a CONFIRMING order from a scanned transfer
    pub fn from_event(event: &TransferEvent, fee_rate: Decimal, expiry_secs: u64, now: u64) -> Self {
        let fee = (event.amount * fee_rate).round_dp(event.amount.scale().max(2));
        let net_amount = event.amount - fee;

        Self {
            order_no: generate_order_no(now),
            user_id: event.user_id.clone(),
            network: event.network,
            tx_hash: event.tx_hash.clone(),
            from_address: event.from_address.clone(),
            to_address: event.address.clone(),
            block_number: event.block_height,
            confirmations: 0,
            amount: event.amount,
            fee,
            net_amount,
            status: OrderStatus::Confirming,
            error: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            completed_at: None,
            expires_at: now + expiry_secs,
        }
    }

    pub fn required_confirmations(&self) -> u64 {
        self.network.required_confirmations()
    }

    /// Whether the confirmation count meets the network threshold
    pub fn is_confirmed_enough(&self, confirmations: u64) -> bool {
        confirmations >= self.required_confirmations()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Business order number: `DEP` + UTC timestamp + 6 random digits
pub fn generate_order_no(now: u64) -> String {
    let stamp = chrono::DateTime::from_timestamp(now as i64, 0)
        .map(|t| t.format("%Y%m%d%H%M%S").to_string())
        .unwrap_or_else(|| now.to_string());
    format!("DEP{}{:06}", stamp, rand::random::<u32>() % 1_000_000)
}
