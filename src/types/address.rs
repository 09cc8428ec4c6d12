//! Wallet and Deposit Address Types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::network::Network;

/// A user's custodial wallet: one derivation index shared by all networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub derivation_index: u32,
    pub created_at: u64,
    /// One active address per network
    pub addresses: Vec<DepositAddress>,
}

impl Wallet {
    /// Address for a given network, if one is active
    pub fn address_for(&self, network: Network) -> Option<&DepositAddress> {
        self.addresses
            .iter()
            .find(|a| a.network == network && a.is_active)
    }
}

/// Receiving address assigned to a user on one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub user_id: String,
    pub network: Network,
    pub address: String,
    pub derivation_index: u32,
    pub derivation_path: String,
    pub is_active: bool,
    /// Cumulative credited amount
    pub total_received: Decimal,
    /// Number of credited deposits
    pub total_transactions: u64,
    pub last_received_at: Option<u64>,
    /// Cumulative amount consolidated into the hot wallet
    pub total_swept: Decimal,
    pub last_swept_at: Option<u64>,
    pub created_at: u64,
}

impl DepositAddress {
    /// Fresh, active address with zeroed aggregates
    pub fn new(user_id: &str, derived: &DerivedAddress, derivation_index: u32, now: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            network: derived.network,
            address: derived.address.clone(),
            derivation_index,
            derivation_path: derived.derivation_path.clone(),
            is_active: true,
            total_received: Decimal::ZERO,
            total_transactions: 0,
            last_received_at: None,
            total_swept: Decimal::ZERO,
            last_swept_at: None,
            created_at: now,
        }
    }

    /// Whether a sweep is allowed given the cooldown window
    pub fn sweep_cooled_down(&self, now: u64, cooldown_secs: u64) -> bool {
        match self.last_swept_at {
            Some(at) => now.saturating_sub(at) >= cooldown_secs,
            None => true,
        }
    }
}

/// Output of address derivation for one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedAddress {
    pub address: String,
    pub network: Network,
    pub derivation_path: String,
}
