//! Address Allocator
//!
//! One derivation index per user, allocated from the store's atomic counter,
//! produces all of the user's deposit addresses together. Wallet and address
//! rows are written in one transaction.

use std::sync::Arc;
use tracing::{info, warn};

use super::TrackerError;
use crate::keys::KeyDerivationService;
use crate::storage::{DepositStore, StorageError};
use crate::types::{now_secs, DepositAddress, Wallet};

pub struct AddressAllocator {
    keys: Arc<KeyDerivationService>,
    store: Arc<dyn DepositStore>,
}

impl AddressAllocator {
    pub fn new(keys: Arc<KeyDerivationService>, store: Arc<dyn DepositStore>) -> Self {
        Self { keys, store }
    }

    /// Return the user's wallet, creating it on first use
    ///
    /// Idempotent: an existing wallet is returned unchanged. When two callers
    /// race for the same user, the loser's index is burned and the winner's
    /// wallet is returned to both.
    pub async fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, TrackerError> {
        if user_id.trim().is_empty() {
            return Err(TrackerError::InvalidState("empty user id".to_string()));
        }

        if let Some(wallet) = self.store.get_wallet(user_id).await? {
            return Ok(wallet);
        }

        let index = self.store.next_derivation_index().await?;
        let now = now_secs();
        let addresses = self
            .keys
            .derive_all_addresses(index)?
            .iter()
            .map(|derived| DepositAddress::new(user_id, derived, index, now))
            .collect();

        let wallet = Wallet {
            user_id: user_id.to_string(),
            derivation_index: index,
            created_at: now,
            addresses,
        };

        match self.store.insert_wallet(&wallet).await {
            Ok(()) => {
                info!(user_id, derivation_index = index, "wallet created");
                Ok(wallet)
            }
            Err(StorageError::Duplicate(detail)) => {
                warn!(user_id, derivation_index = index, "concurrent wallet creation: {}", detail);
                self.store.get_wallet(user_id).await?.ok_or_else(|| {
                    TrackerError::InvalidState(format!(
                        "derived address already assigned (index {}): {}",
                        index, detail
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
