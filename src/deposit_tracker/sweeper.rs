//! Sweep Engine
//!
//! Consolidates token balances from deposit addresses into the network's hot
//! wallet.
//!
//! # Flow (per address):
//! 1. Skip addresses swept within the cooldown window
//! 2. Abort if the current fee price is above the configured ceiling
//! 3. Check the address holds enough native coin to pay for the transfer
//! 4. Derive the one-time signing key, build and sign a full-balance transfer
//! 5. Broadcast and record the swept amount
//!
//! Every address is swept independently: a failure is reported for that
//! address and the cycle continues.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

use super::events::{DepositEvent, DepositEventPublisher};
use crate::chain::{ChainClient, ChainError};
use crate::common::config::NetworkConfig;
use crate::common::logging::log_sweep_event;
use crate::keys::{KeyDerivationService, KeyError};
use crate::storage::{DepositStore, StorageError};
use crate::types::{base_units_to_decimal, now_secs, DepositAddress, Network};

/// Sweep errors
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("fee price {current} above ceiling {ceiling}")]
    FeeCeilingExceeded { current: u128, ceiling: u128 },

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("swept recently, {0}s of cooldown left")]
    CoolingDown(u64),

    #[error("no hot wallet configured for {0}")]
    NoHotWallet(Network),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("chain error: {0}")]
    Chain(ChainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SweepError {
    /// Benign conditions retried on the next cycle
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SweepError::FeeCeilingExceeded { .. } | SweepError::InsufficientBalance(_) | SweepError::CoolingDown(_)
        )
    }
}

impl From<ChainError> for SweepError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Signing(msg) => SweepError::Signing(msg),
            other => SweepError::Chain(other),
        }
    }
}

/// An address whose on-chain balance is worth sweeping
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCandidate {
    pub address: DepositAddress,
    /// Token base units
    pub raw_balance: u128,
    pub amount: Decimal,
}

/// Outcome of sweeping one address
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SweepReport {
    pub address: String,
    pub amount: Decimal,
    pub tx_hash: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Sweeps one network's deposit addresses
pub struct SweepEngine {
    config: NetworkConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn DepositStore>,
    keys: Arc<KeyDerivationService>,
    publisher: DepositEventPublisher,
    cooldown_secs: u64,
}

impl SweepEngine {
    pub fn new(
        config: NetworkConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn DepositStore>,
        keys: Arc<KeyDerivationService>,
        publisher: DepositEventPublisher,
        cooldown_secs: u64,
    ) -> Self {
        Self {
            config,
            client,
            store,
            keys,
            publisher,
            cooldown_secs,
        }
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    /// Active addresses holding at least the network's minimum sweep amount
    ///
    /// Addresses whose balance cannot be read are left out of this cycle.
    pub async fn get_sweep_candidates(&self) -> Result<Vec<SweepCandidate>, SweepError> {
        let network = self.network();
        let mut candidates = Vec::new();

        for address in self.store.active_addresses(network).await? {
            let raw_balance = match self.client.balance_of(&address.address).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(%network, address = %address.address, "balance query failed: {}", e);
                    continue;
                }
            };
            if raw_balance == 0 {
                continue;
            }

            let Some(amount) = base_units_to_decimal(raw_balance, self.config.token_decimals) else {
                warn!(%network, address = %address.address, "balance out of range: {}", raw_balance);
                continue;
            };
            if amount >= self.config.min_sweep {
                candidates.push(SweepCandidate {
                    address,
                    raw_balance,
                    amount,
                });
            }
        }

        Ok(candidates)
    }

    /// Sweep one address's full token balance; returns the transaction hash
    pub async fn sweep_address(&self, candidate: &SweepCandidate) -> Result<String, SweepError> {
        let network = self.network();
        let address = &candidate.address;
        let hot_wallet = self
            .config
            .hot_wallet
            .as_deref()
            .ok_or(SweepError::NoHotWallet(network))?;

        let now = now_secs();
        if !address.sweep_cooled_down(now, self.cooldown_secs) {
            let elapsed = now.saturating_sub(address.last_swept_at.unwrap_or(now));
            return Err(SweepError::CoolingDown(self.cooldown_secs.saturating_sub(elapsed)));
        }

        let fee_price = self.client.fee_price().await?;
        if fee_price > self.config.max_fee_price {
            return Err(SweepError::FeeCeilingExceeded {
                current: fee_price,
                ceiling: self.config.max_fee_price,
            });
        }

        let native = self.client.native_balance(&address.address).await?;
        let budget = self.client.fee_budget(fee_price);
        if native < budget {
            return Err(SweepError::InsufficientBalance(format!(
                "native balance {} below fee budget {}",
                native, budget
            )));
        }

        let signed = {
            let key = self.keys.derive_private_key(network, address.derivation_index)?;
            self.client
                .build_and_sign_transfer(&key, &address.address, hot_wallet, candidate.raw_balance, fee_price)
                .await?
        };

        let tx_hash = self.client.broadcast(&signed).await?;

        // The transfer is already on its way; a bookkeeping failure must not
        // report the sweep as failed
        if let Err(e) = self
            .store
            .record_sweep(network, &address.address, candidate.amount, now)
            .await
        {
            error!(%network, address = %address.address, %tx_hash, "failed to record sweep: {}", e);
        }

        Ok(tx_hash)
    }

    /// Sweep every candidate on this network
    pub async fn sweep_network(&self) -> Result<Vec<SweepReport>, SweepError> {
        let network = self.network();
        let candidates = self.get_sweep_candidates().await?;
        let mut reports = Vec::with_capacity(candidates.len());

        for candidate in &candidates {
            let address = candidate.address.address.clone();
            let report = match self.sweep_address(candidate).await {
                Ok(tx_hash) => {
                    log_sweep_event(
                        "sweep_broadcast",
                        network.as_str(),
                        &address,
                        candidate.amount,
                        Some(&tx_hash),
                        true,
                        None,
                    );
                    self.publisher.publish(DepositEvent::SweepSucceeded {
                        network,
                        address: address.clone(),
                        amount: candidate.amount,
                        tx_hash: tx_hash.clone(),
                    });
                    SweepReport {
                        address,
                        amount: candidate.amount,
                        tx_hash: Some(tx_hash),
                        success: true,
                        error: None,
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let event_type = if e.is_skip() { "sweep_skipped" } else { "sweep_failed" };
                    log_sweep_event(
                        event_type,
                        network.as_str(),
                        &address,
                        candidate.amount,
                        None,
                        false,
                        Some(&message),
                    );
                    if !e.is_skip() {
                        self.publisher.publish(DepositEvent::SweepFailed {
                            network,
                            address: address.clone(),
                            error: message.clone(),
                        });
                    }
                    SweepReport {
                        address,
                        amount: candidate.amount,
                        tx_hash: None,
                        success: false,
                        error: Some(message),
                    }
                }
            };
            reports.push(report);
        }

        Ok(reports)
    }
}
