//! Common Error Types for depositd
//!
//! Per-module errors convert into one root type at the service boundary.

use thiserror::Error;

use crate::chain::ChainError;
use crate::deposit_tracker::{SweepError, TrackerError};
use crate::keys::KeyError;
use crate::storage::StorageError;

/// Root error type for depositd
#[derive(Debug, Error)]
pub enum DepositdError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Key derivation errors
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Upstream chain errors
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sweep errors
    #[error("sweep error: {0}")]
    Sweep(#[from] SweepError),

    /// Pipeline errors
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DepositdError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            DepositdError::Chain(e) => e.is_upstream(),
            DepositdError::Storage(e) => e.is_retryable(),
            DepositdError::Sweep(e) => e.is_skip(),
            DepositdError::Tracker(e) => e.is_retryable(),
            DepositdError::Io(_) => true,
            _ => false,
        }
    }

    /// Stable error code for logs and CLI exit messages
    pub fn error_code(&self) -> &'static str {
        match self {
            DepositdError::Config(_) => "CONFIG_ERROR",
            DepositdError::Logging(_) => "LOGGING_ERROR",
            DepositdError::Key(_) => "KEY_ERROR",
            DepositdError::Chain(_) => "UPSTREAM_ERROR",
            DepositdError::Storage(_) => "STORAGE_ERROR",
            DepositdError::Sweep(_) => "SWEEP_ERROR",
            DepositdError::Tracker(_) => "TRACKER_ERROR",
            DepositdError::Validation(_) => "VALIDATION_ERROR",
            DepositdError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using DepositdError
pub type Result<T> = std::result::Result<T, DepositdError>;
