//! Key Derivation Module
//!
//! HD derivation of deposit addresses and one-time signing keys from the
//! custody master seed.

pub mod encoding;
pub mod hd;
pub mod secret;

pub use encoding::{is_valid_address, keccak256, parse_address};
pub use hd::KeyDerivationService;
pub use secret::SigningKey;

use thiserror::Error;

/// Key derivation errors
///
/// Messages never include seed or key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("master seed is not configured")]
    MissingSeed,

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),
}
