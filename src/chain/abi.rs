//! Token Contract ABI Helpers
//!
//! ERC-20 and TRC-20 share the Solidity ABI: 4-byte selector followed by
//! 32-byte big-endian words.

use super::{ChainError, ChainResult};
use crate::keys::keccak256;

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Event topic of `Transfer(address,address,uint256)`, 0x-prefixed
pub fn transfer_topic() -> String {
    format!("0x{}", hex::encode(keccak256(b"Transfer(address,address,uint256)")))
}

/// Left-pad a 20-byte account into an ABI word
pub fn address_word(account: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(account);
    word
}

/// Encode an integer as an ABI word
pub fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Arguments of `transfer(to, amount)` without the selector
pub fn transfer_args(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&address_word(to));
    out.extend_from_slice(&uint_word(amount));
    out
}

/// Full call data of `transfer(to, amount)`
pub fn transfer_call(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut out = TRANSFER_SELECTOR.to_vec();
    out.extend(transfer_args(to, amount));
    out
}

/// Full call data of `balanceOf(owner)`
pub fn balance_of_call(owner: &[u8; 20]) -> Vec<u8> {
    let mut out = BALANCE_OF_SELECTOR.to_vec();
    out.extend_from_slice(&address_word(owner));
    out
}

/// Decode a hex-encoded uint256 that must fit in 128 bits
pub fn decode_uint(hex_word: &str) -> ChainResult<u128> {
    let digits = hex_word.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(ChainError::Parse(format!("uint overflows u128: {}", hex_word)));
    }
    u128::from_str_radix(digits, 16).map_err(|e| ChainError::Parse(format!("{}: {}", hex_word, e)))
}

/// Extract the account from an address-typed topic or word
pub fn decode_address_word(hex_word: &str) -> ChainResult<[u8; 20]> {
    let digits = hex_word.trim_start_matches("0x");
    if digits.len() != 64 {
        return Err(ChainError::Parse(format!("bad address word: {}", hex_word)));
    }
    let bytes = hex::decode(&digits[24..]).map_err(|e| ChainError::Parse(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Parse(format!("bad address word: {}", hex_word)))
}
