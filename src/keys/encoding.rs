//! Chain Address Encodings
//!
//! Both families start from the Keccak-256 hash of the uncompressed public
//! key. EVM chains hex-encode the last 20 bytes with the EIP-55 mixed-case
//! checksum; TRON prefixes them with version byte 0x41 and base58check
//! encodes (double SHA-256 checksum).

use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};

use super::KeyError;
use crate::types::{ChainFamily, Network};

/// TRON mainnet address version byte
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 20-byte account hash shared by EVM and TRON addresses
pub fn account_hash(public_key: &PublicKey) -> [u8; 20] {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// EIP-55 checksummed hex address
pub fn evm_checksum_address(account: &[u8; 20]) -> String {
    let lower = hex::encode(account);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Base58check TRON address ("T...")
pub fn tron_address(account: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_ADDRESS_PREFIX);
    payload.extend_from_slice(account);
    bitcoin::base58::encode_check(&payload)
}

/// Encode an account hash for a chain family
pub fn encode_address(family: ChainFamily, account: &[u8; 20]) -> String {
    match family {
        ChainFamily::Evm => evm_checksum_address(account),
        ChainFamily::Tron => tron_address(account),
    }
}

/// Parse a 0x-prefixed (or bare) hex EVM address
pub fn parse_evm_address(address: &str) -> Result<[u8; 20], KeyError> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(stripped)
        .map_err(|e| KeyError::InvalidAddress(format!("{}: {}", address, e)))?;
    bytes
        .try_into()
        .map_err(|_| KeyError::InvalidAddress(format!("{}: expected 20 bytes", address)))
}

/// Parse a base58check TRON address
pub fn parse_tron_address(address: &str) -> Result<[u8; 20], KeyError> {
    let payload = bitcoin::base58::decode_check(address)
        .map_err(|e| KeyError::InvalidAddress(format!("{}: {}", address, e)))?;

    if payload.len() != 21 || payload[0] != TRON_ADDRESS_PREFIX {
        return Err(KeyError::InvalidAddress(format!(
            "{}: not a TRON mainnet address",
            address
        )));
    }

    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[1..]);
    Ok(out)
}

/// Parse an address for the given network into its account hash
pub fn parse_address(network: Network, address: &str) -> Result<[u8; 20], KeyError> {
    match network.family() {
        ChainFamily::Evm => parse_evm_address(address),
        ChainFamily::Tron => parse_tron_address(address),
    }
}

/// Check whether an address is well-formed for a network
pub fn is_valid_address(network: Network, address: &str) -> bool {
    parse_address(network, address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip55_checksum() {
        // Reference vectors from EIP-55
        let account = parse_evm_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            evm_checksum_address(&account),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );

        let account = parse_evm_address("fb6916095ca1df60bb79ce92ce3ea74c37c5d359").unwrap();
        assert_eq!(
            evm_checksum_address(&account),
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"
        );
    }

    #[test]
    fn test_tron_address_round_trip() {
        let account = [0x5au8; 20];
        let address = tron_address(&account);

        assert!(address.starts_with('T'));
        assert_eq!(address.len(), 34);
        assert_eq!(parse_tron_address(&address).unwrap(), account);
    }

    #[test]
    fn test_known_tron_contract_address() {
        // USDT TRC-20 contract
        let account = parse_tron_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").unwrap();
        assert_eq!(
            hex::encode(account),
            "a614f803b6fd780986a42c78ec9c7f77e6ded13c"
        );
    }

    #[test]
    fn test_tron_checksum_is_not_evm_checksum() {
        let mut corrupted = tron_address(&[0x01u8; 20]);
        corrupted.pop();
        corrupted.push('z');
        assert!(parse_tron_address(&corrupted).is_err());
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(
            Network::Eth,
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        ));
        assert!(!is_valid_address(Network::Bsc, "0x1234"));
        assert!(!is_valid_address(
            Network::Tron,
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        ));
    }
}
