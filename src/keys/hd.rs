//! HD Key Derivation Service
//!
//! BIP39 mnemonic → 64-byte seed → BIP32 master → BIP44 account path.
//!
//! - EVM (ETH, BSC): `m/44'/60'/0'/0/{index}`, one address shared by both networks
//! - TRON: `m/44'/195'/0'/0/{index}`
//!
//! Addresses are a pure function of (seed, network, index). Private keys are
//! handed out as [`SigningKey`] and only on the sweep path.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::NetworkKind;
use secp256k1::SECP256K1;
use std::str::FromStr;
use zeroize::Zeroizing;

use super::encoding::{account_hash, encode_address};
use super::secret::SigningKey;
use super::KeyError;
use crate::common::logging::log_security_event;
use crate::types::{ChainFamily, DerivedAddress, Network};

/// Largest non-hardened BIP32 child index
pub const MAX_DERIVATION_INDEX: u32 = (1 << 31) - 1;

/// Stateless derivation from one master seed
pub struct KeyDerivationService {
    seed: Zeroizing<[u8; 64]>,
}

impl KeyDerivationService {
    /// Build from a BIP39 mnemonic phrase and optional passphrase
    ///
    /// An empty phrase is treated as a missing seed.
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, KeyError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(KeyError::MissingSeed);
        }

        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
            .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;

        Ok(Self {
            seed: Zeroizing::new(mnemonic.to_seed(passphrase)),
        })
    }

    /// Build from a raw 64-byte BIP39 seed
    pub fn from_seed(seed: [u8; 64]) -> Self {
        Self {
            seed: Zeroizing::new(seed),
        }
    }

    fn derive_secret(&self, family: ChainFamily, index: u32) -> Result<SigningKey, KeyError> {
        if index > MAX_DERIVATION_INDEX {
            return Err(KeyError::Derivation(format!(
                "index {} out of range",
                index
            )));
        }

        let path = DerivationPath::from_str(&family.derivation_path(index))
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let master = Xpriv::new_master(NetworkKind::Main, &self.seed[..])
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let child = master
            .derive_priv(SECP256K1, &path)
            .map_err(|e| KeyError::Derivation(e.to_string()))?;

        Ok(SigningKey::from_secret(child.private_key))
    }

    /// Derive the receiving address for a network and index
    pub fn derive_address(&self, network: Network, index: u32) -> Result<DerivedAddress, KeyError> {
        let family = network.family();
        let key = self.derive_secret(family, index)?;
        let account = account_hash(&key.public_key());

        Ok(DerivedAddress {
            address: encode_address(family, &account),
            network,
            derivation_path: family.derivation_path(index),
        })
    }

    /// Derive the addresses of every supported network for one index
    ///
    /// The EVM key is derived once and bound to both EVM networks.
    pub fn derive_all_addresses(&self, index: u32) -> Result<Vec<DerivedAddress>, KeyError> {
        let evm = self.derive_address(Network::Eth, index)?;
        let tron = self.derive_address(Network::Tron, index)?;

        Ok(Network::ALL
            .iter()
            .map(|network| match network.family() {
                ChainFamily::Evm => DerivedAddress {
                    network: *network,
                    ..evm.clone()
                },
                ChainFamily::Tron => tron.clone(),
            })
            .collect())
    }

    /// Derive a one-time signing key for a deposit address
    ///
    /// Only the sweep engine calls this. The key must be dropped right after
    /// signing.
    pub fn derive_private_key(&self, network: Network, index: u32) -> Result<SigningKey, KeyError> {
        let key = self.derive_secret(network.family(), index)?;

        log_security_event(
            "signing_key_derived",
            true,
            serde_json::json!({
                "network": network.as_str(),
                "derivation_index": index,
            }),
            None,
        );

        Ok(key)
    }
}

impl std::fmt::Debug for KeyDerivationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyDerivationService(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn service() -> KeyDerivationService {
        KeyDerivationService::from_mnemonic(TEST_MNEMONIC, "").unwrap()
    }

    #[test]
    fn test_known_evm_vector() {
        let derived = service().derive_address(Network::Eth, 0).unwrap();
        assert_eq!(derived.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
        assert_eq!(derived.derivation_path, "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = service();
        let b = service();
        for network in Network::ALL {
            assert_eq!(
                a.derive_address(network, 7).unwrap(),
                b.derive_address(network, 7).unwrap()
            );
        }
    }

    #[test]
    fn test_evm_networks_share_address() {
        let svc = service();
        let eth = svc.derive_address(Network::Eth, 3).unwrap();
        let bsc = svc.derive_address(Network::Bsc, 3).unwrap();
        assert_eq!(eth.address, bsc.address);
        assert_eq!(eth.derivation_path, bsc.derivation_path);
    }

    #[test]
    fn test_distinct_indices_give_distinct_addresses() {
        let svc = service();
        let mut seen = std::collections::HashSet::new();
        for index in 0..20 {
            for derived in svc.derive_all_addresses(index).unwrap() {
                if derived.network != Network::Bsc {
                    assert!(seen.insert(derived.address));
                }
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn test_derive_all_addresses() {
        let all = service().derive_all_addresses(7).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].network, Network::Eth);
        assert_eq!(all[1].network, Network::Bsc);
        assert_eq!(all[2].network, Network::Tron);
        assert_eq!(all[0].address, all[1].address);
        assert_ne!(all[0].address, all[2].address);
        assert!(all[2].address.starts_with('T'));
        assert_eq!(all[2].derivation_path, "m/44'/195'/0'/0/7");
    }

    #[test]
    fn test_private_key_matches_address() {
        let svc = service();
        let key = svc.derive_private_key(Network::Tron, 5).unwrap();
        let address = encode_address(ChainFamily::Tron, &account_hash(&key.public_key()));
        assert_eq!(address, svc.derive_address(Network::Tron, 5).unwrap().address);
    }

    #[test]
    fn test_passphrase_changes_addresses() {
        let plain = service();
        let salted = KeyDerivationService::from_mnemonic(TEST_MNEMONIC, "TREZOR").unwrap();
        assert_ne!(
            plain.derive_address(Network::Eth, 0).unwrap(),
            salted.derive_address(Network::Eth, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_and_invalid_seed() {
        assert!(matches!(
            KeyDerivationService::from_mnemonic("  ", ""),
            Err(KeyError::MissingSeed)
        ));
        assert!(matches!(
            KeyDerivationService::from_mnemonic("not a real mnemonic phrase", ""),
            Err(KeyError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        assert!(service()
            .derive_address(Network::Eth, MAX_DERIVATION_INDEX + 1)
            .is_err());
    }

    #[test]
    fn test_debug_redacts_seed() {
        assert_eq!(format!("{:?}", service()), "KeyDerivationService(<redacted>)");
    }
}
