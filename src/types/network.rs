//! Supported Networks
//!
//! The pipeline watches three chains. Ethereum and BNB Smart Chain share the
//! EVM address space (coin type 60), TRON has its own coin type and address
//! format.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Chain family, selects the client implementation and address encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// Ethereum-compatible JSON-RPC chains
    Evm,
    /// TRON (REST API, base58check addresses)
    Tron,
}

impl ChainFamily {
    /// BIP44 coin type used for derivation
    pub fn coin_type(&self) -> u32 {
        match self {
            ChainFamily::Evm => 60,
            ChainFamily::Tron => 195,
        }
    }

    /// Derivation path for an address index
    pub fn derivation_path(&self, index: u32) -> String {
        format!("m/44'/{}'/0'/0/{}", self.coin_type(), index)
    }
}

/// Network a deposit address lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Ethereum mainnet (ERC-20)
    Eth,
    /// BNB Smart Chain (BEP-20)
    Bsc,
    /// TRON (TRC-20)
    Tron,
}

impl Network {
    /// All supported networks, in scheduling order
    pub const ALL: [Network; 3] = [Network::Eth, Network::Bsc, Network::Tron];

    pub fn family(&self) -> ChainFamily {
        match self {
            Network::Eth | Network::Bsc => ChainFamily::Evm,
            Network::Tron => ChainFamily::Tron,
        }
    }

    /// Confirmations required before an order is credited
    pub fn required_confirmations(&self) -> u64 {
        match self {
            Network::Eth => 12,
            Network::Bsc => 15,
            Network::Tron => 20,
        }
    }

    /// Token standard shown to users
    pub fn token_standard(&self) -> &'static str {
        match self {
            Network::Eth => "ERC20",
            Network::Bsc => "BEP20",
            Network::Tron => "TRC20",
        }
    }

    /// Uppercase key used in environment variable names
    pub fn env_key(&self) -> &'static str {
        match self {
            Network::Eth => "ETH",
            Network::Bsc => "BSC",
            Network::Tron => "TRON",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Eth => "eth",
            Network::Bsc => "bsc",
            Network::Tron => "tron",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eth" | "ethereum" | "erc20" => Ok(Network::Eth),
            "bsc" | "bnb" | "bep20" => Ok(Network::Bsc),
            "tron" | "trx" | "trc20" => Ok(Network::Tron),
            _ => Err(format!("unknown network: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_confirmations() {
        assert_eq!(Network::Eth.required_confirmations(), 12);
        assert_eq!(Network::Bsc.required_confirmations(), 15);
        assert_eq!(Network::Tron.required_confirmations(), 20);
    }

    #[test]
    fn test_evm_networks_share_family() {
        assert_eq!(Network::Eth.family(), Network::Bsc.family());
        assert_ne!(Network::Eth.family(), Network::Tron.family());
        assert_eq!(ChainFamily::Evm.derivation_path(7), "m/44'/60'/0'/0/7");
        assert_eq!(ChainFamily::Tron.derivation_path(7), "m/44'/195'/0'/0/7");
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("ETH".parse::<Network>(), Ok(Network::Eth));
        assert_eq!("bep20".parse::<Network>(), Ok(Network::Bsc));
        assert_eq!("tron".parse::<Network>(), Ok(Network::Tron));
        assert!("solana".parse::<Network>().is_err());
        assert_eq!(Network::Tron.to_string(), "tron");
    }
}
