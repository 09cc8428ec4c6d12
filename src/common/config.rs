//! Environment-based Configuration for depositd
//!
//! Secrets (the custody mnemonic) MUST come from the environment, never from
//! files checked into the repository. A `.env` file is honoured for local
//! development.
//!
//! # Required Environment Variables
//!
//! - `DEPOSITD_MNEMONIC` - BIP39 custody mnemonic
//! - `DEPOSITD_ETH_RPC`, `DEPOSITD_BSC_RPC` - EVM JSON-RPC endpoints
//! - `DEPOSITD_TRON_RPC` - TronGrid-compatible REST endpoint
//! - `DEPOSITD_<NET>_HOT_WALLET` - sweep destination (only when sweeping is enabled)
//!
//! ## Optional Settings
//! - `DEPOSITD_MNEMONIC_PASSPHRASE` - BIP39 passphrase
//! - `DEPOSITD_DB_PATH` - SQLite path (default: `data/depositd.db`)
//! - `DEPOSITD_<NET>_TOKEN`, `DEPOSITD_<NET>_DECIMALS` - token contract (default: USDT)
//! - `DEPOSITD_<NET>_MIN_SWEEP` - sweep threshold in token units
//! - `DEPOSITD_<NET>_MAX_FEE_PRICE` - fee ceiling (wei/gas or sun/energy)
//! - `DEPOSITD_<NET>_MIN_DEPOSIT` - dust threshold in token units
//! - `DEPOSITD_ETH_CHAIN_ID`, `DEPOSITD_BSC_CHAIN_ID`, `DEPOSITD_TRON_API_KEY`
//! - `DEPOSITD_SCAN_INTERVAL_SECS`, `DEPOSITD_CONFIRM_INTERVAL_SECS`, `DEPOSITD_SWEEP_INTERVAL_SECS`
//! - `DEPOSITD_SWEEP_ENABLED`, `DEPOSITD_SWEEP_COOLDOWN_SECS`
//! - `DEPOSITD_RPC_TIMEOUT_SECS`, `DEPOSITD_EVM_MAX_BLOCK_RANGE`, `DEPOSITD_EVM_ADDRESS_BATCH`
//! - `DEPOSITD_TRON_HISTORY_LIMIT`, `DEPOSITD_EVM_GAS_LIMIT`, `DEPOSITD_TRON_FEE_LIMIT`
//! - `DEPOSITD_ORDER_EXPIRY_SECS`, `DEPOSITD_DEPOSIT_FEE_RATE`
//! - `DEPOSITD_LOG_LEVEL`, `DEPOSITD_LOG_JSON`

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::keys::is_valid_address;
use crate::types::Network;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Per-network settings
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,

    /// JSON-RPC (EVM) or REST (TRON) endpoint
    pub rpc_url: String,

    /// Token contract watched for deposits
    pub token_contract: String,

    /// Token decimal precision
    pub token_decimals: u32,

    /// Sweep destination
    pub hot_wallet: Option<String>,

    /// Minimum on-chain balance worth sweeping, in token units
    pub min_sweep: Decimal,

    /// Fee price ceiling in the chain's native unit (wei/gas, sun/energy)
    pub max_fee_price: u128,

    /// Transfers below this amount are ignored
    pub min_deposit: Decimal,

    /// EIP-155 chain id (EVM only)
    pub chain_id: Option<u64>,
}

/// Cycle scheduling
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub scan_interval_secs: u64,
    pub confirm_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_enabled: bool,
    /// Minimum time between two sweeps of the same address
    pub sweep_cooldown_secs: u64,
}

/// Upstream client tuning
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub rpc_timeout_secs: u64,
    /// Maximum block span per `eth_getLogs` call
    pub evm_max_block_range: u64,
    /// Maximum addresses per `eth_getLogs` topic filter
    pub evm_address_batch: usize,
    /// Transfers fetched per address per TRON scan
    pub tron_history_limit: u32,
    pub evm_gas_limit: u64,
    /// Fee limit attached to TRON contract calls, in sun
    pub tron_fee_limit: u64,
    pub tron_api_key: Option<String>,
}

/// Main configuration struct
#[derive(Clone)]
pub struct DepositdConfig {
    /// Custody mnemonic (never printed)
    pub mnemonic: String,

    pub mnemonic_passphrase: String,

    /// SQLite database path
    pub db_path: String,

    pub networks: BTreeMap<Network, NetworkConfig>,

    pub schedule: ScheduleConfig,

    pub upstream: UpstreamConfig,

    /// Orders whose transaction is still unknown after this long expire
    pub order_expiry_secs: u64,

    /// Fraction of each deposit kept as a fee
    pub deposit_fee_rate: Decimal,

    /// Balance currency credited for deposits on every network
    pub currency: String,

    pub log_level: String,

    pub log_json: bool,
}

impl DepositdConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let mnemonic = vars
            .get("DEPOSITD_MNEMONIC")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DEPOSITD_MNEMONIC".to_string()))?;
        let mnemonic_passphrase = vars.get("DEPOSITD_MNEMONIC_PASSPHRASE").unwrap_or_default();
        let db_path = vars
            .get("DEPOSITD_DB_PATH")
            .unwrap_or_else(|| "data/depositd.db".to_string());

        let schedule = ScheduleConfig {
            scan_interval_secs: vars.parse_or("DEPOSITD_SCAN_INTERVAL_SECS", 15)?,
            confirm_interval_secs: vars.parse_or("DEPOSITD_CONFIRM_INTERVAL_SECS", 30)?,
            sweep_interval_secs: vars.parse_or("DEPOSITD_SWEEP_INTERVAL_SECS", 3600)?,
            sweep_enabled: vars.flag("DEPOSITD_SWEEP_ENABLED", true),
            sweep_cooldown_secs: vars.parse_or("DEPOSITD_SWEEP_COOLDOWN_SECS", 600)?,
        };

        let upstream = UpstreamConfig {
            rpc_timeout_secs: vars.parse_or("DEPOSITD_RPC_TIMEOUT_SECS", 10)?,
            evm_max_block_range: vars.parse_or("DEPOSITD_EVM_MAX_BLOCK_RANGE", 2000)?,
            evm_address_batch: vars.parse_or("DEPOSITD_EVM_ADDRESS_BATCH", 500)?,
            tron_history_limit: vars.parse_or("DEPOSITD_TRON_HISTORY_LIMIT", 50)?,
            evm_gas_limit: vars.parse_or("DEPOSITD_EVM_GAS_LIMIT", 100_000)?,
            tron_fee_limit: vars.parse_or("DEPOSITD_TRON_FEE_LIMIT", 30_000_000)?,
            tron_api_key: vars.get("DEPOSITD_TRON_API_KEY"),
        };

        if upstream.evm_max_block_range == 0 || upstream.evm_address_batch == 0 {
            return Err(ConfigError::InvalidValue(
                "DEPOSITD_EVM_MAX_BLOCK_RANGE / DEPOSITD_EVM_ADDRESS_BATCH".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let mut networks = BTreeMap::new();
        for network in Network::ALL {
            networks.insert(network, load_network(&vars, network, schedule.sweep_enabled)?);
        }

        let deposit_fee_rate: Decimal = vars.parse_or("DEPOSITD_DEPOSIT_FEE_RATE", Decimal::ZERO)?;
        if deposit_fee_rate < Decimal::ZERO || deposit_fee_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidValue(
                "DEPOSITD_DEPOSIT_FEE_RATE".to_string(),
                "must be in [0, 1)".to_string(),
            ));
        }

        Ok(Self {
            mnemonic,
            mnemonic_passphrase,
            db_path,
            networks,
            schedule,
            upstream,
            order_expiry_secs: vars.parse_or("DEPOSITD_ORDER_EXPIRY_SECS", 86_400)?,
            deposit_fee_rate,
            currency: vars
                .get("DEPOSITD_CURRENCY")
                .unwrap_or_else(|| "USDT".to_string()),
            log_level: vars
                .get("DEPOSITD_LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
            log_json: vars.flag("DEPOSITD_LOG_JSON", false),
        })
    }

    /// Settings for one network
    pub fn network(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks.get(&network)
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== depositd Configuration ===");
        println!("Mnemonic: <redacted>");
        println!("Database: {}", self.db_path);
        for cfg in self.networks.values() {
            println!(
                "[{}] rpc={} token={} decimals={} hot_wallet={} min_sweep={} max_fee_price={}",
                cfg.network,
                cfg.rpc_url,
                cfg.token_contract,
                cfg.token_decimals,
                cfg.hot_wallet.as_deref().unwrap_or("-"),
                cfg.min_sweep,
                cfg.max_fee_price,
            );
        }
        println!(
            "Intervals: scan={}s confirm={}s sweep={}s (sweep {})",
            self.schedule.scan_interval_secs,
            self.schedule.confirm_interval_secs,
            self.schedule.sweep_interval_secs,
            if self.schedule.sweep_enabled { "enabled" } else { "disabled" },
        );
        println!("Order Expiry: {}s", self.order_expiry_secs);
        println!("Deposit Fee Rate: {}", self.deposit_fee_rate);
        println!("Currency: {}", self.currency);
        println!("Log Level: {}", self.log_level);
        println!("==============================");
    }
}

impl std::fmt::Debug for DepositdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositdConfig")
            .field("mnemonic", &"<redacted>")
            .field("db_path", &self.db_path)
            .field("networks", &self.networks)
            .field("schedule", &self.schedule)
            .field("upstream", &self.upstream)
            .field("order_expiry_secs", &self.order_expiry_secs)
            .field("deposit_fee_rate", &self.deposit_fee_rate)
            .field("currency", &self.currency)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .finish()
    }
}

/// Mainnet USDT contract and decimals
fn default_token(network: Network) -> (&'static str, u32) {
    match network {
        Network::Eth => ("0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
        Network::Bsc => ("0x55d398326f99059fF775485246999027B3197955", 18),
        Network::Tron => ("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", 6),
    }
}

fn default_min_sweep(network: Network) -> Decimal {
    match network {
        Network::Eth => Decimal::from(50),
        Network::Bsc => Decimal::from(10),
        Network::Tron => Decimal::from(20),
    }
}

fn default_max_fee_price(network: Network) -> u128 {
    match network {
        Network::Eth => 100_000_000_000, // 100 gwei
        Network::Bsc => 10_000_000_000,  // 10 gwei
        Network::Tron => 1_000,          // sun per energy
    }
}

fn load_network<F>(vars: &Vars<F>, network: Network, sweep_enabled: bool) -> Result<NetworkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |suffix: &str| format!("DEPOSITD_{}_{}", network.env_key(), suffix);

    let rpc_url = vars
        .get(&key("RPC"))
        .ok_or_else(|| ConfigError::MissingEnvVar(key("RPC")))?;

    let (default_contract, default_decimals) = default_token(network);
    let token_contract = vars
        .get(&key("TOKEN"))
        .unwrap_or_else(|| default_contract.to_string());
    if !is_valid_address(network, &token_contract) {
        return Err(ConfigError::InvalidValue(key("TOKEN"), token_contract));
    }

    let hot_wallet = vars.get(&key("HOT_WALLET"));
    match &hot_wallet {
        Some(addr) if !is_valid_address(network, addr) => {
            return Err(ConfigError::InvalidValue(key("HOT_WALLET"), addr.clone()));
        }
        None if sweep_enabled => return Err(ConfigError::MissingEnvVar(key("HOT_WALLET"))),
        _ => {}
    }

    let chain_id = match network {
        Network::Eth => Some(vars.parse_or(&key("CHAIN_ID"), 1)?),
        Network::Bsc => Some(vars.parse_or(&key("CHAIN_ID"), 56)?),
        Network::Tron => None,
    };

    Ok(NetworkConfig {
        network,
        rpc_url,
        token_contract,
        token_decimals: vars.parse_or(&key("DECIMALS"), default_decimals)?,
        hot_wallet,
        min_sweep: vars.parse_or(&key("MIN_SWEEP"), default_min_sweep(network))?,
        max_fee_price: vars.parse_or(&key("MAX_FEE_PRICE"), default_max_fee_price(network))?,
        min_deposit: vars.parse_or(&key("MIN_DEPOSIT"), Decimal::ZERO)?,
        chain_id,
    })
}

/// Typed access to a key lookup
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string(), value)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HOT_EVM: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const HOT_TRON: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn base_vars() -> HashMap<String, String> {
        [
            ("DEPOSITD_MNEMONIC", "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"),
            ("DEPOSITD_ETH_RPC", "http://eth.local"),
            ("DEPOSITD_BSC_RPC", "http://bsc.local"),
            ("DEPOSITD_TRON_RPC", "http://tron.local"),
            ("DEPOSITD_ETH_HOT_WALLET", HOT_EVM),
            ("DEPOSITD_BSC_HOT_WALLET", HOT_EVM),
            ("DEPOSITD_TRON_HOT_WALLET", HOT_TRON),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn load(vars: &HashMap<String, String>) -> Result<DepositdConfig, ConfigError> {
        DepositdConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();

        assert_eq!(config.db_path, "data/depositd.db");
        assert_eq!(config.schedule.scan_interval_secs, 15);
        assert_eq!(config.upstream.evm_max_block_range, 2000);
        assert_eq!(config.network(Network::Eth).unwrap().min_sweep, Decimal::from(50));
        assert_eq!(config.network(Network::Bsc).unwrap().chain_id, Some(56));
        assert_eq!(config.network(Network::Bsc).unwrap().token_decimals, 18);
        assert_eq!(config.network(Network::Tron).unwrap().chain_id, None);
        assert_eq!(config.deposit_fee_rate, Decimal::ZERO);
    }

    #[test]
    fn test_missing_mnemonic_is_fatal() {
        let mut vars = base_vars();
        vars.remove("DEPOSITD_MNEMONIC");
        assert!(matches!(load(&vars), Err(ConfigError::MissingEnvVar(k)) if k == "DEPOSITD_MNEMONIC"));
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        let mut vars = base_vars();
        vars.remove("DEPOSITD_TRON_RPC");
        assert!(matches!(load(&vars), Err(ConfigError::MissingEnvVar(k)) if k == "DEPOSITD_TRON_RPC"));
    }

    #[test]
    fn test_hot_wallet_required_only_when_sweeping() {
        let mut vars = base_vars();
        vars.remove("DEPOSITD_BSC_HOT_WALLET");
        assert!(load(&vars).is_err());

        vars.insert("DEPOSITD_SWEEP_ENABLED".to_string(), "0".to_string());
        let config = load(&vars).unwrap();
        assert!(config.network(Network::Bsc).unwrap().hot_wallet.is_none());
    }

    #[test]
    fn test_hot_wallet_must_match_network() {
        let mut vars = base_vars();
        vars.insert("DEPOSITD_TRON_HOT_WALLET".to_string(), HOT_EVM.to_string());
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue(_, _))));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let mut vars = base_vars();
        vars.insert("DEPOSITD_ETH_MIN_SWEEP".to_string(), "lots".to_string());
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue(k, _)) if k == "DEPOSITD_ETH_MIN_SWEEP"));

        let mut vars = base_vars();
        vars.insert("DEPOSITD_DEPOSIT_FEE_RATE".to_string(), "1.5".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_debug_redacts_mnemonic() {
        let config = load(&base_vars()).unwrap();
        let printed = format!("{:?}", config);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("abandon"));
    }
}
