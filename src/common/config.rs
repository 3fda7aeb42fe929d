//! Environment-based Configuration for the bridge backend
//!
//! Every component receives its own config struct in its constructor; nothing
//! reads the environment after startup.
//!
//! # Environment Variables
//!
//! ## Store
//! - `XBRIDGE_DB_PATH` - SQLite database file (default: "data/xbridge.db")
//! - `XBRIDGE_STORE_TIMEOUT_SECS` - Deadline for a single store call (default: 5)
//!
//! ## Chains
//! - `XBRIDGE_L1_NETWORK_ID` / `XBRIDGE_L2_NETWORK_ID` - Bridge network ids (default: 0 / 1)
//! - `XBRIDGE_L1_RPC` / `XBRIDGE_L2_RPC` - JSON-RPC endpoints
//! - `XBRIDGE_PROOF_API` - Merkle proof service base URL
//! - `XBRIDGE_RPC_TIMEOUT_SECS` - Per-request RPC timeout (default: 10)
//! - `XBRIDGE_ROLLUP_INDEX` - Rollup index used in global indexes (default: 0)
//!
//! ## Claimer
//! - `XBRIDGE_BRIDGE_ADDRESS` - Bridge contract on the destination chain (claimer only)
//! - `XBRIDGE_CLAIMER_ADDRESS` - Account the node signs claims with (claimer only)
//! - `XBRIDGE_CLAIM_POLL_SECS`, `XBRIDGE_CLAIM_CONFIRMATIONS`, `XBRIDGE_RESUBMIT_AFTER_SECS`
//! - `XBRIDGE_GAS_BUMP_PERCENT`, `XBRIDGE_MAX_GAS_PRICE_WEI`
//! - `XBRIDGE_MAX_ATTEMPTS`, `XBRIDGE_MAX_ELAPSED_SECS`
//!
//! ## Readiness / Status / API
//! - `XBRIDGE_READINESS_POLL_SECS`, `XBRIDGE_MIN_READY_AGE_SECS`
//! - `XBRIDGE_L1_CONFIRMATIONS`, `XBRIDGE_L1_ETA_SECS`, `XBRIDGE_L2_ETA_SECS`, `XBRIDGE_EMA_ALPHA`
//! - `XBRIDGE_API_PORT`, `XBRIDGE_DEFAULT_PAGE_LIMIT`, `XBRIDGE_MAX_PAGE_LIMIT`,
//!   `XBRIDGE_RATE_LIMIT_PER_MIN`
//!
//! ## Notifications
//! - `XBRIDGE_PUSH_WEBHOOK_URL` - Optional webhook receiving status pushes
//! - `XBRIDGE_FAKE_PUSH` - Set to "1" to record pushes in memory (debug endpoint)
//!
//! ## Logging
//! - `XBRIDGE_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `XBRIDGE_LOG_JSON` - Set to "1" for JSON output

use alloy_primitives::{Address, U256};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::types::NetworkId;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Ledger store settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: String,
    /// Deadline applied to every store call
    pub call_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "data/xbridge.db".to_string(),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Chain endpoints and network ids
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub l1_network_id: NetworkId,
    pub l2_network_id: NetworkId,
    pub l1_rpc: String,
    pub l2_rpc: String,
    pub proof_api: String,
    pub rpc_timeout: Duration,
    pub rollup_index: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            l1_network_id: 0,
            l2_network_id: 1,
            l1_rpc: "http://localhost:8545".to_string(),
            l2_rpc: "http://localhost:8123".to_string(),
            proof_api: "http://localhost:8080".to_string(),
            rpc_timeout: Duration::from_secs(10),
            rollup_index: 0,
        }
    }
}

/// Readiness tracker settings
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Networks whose latest exit root is re-applied on every poll
    pub networks: Vec<NetworkId>,
    pub poll_interval_secs: u64,
    /// Deposits younger than this are left out of the claimable listing
    pub min_ready_age_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            networks: vec![0, 1],
            poll_interval_secs: 10,
            min_ready_age_secs: 300,
        }
    }
}

/// Claim transaction manager settings
#[derive(Debug, Clone)]
pub struct ClaimTxConfig {
    /// Network id claims are submitted on
    pub dest_network: NetworkId,
    /// Origin network whose deposits are auto-claimed
    pub origin_network: NetworkId,
    pub bridge_address: Address,
    pub claimer_address: Address,
    pub poll_interval_secs: u64,
    /// Receipt depth required before a claim counts as confirmed
    pub required_confirmations: u64,
    /// No receipt for this long triggers a gas bump and rebroadcast
    pub resubmit_after_secs: u64,
    pub gas_bump_percent: u64,
    pub max_gas_price: Option<U256>,
    pub max_attempts: u32,
    pub max_elapsed_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Deposits discovered per tick
    pub batch_size: u32,
    pub rollup_index: u32,
}

impl Default for ClaimTxConfig {
    fn default() -> Self {
        Self {
            dest_network: 1,
            origin_network: 0,
            bridge_address: Address::ZERO,
            claimer_address: Address::ZERO,
            poll_interval_secs: 5,
            required_confirmations: 1,
            resubmit_after_secs: 120,
            gas_bump_percent: 10,
            max_gas_price: None,
            max_attempts: 10,
            max_elapsed_secs: 3600,
            backoff_base_secs: 2,
            backoff_max_secs: 60,
            batch_size: 50,
            rollup_index: 0,
        }
    }
}

/// Status projector settings
#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub l1_network_id: NetworkId,
    /// L1 blocks after which a deposit is shown as being auto-claimed
    pub l1_required_confirmations: u64,
    pub l1_default_eta_secs: u64,
    pub l2_default_eta_secs: u64,
    /// Weight of the newest sample in the smoothed durations
    pub ema_alpha: f64,
    pub progress_poll_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            l1_network_id: 0,
            l1_required_confirmations: 64,
            l1_default_eta_secs: 15 * 60,
            l2_default_eta_secs: 60 * 60,
            ema_alpha: 0.2,
            progress_poll_secs: 15,
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub rate_limit_per_min: u32,
    pub rollup_index: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            default_page_limit: 25,
            max_page_limit: 100,
            rate_limit_per_min: 120,
            rollup_index: 0,
        }
    }
}

/// Notification dispatch settings
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub fake_push: bool,
}

/// Main configuration struct
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub readiness: ReadinessConfig,
    pub claim: ClaimTxConfig,
    pub status: StatusConfig,
    pub api: ApiConfig,
    pub notify: NotifyConfig,
    pub log_level: String,
    pub log_json: bool,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig {
            db_path: env::var("XBRIDGE_DB_PATH")
                .unwrap_or_else(|_| StoreConfig::default().db_path),
            call_timeout: Duration::from_secs(parse_or("XBRIDGE_STORE_TIMEOUT_SECS", 5)?),
        };

        let chain_defaults = ChainConfig::default();
        let chain = ChainConfig {
            l1_network_id: parse_or("XBRIDGE_L1_NETWORK_ID", 0)?,
            l2_network_id: parse_or("XBRIDGE_L2_NETWORK_ID", 1)?,
            l1_rpc: env::var("XBRIDGE_L1_RPC").unwrap_or(chain_defaults.l1_rpc),
            l2_rpc: env::var("XBRIDGE_L2_RPC").unwrap_or(chain_defaults.l2_rpc),
            proof_api: env::var("XBRIDGE_PROOF_API").unwrap_or(chain_defaults.proof_api),
            rpc_timeout: Duration::from_secs(parse_or("XBRIDGE_RPC_TIMEOUT_SECS", 10)?),
            rollup_index: parse_or("XBRIDGE_ROLLUP_INDEX", 0)?,
        };

        let readiness = ReadinessConfig {
            networks: vec![chain.l1_network_id, chain.l2_network_id],
            poll_interval_secs: parse_or("XBRIDGE_READINESS_POLL_SECS", 10)?,
            min_ready_age_secs: parse_or("XBRIDGE_MIN_READY_AGE_SECS", 300)?,
        };

        let claim_defaults = ClaimTxConfig::default();
        let claim = ClaimTxConfig {
            dest_network: chain.l2_network_id,
            origin_network: chain.l1_network_id,
            bridge_address: parse_opt("XBRIDGE_BRIDGE_ADDRESS")?.unwrap_or(Address::ZERO),
            claimer_address: parse_opt("XBRIDGE_CLAIMER_ADDRESS")?.unwrap_or(Address::ZERO),
            poll_interval_secs: parse_or("XBRIDGE_CLAIM_POLL_SECS", claim_defaults.poll_interval_secs)?,
            required_confirmations: parse_or(
                "XBRIDGE_CLAIM_CONFIRMATIONS",
                claim_defaults.required_confirmations,
            )?,
            resubmit_after_secs: parse_or(
                "XBRIDGE_RESUBMIT_AFTER_SECS",
                claim_defaults.resubmit_after_secs,
            )?,
            gas_bump_percent: parse_or("XBRIDGE_GAS_BUMP_PERCENT", claim_defaults.gas_bump_percent)?,
            max_gas_price: parse_opt("XBRIDGE_MAX_GAS_PRICE_WEI")?,
            max_attempts: parse_or("XBRIDGE_MAX_ATTEMPTS", claim_defaults.max_attempts)?,
            max_elapsed_secs: parse_or("XBRIDGE_MAX_ELAPSED_SECS", claim_defaults.max_elapsed_secs)?,
            rollup_index: chain.rollup_index,
            ..claim_defaults
        };

        let status_defaults = StatusConfig::default();
        let status = StatusConfig {
            l1_network_id: chain.l1_network_id,
            l1_required_confirmations: parse_or(
                "XBRIDGE_L1_CONFIRMATIONS",
                status_defaults.l1_required_confirmations,
            )?,
            l1_default_eta_secs: parse_or("XBRIDGE_L1_ETA_SECS", status_defaults.l1_default_eta_secs)?,
            l2_default_eta_secs: parse_or("XBRIDGE_L2_ETA_SECS", status_defaults.l2_default_eta_secs)?,
            ema_alpha: parse_or("XBRIDGE_EMA_ALPHA", status_defaults.ema_alpha)?,
            ..status_defaults
        };
        if !(status.ema_alpha > 0.0 && status.ema_alpha <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "XBRIDGE_EMA_ALPHA".to_string(),
                "must be in (0, 1]".to_string(),
            ));
        }

        let api_defaults = ApiConfig::default();
        let api = ApiConfig {
            port: parse_or("XBRIDGE_API_PORT", api_defaults.port)?,
            default_page_limit: parse_or("XBRIDGE_DEFAULT_PAGE_LIMIT", api_defaults.default_page_limit)?,
            max_page_limit: parse_or("XBRIDGE_MAX_PAGE_LIMIT", api_defaults.max_page_limit)?,
            rate_limit_per_min: parse_or("XBRIDGE_RATE_LIMIT_PER_MIN", api_defaults.rate_limit_per_min)?,
            rollup_index: chain.rollup_index,
        };
        if api.default_page_limit == 0 || api.default_page_limit > api.max_page_limit {
            return Err(ConfigError::InvalidValue(
                "XBRIDGE_DEFAULT_PAGE_LIMIT".to_string(),
                "must be between 1 and XBRIDGE_MAX_PAGE_LIMIT".to_string(),
            ));
        }

        let notify = NotifyConfig {
            webhook_url: env::var("XBRIDGE_PUSH_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
            fake_push: env::var("XBRIDGE_FAKE_PUSH").map(|v| v == "1").unwrap_or(false),
        };

        let log_level = env::var("XBRIDGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("XBRIDGE_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            store,
            chain,
            readiness,
            claim,
            status,
            api,
            notify,
            log_level,
            log_json,
        })
    }

    /// Check the settings the claimer cannot run without
    pub fn validate_for_claimer(&self) -> Result<(), ConfigError> {
        if self.claim.bridge_address == Address::ZERO {
            return Err(ConfigError::MissingEnvVar("XBRIDGE_BRIDGE_ADDRESS".to_string()));
        }
        if self.claim.claimer_address == Address::ZERO {
            return Err(ConfigError::MissingEnvVar("XBRIDGE_CLAIMER_ADDRESS".to_string()));
        }
        if self.claim.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "XBRIDGE_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== xbridge Configuration ===");
        println!("Database: {}", self.store.db_path);
        println!(
            "Networks: L1={} L2={}",
            self.chain.l1_network_id, self.chain.l2_network_id
        );
        println!("L1 RPC: {}", self.chain.l1_rpc);
        println!("L2 RPC: {}", self.chain.l2_rpc);
        println!("Proof API: {}", self.chain.proof_api);
        println!("Bridge: {}", self.claim.bridge_address);
        println!("Claimer: {}", self.claim.claimer_address);
        println!(
            "Claim confirmations: {} (resubmit after {}s, bump {}%)",
            self.claim.required_confirmations,
            self.claim.resubmit_after_secs,
            self.claim.gas_bump_percent
        );
        println!("L1 confirmations for auto-claim: {}", self.status.l1_required_confirmations);
        println!("API Port: {}", self.api.port);
        println!(
            "Push: webhook={} fake={}",
            self.notify.webhook_url.is_some(),
            self.notify.fake_push
        );
        println!("Log Level: {}", self.log_level);
        println!("=============================");
    }
}

/// Parse an env var, falling back to `default` when unset
fn parse_or<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match parse_opt(var_name)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// Parse an optional env var; set-but-unparseable is an error
fn parse_opt<T: FromStr>(var_name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var_name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helpers() {
        env::set_var("XBRIDGE_TEST_PARSE_NUM", "42");
        env::set_var("XBRIDGE_TEST_PARSE_BAD", "forty-two");
        env::set_var("XBRIDGE_TEST_PARSE_ADDR", "0x2a3DD3EB832aF982ec71669E178424b10Dca2EDe");

        assert_eq!(parse_or::<u64>("XBRIDGE_TEST_PARSE_NUM", 1).unwrap(), 42);
        assert_eq!(parse_or::<u64>("XBRIDGE_TEST_PARSE_UNSET", 7).unwrap(), 7);
        assert!(parse_or::<u64>("XBRIDGE_TEST_PARSE_BAD", 1).is_err());

        let addr: Option<Address> = parse_opt("XBRIDGE_TEST_PARSE_ADDR").unwrap();
        assert!(addr.is_some());
    }

    #[test]
    fn test_claimer_requires_addresses() {
        let config = BridgeConfig::default();
        assert!(matches!(
            config.validate_for_claimer(),
            Err(ConfigError::MissingEnvVar(_))
        ));

        let mut config = BridgeConfig::default();
        config.claim.bridge_address = Address::repeat_byte(0x11);
        config.claim.claimer_address = Address::repeat_byte(0x22);
        assert!(config.validate_for_claimer().is_ok());
    }

    #[test]
    fn test_defaults_are_consistent() {
        let api = ApiConfig::default();
        assert!(api.default_page_limit <= api.max_page_limit);

        let status = StatusConfig::default();
        assert!(status.ema_alpha > 0.0 && status.ema_alpha <= 1.0);
    }
}
