//! Runtime configuration: storage DSN,
//! network selection, chain-service timeouts, monitor task intervals, and
//! the façade's TTL/retention windows. Loaded from an optional TOML file
//! overlaid with environment variables, the way `common::env` /
//! `common::cli` load the node's configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// `get_network({})`'s wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Self::Testnet
    }
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => bail!("invalid network '{other}', expected mainnet or testnet"),
        }
    }
}

/// `WalletToolboxConfig`: the ambient settings a
/// production deployment needs beyond the pure-algorithm crates below it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletToolboxConfig {
    /// Path to the sqlite database, or `":memory:"` for an ephemeral one.
    pub storage_dsn: String,
    pub network: Network,
    /// Default 30s.
    pub chain_service_timeout_secs: u64,
    pub monitor_clock_interval_secs: u64,
    pub monitor_send_waiting_interval_secs: u64,
    pub monitor_check_for_proofs_interval_secs: u64,
    /// Default 120s.
    pub privileged_key_retention_secs: u64,
    /// Default 300s.
    pub pending_sign_action_ttl_secs: u64,
    /// Default 5 minutes.
    pub wait_for_authentication_timeout_secs: u64,
    /// The originator string the identity manager's UMP token publisher
    /// treats as a no-op during development, when no chain publisher is
    /// configured.
    pub storage_rpc_url: Option<String>,
}

impl Default for WalletToolboxConfig {
    fn default() -> Self {
        Self {
            storage_dsn: "wallet-toolbox.sqlite".to_string(),
            network: Network::default(),
            chain_service_timeout_secs: 30,
            monitor_clock_interval_secs: 60,
            monitor_send_waiting_interval_secs: 8,
            monitor_check_for_proofs_interval_secs: 60,
            privileged_key_retention_secs: 120,
            pending_sign_action_ttl_secs: 300,
            wait_for_authentication_timeout_secs: 300,
            storage_rpc_url: None,
        }
    }
}

impl WalletToolboxConfig {
    pub fn chain_service_timeout(&self) -> Duration {
        Duration::from_secs(self.chain_service_timeout_secs)
    }

    pub fn pending_sign_action_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_sign_action_ttl_secs)
    }

    pub fn privileged_key_retention(&self) -> Duration {
        Duration::from_secs(self.privileged_key_retention_secs)
    }

    pub fn wait_for_authentication_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_for_authentication_timeout_secs)
    }

    /// Loads defaults, overlays an optional TOML file, then overlays
    /// whitelisted environment variables (highest priority), mirroring the
    /// layering `common::env`/`common::dotenv` apply to the node's config.
    pub fn load(toml_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match toml_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file at {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file at {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(dsn) = env::var("WALLET_TOOLBOX_STORAGE_DSN") {
            config.storage_dsn = dsn;
        }
        if let Ok(network) = env::var("WALLET_TOOLBOX_NETWORK") {
            config.network = Network::parse(&network).context("WALLET_TOOLBOX_NETWORK")?;
        }
        if let Ok(url) = env::var("WALLET_TOOLBOX_STORAGE_RPC_URL") {
            config.storage_rpc_url = Some(url);
        }
        if let Ok(secs) = env::var("WALLET_TOOLBOX_CHAIN_SERVICE_TIMEOUT_SECS") {
            config.chain_service_timeout_secs =
                secs.parse().context("WALLET_TOOLBOX_CHAIN_SERVICE_TIMEOUT_SECS must be an integer")?;
        }

        Ok(config)
    }
}
