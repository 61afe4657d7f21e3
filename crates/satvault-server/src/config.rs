//! Operator configuration.
//!
//! Read from a TOML file with `[server]`, `[bitcoin]` and `[ledger]`
//! sections. `SATVAULT_*` environment variables take precedence over the
//! file, and every omitted field falls back to its default.

use anyhow::{Context, Result};
use bitcoin::Network;
use satvault_ledger::LedgerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub bitcoin: BitcoinSection,

    /// Ledger parameters used when no state file exists yet
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Holds `ledger_state.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// `env_logger` filter, e.g. "info" or "satvault_ledger=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Chain access for inclusion checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinSection {
    #[serde(default = "default_network")]
    pub network: Network,

    #[serde(default = "default_electrum_url")]
    pub electrum_url: String,

    /// How many blocks below the tip an inclusion proof's block may be
    #[serde(default = "default_search_window")]
    pub search_window: u32,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            electrum_url: default_electrum_url(),
            search_window: default_search_window(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_log_level() -> String {
    "info".into()
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_electrum_url() -> String {
    satvault_electrum::default_server(Network::Bitcoin).into()
}

fn default_search_window() -> u32 {
    satvault_electrum::oracle::DEFAULT_SEARCH_WINDOW
}

/// Non-empty value of an environment variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Malformed TOML in {}", path.display()))
    }

    /// Overlay `SATVAULT_DATA_DIR`, `SATVAULT_LOG_LEVEL`, `SATVAULT_NETWORK`,
    /// `SATVAULT_ELECTRUM_URL`, `SATVAULT_LEDGER_ID`, `SATVAULT_OWNER_ID` and
    /// `SATVAULT_N_CONFIRMATION` onto the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = env_var("SATVAULT_DATA_DIR") {
            self.server.data_dir = dir.into();
        }
        if let Some(level) = env_var("SATVAULT_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(network) = env_var("SATVAULT_NETWORK") {
            self.bitcoin.network = Network::from_str(&network)
                .with_context(|| format!("SATVAULT_NETWORK: unknown network {:?}", network))?;
        }
        if let Some(url) = env_var("SATVAULT_ELECTRUM_URL") {
            self.bitcoin.electrum_url = url;
        }
        if let Some(id) = env_var("SATVAULT_LEDGER_ID") {
            self.ledger.ledger_id = id;
        }
        if let Some(owner) = env_var("SATVAULT_OWNER_ID") {
            self.ledger.owner_id = owner;
        }
        if let Some(n) = env_var("SATVAULT_N_CONFIRMATION") {
            self.ledger.n_confirmation = n
                .parse()
                .with_context(|| format!("SATVAULT_N_CONFIRMATION: not a number: {}", n))?;
        }
        Ok(())
    }

    pub fn network(&self) -> Network {
        self.bitcoin.network
    }

    /// Where the ledger snapshot lives.
    pub fn state_path(&self) -> PathBuf {
        self.server.data_dir.join("ledger_state.json")
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.bitcoin.electrum_url.is_empty(),
            "bitcoin.electrum_url must not be empty"
        );
        anyhow::ensure!(
            self.bitcoin.search_window > 0,
            "bitcoin.search_window must be > 0"
        );
        self.ledger.validate().context("Invalid [ledger] section")?;
        Ok(())
    }
}
