//! Recovery configuration, parsed from TOML file + environment variable overrides.
//!
//! Priority: command-line flags > environment variables > config file > defaults.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use bitcoin::Network;
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Top-level recovery configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoveryConfig {
    /// Keycard key material
    #[serde(default)]
    pub keys: KeysSection,

    /// Where the funds go
    #[serde(default)]
    pub recovery: RecoverySection,

    /// Bitcoin / Electrum settings
    #[serde(default)]
    pub bitcoin: BitcoinSection,

    #[serde(default)]
    pub log: LogSection,
}

/// Keycard boxes A, B and C, plus the wallet passphrase
///
/// Each key is a plain extended key or keycard ciphertext. Wiped on drop.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeysSection {
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub backup: String,

    #[serde(default)]
    pub bitgo: String,

    /// Needed only when `user` or `backup` is encrypted
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl fmt::Debug for KeysSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeysSection")
            .field("user", &redacted(&self.user))
            .field("backup", &redacted(&self.backup))
            .field("bitgo", &redacted(&self.bitgo))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecoverySection {
    /// Address receiving the swept funds
    #[serde(default)]
    pub destination: String,

    /// Sign but do not broadcast
    #[serde(default)]
    pub dry_run: bool,
}

/// Bitcoin network settings
#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    /// Electrum server URL; the network's default server when unset
    #[serde(default)]
    pub electrum_url: Option<String>,

    /// Electrum socket timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u8,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            electrum_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_timeout() -> u8 {
    keyrescue_electrum::DEFAULT_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl RecoveryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RecoveryConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `KEYRESCUE_USER_KEY`
    /// - `KEYRESCUE_BACKUP_KEY`
    /// - `KEYRESCUE_BITGO_KEY`
    /// - `KEYRESCUE_PASSPHRASE`
    /// - `KEYRESCUE_DESTINATION`
    /// - `KEYRESCUE_NETWORK`
    /// - `KEYRESCUE_ELECTRUM_URL`
    /// - `KEYRESCUE_TIMEOUT_SECS`
    /// - `KEYRESCUE_LOG_LEVEL`
    ///
    /// Returns a message for each variable that was set but ignored. The
    /// logger is not up yet at this point, so the caller reports them.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Ok(v) = std::env::var("KEYRESCUE_USER_KEY") {
            self.keys.user = v;
        }
        if let Ok(v) = std::env::var("KEYRESCUE_BACKUP_KEY") {
            self.keys.backup = v;
        }
        if let Ok(v) = std::env::var("KEYRESCUE_BITGO_KEY") {
            self.keys.bitgo = v;
        }
        if let Ok(v) = std::env::var("KEYRESCUE_PASSPHRASE") {
            self.keys.passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("KEYRESCUE_DESTINATION") {
            self.recovery.destination = v;
        }
        if let Ok(v) = std::env::var("KEYRESCUE_NETWORK") {
            self.bitcoin.network = v;
        }
        if let Ok(v) = std::env::var("KEYRESCUE_ELECTRUM_URL") {
            self.bitcoin.electrum_url = Some(v);
        }
        if let Ok(v) = std::env::var("KEYRESCUE_TIMEOUT_SECS") {
            match v.parse::<u8>() {
                Ok(secs) => self.bitcoin.timeout_secs = secs,
                Err(e) => ignored.push(format!(
                    "Ignoring KEYRESCUE_TIMEOUT_SECS={:?}: {} (expected 1-255)",
                    v, e
                )),
            }
        }
        if let Ok(v) = std::env::var("KEYRESCUE_LOG_LEVEL") {
            self.log.level = v;
        }
        ignored
    }

    /// Parse the bitcoin network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<Network> {
        match self.bitcoin.network.as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => anyhow::bail!("Unknown bitcoin.network: {}", other),
        }
    }

    /// Electrum server to use, falling back to the network's default.
    pub fn electrum_url(&self) -> Result<String> {
        match &self.bitcoin.electrum_url {
            Some(url) if !url.is_empty() => Ok(url.clone()),
            _ => Ok(keyrescue_electrum::default_server(self.network()?).to_string()),
        }
    }

    pub fn passphrase(&self) -> &str {
        self.keys.passphrase.as_deref().unwrap_or("")
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.keys.user.trim().is_empty(), "keys.user must not be empty");
        anyhow::ensure!(
            !self.keys.backup.trim().is_empty(),
            "keys.backup must not be empty"
        );
        anyhow::ensure!(
            !self.keys.bitgo.trim().is_empty(),
            "keys.bitgo must not be empty"
        );
        anyhow::ensure!(
            !self.recovery.destination.trim().is_empty(),
            "recovery.destination must not be empty"
        );
        anyhow::ensure!(
            self.bitcoin.timeout_secs > 0,
            "bitcoin.timeout_secs must be > 0"
        );
        self.network()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
