//! Node configuration.
//!
//! Configuration is read from a TOML file. Every section is optional and
//! falls back to its defaults:
//!
//! | Section | Description |
//! |---------|-------------|
//! | `network` | Network passphrase |
//! | `herder` | Close-time slip, tx-set cache and consensus timeouts |
//! | `ledger` | Checkpoint frequency, buffer bound and database path |
//! | `catchup` | Operator overrides for catchup |
//! | `logging` | Log level and format |
//!
//! ```toml
//! [network]
//! passphrase = "Test SDF Network ; September 2015"
//!
//! [herder]
//! max_time_slip_seconds = 60
//!
//! [ledger]
//! database_path = "/var/lib/sluice/sluice.db"
//! ```
//!
//! # Environment Overrides
//!
//! - `SLUICE_NETWORK_PASSPHRASE` - Network passphrase
//! - `SLUICE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `SLUICE_LOG_FORMAT` - Log format (text, json)
//! - `SLUICE_DATABASE_PATH` - Database file path

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_common::checkpoint::{max_ledgers_before_trigger, CHECKPOINT_FREQUENCY};
use sluice_common::NetworkId;
use sluice_herder::ScpDriverConfig;
use sluice_ledger::{LedgerManagerConfig, StateMachineConfig, DEFAULT_MAX_BUFFERED_LEDGERS};

use crate::logging::{LogConfig, LogFormat};

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub herder: HerderConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub catchup: CatchupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_passphrase")]
    pub passphrase: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            passphrase: default_passphrase(),
        }
    }
}

/// Consensus-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HerderConfig {
    /// How far ahead of the local clock a proposed close time may be.
    #[serde(default = "default_max_time_slip_seconds")]
    pub max_time_slip_seconds: u64,

    #[serde(default = "default_max_tx_set_cache")]
    pub max_tx_set_cache: usize,

    #[serde(default = "default_timeout_base_ms")]
    pub nomination_timeout_base_ms: u64,

    #[serde(default = "default_timeout_base_ms")]
    pub ballot_timeout_base_ms: u64,

    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
}

impl Default for HerderConfig {
    fn default() -> Self {
        Self {
            max_time_slip_seconds: default_max_time_slip_seconds(),
            max_tx_set_cache: default_max_tx_set_cache(),
            nomination_timeout_base_ms: default_timeout_base_ms(),
            ballot_timeout_base_ms: default_timeout_base_ms(),
            max_timeout_seconds: default_max_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_checkpoint_frequency")]
    pub checkpoint_frequency: u32,

    #[serde(default = "default_max_buffered_ledgers")]
    pub max_buffered_ledgers: usize,

    /// SQLite database file. Absent means an in-memory database.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            checkpoint_frequency: default_checkpoint_frequency(),
            max_buffered_ledgers: default_max_buffered_ledgers(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatchupConfig {
    /// Adopt catchup boundaries without checking them against buffered
    /// ledgers.
    #[serde(default)]
    pub manual_skip_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        let format = match self.format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
        LogConfig {
            format,
            ansi_colors: format == LogFormat::Text,
            ..LogConfig::default()
        }
        .with_level(&self.level)
    }
}

fn default_passphrase() -> String {
    NetworkId::TESTNET_PASSPHRASE.to_string()
}

fn default_max_time_slip_seconds() -> u64 {
    60
}

fn default_max_tx_set_cache() -> usize {
    100
}

fn default_timeout_base_ms() -> u64 {
    1000
}

fn default_max_timeout_seconds() -> u64 {
    1800
}

fn default_checkpoint_frequency() -> u32 {
    CHECKPOINT_FREQUENCY
}

fn default_max_buffered_ledgers() -> usize {
    DEFAULT_MAX_BUFFERED_LEDGERS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment
    /// overrides.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SLUICE_NETWORK_PASSPHRASE") {
            self.network.passphrase = val;
        }
        if let Ok(val) = std::env::var("SLUICE_DATABASE_PATH") {
            self.ledger.database_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("SLUICE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SLUICE_LOG_FORMAT") {
            self.logging.format = val;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.passphrase.trim().is_empty() {
            anyhow::bail!("network.passphrase must not be empty");
        }
        if self.herder.max_time_slip_seconds == 0 {
            anyhow::bail!("herder.max_time_slip_seconds must be > 0");
        }
        if self.herder.max_tx_set_cache == 0 {
            anyhow::bail!("herder.max_tx_set_cache must be > 0");
        }
        if self.ledger.checkpoint_frequency < 2 {
            anyhow::bail!(
                "ledger.checkpoint_frequency must be at least 2, got {}",
                self.ledger.checkpoint_frequency
            );
        }
        let needed = max_ledgers_before_trigger(self.ledger.checkpoint_frequency) as usize + 1;
        if self.ledger.max_buffered_ledgers < needed {
            anyhow::bail!(
                "ledger.max_buffered_ledgers must be at least {needed} for checkpoint frequency {}, got {}",
                self.ledger.checkpoint_frequency,
                self.ledger.max_buffered_ledgers
            );
        }
        if !matches!(self.logging.format.to_lowercase().as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            );
        }
        if self.catchup.manual_skip_verification {
            tracing::warn!("Catchup boundaries will be adopted without verification");
        }
        Ok(())
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId::from_passphrase(&self.network.passphrase)
    }

    pub fn scp_driver_config(&self) -> ScpDriverConfig {
        ScpDriverConfig {
            max_time_slip_seconds: self.herder.max_time_slip_seconds,
            max_tx_set_cache: self.herder.max_tx_set_cache,
            nomination_timeout_base: Duration::from_millis(self.herder.nomination_timeout_base_ms),
            ballot_timeout_base: Duration::from_millis(self.herder.ballot_timeout_base_ms),
            max_timeout: Duration::from_secs(self.herder.max_timeout_seconds),
        }
    }

    pub fn state_machine_config(&self) -> StateMachineConfig {
        StateMachineConfig {
            max_buffered_ledgers: self.ledger.max_buffered_ledgers,
            skip_verification: self.catchup.manual_skip_verification,
        }
    }

    pub fn ledger_manager_config(&self) -> LedgerManagerConfig {
        LedgerManagerConfig {
            checkpoint_frequency: self.ledger.checkpoint_frequency,
            ..LedgerManagerConfig::new(self.network_id())
        }
    }

    /// Generate a sample configuration file.
    pub fn sample_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
