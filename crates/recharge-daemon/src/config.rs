//! Configuration file management.

use std::path::PathBuf;

use recharge_draw::EngineConfig;
use recharge_notify::{DispatcherConfig, GatewayConfig};
use recharge_rules::{DigitPolicy, PointRules};
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub points: PointsConfig,
    /// Weekday digit sets. A day left out of the table has no draw.
    #[serde(default)]
    pub digits: DigitPolicy,
    #[serde(default)]
    pub draws: EngineConfig,
    #[serde(default)]
    pub sms: SmsConfig,
}

/// JSON-RPC listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// SQLite file name inside the data directory.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Day-boundary scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Schedule each day's default draw at local midnight.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also execute scheduled draws whose day has ended.
    #[serde(default)]
    pub auto_execute: bool,
}

/// Point band table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointsConfig {
    #[serde(default)]
    pub bands: PointRules,
}

/// Outbound SMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// No dispatcher runs without a primary gateway; jobs stay queued.
    #[serde(default)]
    pub primary: Option<GatewayConfig>,
    #[serde(default)]
    pub fallback: Option<GatewayConfig>,
    #[serde(default = "default_sms_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

// Default value functions

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_db_file() -> String {
    "recharge.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sms_timeout() -> u64 {
    DispatcherConfig::default().timeout_secs
}

fn default_max_attempts() -> u32 {
    DispatcherConfig::default().max_attempts
}

fn default_retry_backoff() -> u64 {
    DispatcherConfig::default().retry_backoff_secs
}

fn default_poll_interval() -> u64 {
    DispatcherConfig::default().poll_interval_secs
}

fn default_batch_size() -> u32 {
    DispatcherConfig::default().batch_size
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            db_file: default_db_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute: false,
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback: None,
            timeout_secs: default_sms_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl SmsConfig {
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            timeout_secs: self.timeout_secs,
            max_attempts: self.max_attempts,
            retry_backoff_secs: self.retry_backoff_secs,
            poll_interval_secs: self.poll_interval_secs,
            batch_size: self.batch_size,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.digits.validate()?;
        for prizes in [&config.draws.daily_prizes, &config.draws.saturday_prizes] {
            recharge_types::draw::validate_prize_structure(prizes)?;
        }
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Full path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.db_file)
    }

    /// Listen address of the JSON-RPC server.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("RECHARGE_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".recharge"))
            .unwrap_or_else(|_| PathBuf::from("/var/lib/recharge"))
    }
}
