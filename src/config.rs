//! Runtime configuration
//!
//! Loaded from a JSON file. Every field except `data_dir` has a default, and
//! the whole structure is validated before any component is opened.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorCode {
    TickdbConfigInvalid,
    TickdbConfigUnreadable,
}

impl ConfigErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigErrorCode::TickdbConfigInvalid => "TICKDB_CONFIG_INVALID",
            ConfigErrorCode::TickdbConfigUnreadable => "TICKDB_CONFIG_UNREADABLE",
        }
    }
}

/// Configuration error. Always FATAL: nothing is opened with a bad config.
#[derive(Debug)]
pub struct ConfigError {
    code: ConfigErrorCode,
    message: String,
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ConfigErrorCode::TickdbConfigInvalid,
            message: message.into(),
        }
    }

    pub fn unreadable(message: impl Into<String>) -> Self {
        Self {
            code: ConfigErrorCode::TickdbConfigUnreadable,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ConfigErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDbConfig {
    /// Data root (required)
    pub data_dir: PathBuf,

    /// Maximum rows per decoded batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Decoded batches allowed in flight before the decoder blocks
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,

    /// Buffered rows per partition key that trigger a flush
    #[serde(default = "default_flush_max_rows")]
    pub flush_max_rows: usize,

    /// Age of the oldest buffered row that triggers a flush
    #[serde(default = "default_flush_max_age_ms")]
    pub flush_max_age_ms: u64,

    /// Time bucket width for new data roots. Fixed once `layout.json` exists.
    #[serde(default = "default_bucket_width_secs")]
    pub bucket_width_secs: u64,

    /// zstd level for column blocks
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    #[serde(default = "default_io_retry_attempts")]
    pub io_retry_attempts: u32,

    #[serde(default = "default_io_retry_base_delay_ms")]
    pub io_retry_base_delay_ms: u64,

    /// Reject rows whose time goes backwards within a load session
    #[serde(default = "default_enforce_monotonic_time")]
    pub enforce_monotonic_time: bool,

    /// Reject rows stamped further than this ahead of ingest time
    #[serde(default)]
    pub max_future_skew_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    16_384
}
fn default_max_in_flight_batches() -> usize {
    4
}
fn default_flush_max_rows() -> usize {
    65_536
}
fn default_flush_max_age_ms() -> u64 {
    5_000
}
fn default_bucket_width_secs() -> u64 {
    86_400
}
fn default_compression_level() -> i32 {
    5
}
fn default_io_retry_attempts() -> u32 {
    3
}
fn default_io_retry_base_delay_ms() -> u64 {
    10
}
fn default_enforce_monotonic_time() -> bool {
    true
}

impl TickDbConfig {
    /// Config with every default applied for the given data root
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            batch_size: default_batch_size(),
            max_in_flight_batches: default_max_in_flight_batches(),
            flush_max_rows: default_flush_max_rows(),
            flush_max_age_ms: default_flush_max_age_ms(),
            bucket_width_secs: default_bucket_width_secs(),
            compression_level: default_compression_level(),
            io_retry_attempts: default_io_retry_attempts(),
            io_retry_base_delay_ms: default_io_retry_base_delay_ms(),
            enforce_monotonic_time: default_enforce_monotonic_time(),
            max_future_skew_secs: None,
        }
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::unreadable(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: TickDbConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::invalid(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("data_dir must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be > 0"));
        }
        if self.max_in_flight_batches == 0 {
            return Err(ConfigError::invalid("max_in_flight_batches must be > 0"));
        }
        if self.flush_max_rows == 0 {
            return Err(ConfigError::invalid("flush_max_rows must be > 0"));
        }
        if self.bucket_width_secs == 0 {
            return Err(ConfigError::invalid("bucket_width_secs must be > 0"));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::invalid(format!(
                "compression_level must be within 1..=22, got {}",
                self.compression_level
            )));
        }
        if self.io_retry_attempts == 0 {
            return Err(ConfigError::invalid("io_retry_attempts must be > 0"));
        }
        Ok(())
    }

    pub fn flush_max_age(&self) -> Duration {
        Duration::from_millis(self.flush_max_age_ms)
    }

    pub fn io_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.io_retry_base_delay_ms)
    }
}
