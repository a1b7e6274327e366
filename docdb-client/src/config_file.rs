//! Declarative batch configuration.
//!
//! [`FileBatchConfig`] mirrors [`BatchConfig`] with serde-friendly fields and
//! converts into it through [`TryFrom`], so file values go through the same
//! validation as the builder. Loading from TOML requires the `config-file`
//! feature.
//!
//! # Example TOML
//!
//! ```toml
//! max-operations = 50
//! max-body-bytes = 204800
//! dispatch-interval-ms = 250
//! max-split-retries = 3
//! slow-dispatch-threshold-ms = 2000
//! bulk-max-operation-retries = 10
//!
//! [throttling]
//! max-attempts = 9
//! max-wait-ms = 30000
//! initial-backoff-ms = 100
//! max-backoff-ms = 5000
//! multiplier = 2.0
//! jitter = 0.2
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{BatchConfig, BatchConfigBuilder, ConfigError};

/// File-based batch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileBatchConfig {
    /// Max operations per request.
    pub max_operations: Option<usize>,
    /// Byte budget of a request body.
    pub max_body_bytes: Option<usize>,
    /// Bulk flush interval in milliseconds.
    pub dispatch_interval_ms: Option<u64>,
    /// Max re-issues after a partition split.
    pub max_split_retries: Option<u32>,
    /// Slow dispatch warning threshold in milliseconds.
    pub slow_dispatch_threshold_ms: Option<u64>,
    /// Per-operation retry bound in bulk mode.
    pub bulk_max_operation_retries: Option<u32>,
    /// Throttling retry policy.
    pub throttling: Option<FileThrottlingConfig>,
}

/// File-based throttling retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileThrottlingConfig {
    /// Max retries of a throttled request.
    pub max_attempts: Option<u32>,
    /// Max cumulative wait in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Backoff multiplier.
    pub multiplier: Option<f64>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: Option<f64>,
}

impl TryFrom<FileBatchConfig> for BatchConfig {
    type Error = ConfigError;

    fn try_from(file: FileBatchConfig) -> Result<Self, Self::Error> {
        let mut builder = BatchConfigBuilder::new();

        if let Some(count) = file.max_operations {
            builder = builder.max_operations(count);
        }
        if let Some(bytes) = file.max_body_bytes {
            builder = builder.max_body_bytes(bytes);
        }
        if let Some(ms) = file.dispatch_interval_ms {
            builder = builder.dispatch_interval(Duration::from_millis(ms));
        }
        if let Some(retries) = file.max_split_retries {
            builder = builder.max_split_retries(retries);
        }
        if let Some(ms) = file.slow_dispatch_threshold_ms {
            builder = builder.slow_dispatch_threshold(Duration::from_millis(ms));
        }
        if let Some(retries) = file.bulk_max_operation_retries {
            builder = builder.bulk_max_operation_retries(retries);
        }

        if let Some(throttling) = file.throttling {
            builder = builder.throttling(|mut t| {
                if let Some(attempts) = throttling.max_attempts {
                    t = t.max_attempts(attempts);
                }
                if let Some(ms) = throttling.max_wait_ms {
                    t = t.max_wait(Duration::from_millis(ms));
                }
                if let Some(ms) = throttling.initial_backoff_ms {
                    t = t.initial_backoff(Duration::from_millis(ms));
                }
                if let Some(ms) = throttling.max_backoff_ms {
                    t = t.max_backoff(Duration::from_millis(ms));
                }
                if let Some(multiplier) = throttling.multiplier {
                    t = t.multiplier(multiplier);
                }
                if let Some(jitter) = throttling.jitter {
                    t = t.jitter(jitter);
                }
                t
            });
        }

        builder.build()
    }
}

impl BatchConfig {
    /// Parses a TOML document into a validated configuration.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file_config: FileBatchConfig = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("failed to parse TOML config: {e}")))?;
        file_config.try_into()
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = BatchConfig::from_toml("docdb-batch.toml")?;
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("failed to read TOML config file: {e}")))?;
        Self::from_toml_str(&content)
    }
}
