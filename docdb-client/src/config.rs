//! Configuration types for batch and bulk execution.

use std::time::Duration;

use docdb_core::DocDbError;

/// Hard upper bound on operations in one batch request.
pub const MAX_OPERATIONS_IN_BATCH: usize = 100;

/// Hard upper bound on a single request body, enforced locally.
pub const MAX_BATCH_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Environment variable overriding the max operations per direct-mode batch request.
pub const ENV_MAX_OPERATIONS: &str = "DOCDB_MAX_OPERATIONS_IN_DIRECT_MODE_BATCH_REQUEST";
/// Environment variable overriding the max body bytes per batch request.
pub const ENV_MAX_BODY_BYTES: &str = "DOCDB_BATCH_MAX_BODY_BYTES";
/// Environment variable overriding the bulk dispatch interval in milliseconds.
pub const ENV_DISPATCH_INTERVAL_MS: &str = "DOCDB_BATCH_DISPATCH_INTERVAL_MS";
/// Environment variable overriding the max split retries.
pub const ENV_MAX_SPLIT_RETRIES: &str = "DOCDB_BATCH_MAX_SPLIT_RETRIES";

const DEFAULT_MAX_OPERATIONS: usize = MAX_OPERATIONS_IN_BATCH;
const DEFAULT_MAX_BODY_BYTES: usize = 220 * 1024;
const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);
const MIN_DISPATCH_INTERVAL: Duration = Duration::from_millis(1);
const DEFAULT_MAX_SPLIT_RETRIES: u32 = 3;
const DEFAULT_SLOW_DISPATCH_THRESHOLD: Duration = Duration::from_secs(5);

const DEFAULT_THROTTLE_MAX_ATTEMPTS: u32 = 9;
const DEFAULT_THROTTLE_MAX_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_THROTTLE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_THROTTLE_MAX_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_THROTTLE_MULTIPLIER: f64 = 2.0;
const DEFAULT_THROTTLE_JITTER: f64 = 0.2;

const DEFAULT_BULK_MAX_OPERATION_RETRIES: u32 = 10;

/// Error returned when configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the validation message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for DocDbError {
    fn from(err: ConfigError) -> Self {
        DocDbError::Configuration(err.message)
    }
}

/// Reads the max operations per direct-mode batch request from the environment.
///
/// Unset or empty yields the default. Non-numeric or out-of-range values
/// (outside `1..=100`) fail immediately.
pub fn max_operations_from_env() -> Result<usize, ConfigError> {
    match read_env(ENV_MAX_OPERATIONS) {
        None => Ok(DEFAULT_MAX_OPERATIONS),
        Some(raw) => parse_max_operations(&raw),
    }
}

fn parse_max_operations(raw: &str) -> Result<usize, ConfigError> {
    let value: usize = raw.trim().parse().map_err(|_| {
        ConfigError::new(format!("{ENV_MAX_OPERATIONS} must be an integer, got '{raw}'"))
    })?;
    if !(1..=MAX_OPERATIONS_IN_BATCH).contains(&value) {
        return Err(ConfigError::new(format!(
            "{ENV_MAX_OPERATIONS} must be between 1 and {MAX_OPERATIONS_IN_BATCH}, got {value}"
        )));
    }
    Ok(value)
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    read_env(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::new(format!("{name} is not a valid number: '{raw}'")))
        })
        .transpose()
}

/// Retry policy for batch-level throttling (429).
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlingRetryConfig {
    max_attempts: u32,
    max_wait: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ThrottlingRetryConfig {
    /// Creates a new throttling retry configuration builder.
    pub fn builder() -> ThrottlingRetryConfigBuilder {
        ThrottlingRetryConfigBuilder::new()
    }

    /// Returns the maximum number of retries after a throttled response.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the maximum cumulative time spent waiting on throttles.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Returns the backoff used when the service sends no retry-after hint.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor in `0.0..=1.0`.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }
}

impl Default for ThrottlingRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_THROTTLE_MAX_ATTEMPTS,
            max_wait: DEFAULT_THROTTLE_MAX_WAIT,
            initial_backoff: DEFAULT_THROTTLE_INITIAL_BACKOFF,
            max_backoff: DEFAULT_THROTTLE_MAX_BACKOFF,
            multiplier: DEFAULT_THROTTLE_MULTIPLIER,
            jitter: DEFAULT_THROTTLE_JITTER,
        }
    }
}

impl From<ThrottlingRetryConfig> for ThrottlingRetryConfigBuilder {
    fn from(config: ThrottlingRetryConfig) -> Self {
        Self {
            max_attempts: Some(config.max_attempts),
            max_wait: Some(config.max_wait),
            initial_backoff: Some(config.initial_backoff),
            max_backoff: Some(config.max_backoff),
            multiplier: Some(config.multiplier),
            jitter: Some(config.jitter),
        }
    }
}

/// Builder for `ThrottlingRetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct ThrottlingRetryConfigBuilder {
    max_attempts: Option<u32>,
    max_wait: Option<Duration>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl ThrottlingRetryConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries after a throttled response.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the maximum cumulative wait.
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Sets the backoff used when no retry-after hint is present.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is less than 1.0
    /// - `jitter` is outside `0.0..=1.0`
    pub fn build(self) -> Result<ThrottlingRetryConfig, ConfigError> {
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_THROTTLE_MAX_ATTEMPTS);
        let max_wait = self.max_wait.unwrap_or(DEFAULT_THROTTLE_MAX_WAIT);
        let initial_backoff = self
            .initial_backoff
            .unwrap_or(DEFAULT_THROTTLE_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_THROTTLE_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_THROTTLE_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(DEFAULT_THROTTLE_JITTER);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        Ok(ThrottlingRetryConfig {
            max_attempts,
            max_wait,
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
        })
    }
}

/// Configuration for batch packing, dispatch and retry.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    max_operations: usize,
    max_body_bytes: usize,
    dispatch_interval: Duration,
    max_split_retries: u32,
    slow_dispatch_threshold: Duration,
    bulk_max_operation_retries: u32,
    throttling: ThrottlingRetryConfig,
}

impl BatchConfig {
    /// Creates a new batch configuration builder.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::new()
    }

    /// Builds a configuration from defaults plus environment overrides.
    ///
    /// Reads [`ENV_MAX_OPERATIONS`], [`ENV_MAX_BODY_BYTES`],
    /// [`ENV_DISPATCH_INTERVAL_MS`] and [`ENV_MAX_SPLIT_RETRIES`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = BatchConfigBuilder::new().max_operations(max_operations_from_env()?);

        if let Some(bytes) = parse_env::<usize>(ENV_MAX_BODY_BYTES)? {
            builder = builder.max_body_bytes(bytes);
        }
        if let Some(ms) = parse_env::<u64>(ENV_DISPATCH_INTERVAL_MS)? {
            builder = builder.dispatch_interval(Duration::from_millis(ms));
        }
        if let Some(retries) = parse_env::<u32>(ENV_MAX_SPLIT_RETRIES)? {
            builder = builder.max_split_retries(retries);
        }

        builder.build()
    }

    /// Returns the max operations per request.
    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// Returns the byte budget for a request body.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Returns the age after which a non-empty bulk batcher is flushed.
    pub fn dispatch_interval(&self) -> Duration {
        self.dispatch_interval
    }

    /// Returns the max re-issues after a partition split.
    pub fn max_split_retries(&self) -> u32 {
        self.max_split_retries
    }

    /// Returns the latency above which a dispatch is logged as slow.
    pub fn slow_dispatch_threshold(&self) -> Duration {
        self.slow_dispatch_threshold
    }

    /// Returns the per-operation retry bound in bulk mode.
    pub fn bulk_max_operation_retries(&self) -> u32 {
        self.bulk_max_operation_retries
    }

    /// Returns the throttling retry policy.
    pub fn throttling(&self) -> &ThrottlingRetryConfig {
        &self.throttling
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            max_split_retries: DEFAULT_MAX_SPLIT_RETRIES,
            slow_dispatch_threshold: DEFAULT_SLOW_DISPATCH_THRESHOLD,
            bulk_max_operation_retries: DEFAULT_BULK_MAX_OPERATION_RETRIES,
            throttling: ThrottlingRetryConfig::default(),
        }
    }
}

/// Builder for `BatchConfig`.
#[derive(Debug, Clone, Default)]
pub struct BatchConfigBuilder {
    max_operations: Option<usize>,
    max_body_bytes: Option<usize>,
    dispatch_interval: Option<Duration>,
    max_split_retries: Option<u32>,
    slow_dispatch_threshold: Option<Duration>,
    bulk_max_operation_retries: Option<u32>,
    throttling: ThrottlingRetryConfigBuilder,
}

impl BatchConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the max operations per request.
    pub fn max_operations(mut self, count: usize) -> Self {
        self.max_operations = Some(count);
        self
    }

    /// Sets the byte budget for a request body.
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = Some(bytes);
        self
    }

    /// Sets the bulk dispatch interval.
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = Some(interval);
        self
    }

    /// Sets the max re-issues after a partition split.
    pub fn max_split_retries(mut self, retries: u32) -> Self {
        self.max_split_retries = Some(retries);
        self
    }

    /// Sets the slow dispatch warning threshold.
    pub fn slow_dispatch_threshold(mut self, threshold: Duration) -> Self {
        self.slow_dispatch_threshold = Some(threshold);
        self
    }

    /// Sets the per-operation retry bound in bulk mode.
    pub fn bulk_max_operation_retries(mut self, retries: u32) -> Self {
        self.bulk_max_operation_retries = Some(retries);
        self
    }

    /// Configures the throttling retry policy.
    pub fn throttling<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ThrottlingRetryConfigBuilder) -> ThrottlingRetryConfigBuilder,
    {
        self.throttling = f(self.throttling);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `max_operations` is outside `1..=100`
    /// - `max_body_bytes` is zero or exceeds 2 MiB
    /// - `dispatch_interval` is below 1 ms
    /// - the throttling policy is invalid
    pub fn build(self) -> Result<BatchConfig, ConfigError> {
        let max_operations = self.max_operations.unwrap_or(DEFAULT_MAX_OPERATIONS);
        let max_body_bytes = self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
        let dispatch_interval = self.dispatch_interval.unwrap_or(DEFAULT_DISPATCH_INTERVAL);

        if !(1..=MAX_OPERATIONS_IN_BATCH).contains(&max_operations) {
            return Err(ConfigError::new(format!(
                "max_operations must be between 1 and {MAX_OPERATIONS_IN_BATCH}"
            )));
        }

        if max_body_bytes == 0 || max_body_bytes > MAX_BATCH_BODY_BYTES {
            return Err(ConfigError::new(format!(
                "max_body_bytes must be between 1 and {MAX_BATCH_BODY_BYTES}"
            )));
        }

        if dispatch_interval < MIN_DISPATCH_INTERVAL {
            return Err(ConfigError::new("dispatch_interval must be at least 1ms"));
        }

        Ok(BatchConfig {
            max_operations,
            max_body_bytes,
            dispatch_interval,
            max_split_retries: self.max_split_retries.unwrap_or(DEFAULT_MAX_SPLIT_RETRIES),
            slow_dispatch_threshold: self
                .slow_dispatch_threshold
                .unwrap_or(DEFAULT_SLOW_DISPATCH_THRESHOLD),
            bulk_max_operation_retries: self
                .bulk_max_operation_retries
                .unwrap_or(DEFAULT_BULK_MAX_OPERATION_RETRIES),
            throttling: self.throttling.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.max_operations(), 100);
        assert_eq!(config.max_body_bytes(), 225_280);
        assert_eq!(config.dispatch_interval(), Duration::from_secs(1));
        assert_eq!(config.max_split_retries(), 3);
        assert_eq!(config.throttling().max_attempts(), 9);
        assert_eq!(config.throttling().max_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_builder_matches_default() {
        assert_eq!(BatchConfig::builder().build().unwrap(), BatchConfig::default());
    }

    #[test]
    fn test_builder_rejects_out_of_range_operations() {
        assert!(BatchConfig::builder().max_operations(0).build().is_err());
        assert!(BatchConfig::builder().max_operations(101).build().is_err());
        assert!(BatchConfig::builder().max_operations(1).build().is_ok());
    }

    #[test]
    fn test_builder_rejects_oversized_body() {
        let err = BatchConfig::builder()
            .max_body_bytes(MAX_BATCH_BODY_BYTES + 1)
            .build()
            .unwrap_err();
        assert!(err.message().contains("max_body_bytes"));
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        assert!(BatchConfig::builder()
            .dispatch_interval(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_throttling_validation() {
        assert!(ThrottlingRetryConfig::builder()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(ThrottlingRetryConfig::builder().multiplier(0.5).build().is_err());
        assert!(ThrottlingRetryConfig::builder().jitter(1.5).build().is_err());
    }

    #[test]
    fn test_nested_throttling_builder() {
        let config = BatchConfig::builder()
            .throttling(|t| t.max_attempts(2).jitter(0.0))
            .build()
            .unwrap();
        assert_eq!(config.throttling().max_attempts(), 2);
        assert_eq!(config.throttling().jitter(), 0.0);
    }

    #[test]
    fn test_throttling_builder_from_config() {
        let config = ThrottlingRetryConfig::builder().max_attempts(4).build().unwrap();
        let rebuilt = ThrottlingRetryConfigBuilder::from(config.clone()).build().unwrap();
        assert_eq!(rebuilt, config);
    }

    #[test]
    fn test_parse_max_operations() {
        assert_eq!(parse_max_operations("1").unwrap(), 1);
        assert_eq!(parse_max_operations(" 100 ").unwrap(), 100);
        assert!(parse_max_operations("0").is_err());
        assert!(parse_max_operations("101").is_err());
        assert!(parse_max_operations("ten").is_err());
        assert!(parse_max_operations("-5").is_err());
    }

    #[test]
    fn test_config_error_converts() {
        let err: DocDbError = ConfigError::new("bad").into();
        assert!(matches!(err, DocDbError::Configuration(ref m) if m == "bad"));
        assert_eq!(err.status_code(), Some(docdb_core::StatusCode::BAD_REQUEST));
    }
}
