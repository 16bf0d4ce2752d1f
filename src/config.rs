//! Configuration for transaction tracking.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Maximum number of distinct duration bucket boundaries.
pub const MAX_DURATION_BUCKETS: usize = 5;

/// Lowest repeat count that may flag a potential N+1 pattern.
pub const MIN_N_PLUS_ONE_THRESHOLD: usize = 2;

/// How a finalized transaction is written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    /// One line per transaction.
    #[default]
    Simple,
    /// Multi-line block including the tree of inner transactions.
    Details,
}

/// Durations above which transactions and connections are flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AlarmingThreshold {
    /// A transaction whose duration is strictly greater than this is alarming.
    pub transaction: Duration,
    /// A single acquire/release interval strictly greater than this is alarming.
    pub connection: Duration,
}

impl Default for AlarmingThreshold {
    fn default() -> Self {
        Self {
            transaction: Duration::from_millis(1000),
            connection: Duration::from_millis(1000),
        }
    }
}

impl AlarmingThreshold {
    pub(crate) fn transaction_millis(&self) -> i64 {
        millis(self.transaction)
    }

    pub(crate) fn connection_millis(&self) -> i64 {
        millis(self.connection)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Configuration options for transaction tracking.
///
/// # Example
///
/// ```rust
/// use tx_board::TxBoardConfig;
/// use std::time::Duration;
///
/// let config = TxBoardConfig::default()
///     .with_transaction_threshold(Duration::from_millis(250))
///     .with_duration_buckets([50, 250, 1000])
///     .unwrap();
/// assert_eq!(config.duration_buckets, vec![50, 250, 1000]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TxBoardConfig {
    /// When `false` every tracking operation is a no-op.
    /// Default: `true`
    pub enabled: bool,

    /// Thresholds for alarming transactions and connections.
    /// Default: 1000ms for both
    pub alarming_threshold: AlarmingThreshold,

    /// Upper boundaries (milliseconds) of the duration histogram buckets.
    /// Sorted ascending and deduplicated. Default: `[100, 500, 1000, 2000, 5000]`
    pub duration_buckets: Vec<u64>,

    /// Shape of the log line written for each finalized transaction.
    /// Default: [`LogType::Simple`]
    pub log_type: LogType,

    /// Number of structurally identical statements within one transaction
    /// that flags a potential N+1 pattern.
    /// Default: 5
    pub n_plus_one_threshold: usize,
}

impl Default for TxBoardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alarming_threshold: AlarmingThreshold::default(),
            duration_buckets: vec![100, 500, 1000, 2000, 5000],
            log_type: LogType::Simple,
            n_plus_one_threshold: 5,
        }
    }
}

impl TxBoardConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable tracking.
    pub fn with_tracking_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the duration above which a transaction is alarming.
    pub fn with_transaction_threshold(mut self, threshold: Duration) -> Self {
        self.alarming_threshold.transaction = threshold;
        self
    }

    /// Set the duration above which a single connection interval is alarming.
    pub fn with_connection_threshold(mut self, threshold: Duration) -> Self {
        self.alarming_threshold.connection = threshold;
        self
    }

    /// Set the duration histogram boundaries in milliseconds.
    ///
    /// Boundaries are sorted and deduplicated. Between one and
    /// [`MAX_DURATION_BUCKETS`] positive values are accepted.
    pub fn with_duration_buckets(
        mut self,
        buckets: impl IntoIterator<Item = u64>,
    ) -> Result<Self, ConfigError> {
        self.duration_buckets = normalize_buckets(buckets.into_iter().collect())?;
        Ok(self)
    }

    /// Set the N+1 repeat threshold.
    pub fn with_n_plus_one_threshold(mut self, threshold: usize) -> Result<Self, ConfigError> {
        if threshold < MIN_N_PLUS_ONE_THRESHOLD {
            return Err(ConfigError::NPlusOneThresholdTooLow(threshold));
        }
        self.n_plus_one_threshold = threshold;
        Ok(self)
    }

    /// Set the log line shape.
    pub fn with_log_type(mut self, log_type: LogType) -> Self {
        self.log_type = log_type;
        self
    }

    /// Check every invariant and normalize the bucket list.
    ///
    /// Useful after deserializing a configuration, which bypasses the
    /// fallible builders.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.duration_buckets = normalize_buckets(std::mem::take(&mut self.duration_buckets))?;
        if self.n_plus_one_threshold < MIN_N_PLUS_ONE_THRESHOLD {
            return Err(ConfigError::NPlusOneThresholdTooLow(self.n_plus_one_threshold));
        }
        Ok(self)
    }

    /// Create a development-friendly configuration: detailed logs and low thresholds.
    pub fn development() -> Self {
        Self {
            enabled: true,
            alarming_threshold: AlarmingThreshold {
                transaction: Duration::from_millis(200),
                connection: Duration::from_millis(200),
            },
            duration_buckets: vec![50, 100, 200, 500, 1000],
            log_type: LogType::Details,
            n_plus_one_threshold: 3,
        }
    }

    /// Create a production configuration with one-line logs.
    pub fn production() -> Self {
        Self {
            enabled: true,
            alarming_threshold: AlarmingThreshold {
                transaction: Duration::from_secs(2),
                connection: Duration::from_secs(2),
            },
            duration_buckets: vec![100, 500, 1000, 2000, 5000],
            log_type: LogType::Simple,
            n_plus_one_threshold: 5,
        }
    }
}

fn normalize_buckets(mut buckets: Vec<u64>) -> Result<Vec<u64>, ConfigError> {
    if buckets.is_empty() {
        return Err(ConfigError::EmptyDurationBuckets);
    }
    if buckets.contains(&0) {
        return Err(ConfigError::NonPositiveDurationBucket(0));
    }
    buckets.sort_unstable();
    buckets.dedup();
    if buckets.len() > MAX_DURATION_BUCKETS {
        return Err(ConfigError::TooManyDurationBuckets {
            count: buckets.len(),
            max: MAX_DURATION_BUCKETS,
        });
    }
    Ok(buckets)
}
