//! Attribute index configuration.

use crate::error::{CoreError, CoreResult};
use segstore_storage::SegmentRollingPolicy;
use std::time::Duration;

/// Configuration for a segment attribute index.
#[derive(Debug, Clone)]
pub struct AttributeIndexConfig {
    /// Bytes appended since the end of the last snapshot that trigger a new
    /// snapshot on the next `put`.
    pub snapshot_trigger_size: u64,

    /// Maximum number of bytes requested from storage in one read.
    pub read_block_size: usize,

    /// Rolling policy used when creating attribute segments.
    pub attribute_segment_rolling_policy: SegmentRollingPolicy,

    /// Retry policy for conditional appends (retried on bad offsets).
    pub append_retry: RetryConfig,

    /// Retry policy for replays (retried on concurrent truncation).
    pub read_retry: RetryConfig,
}

impl Default for AttributeIndexConfig {
    fn default() -> Self {
        Self {
            snapshot_trigger_size: 1024 * 1024, // 1 MB
            read_block_size: 1024 * 1024,       // 1 MB
            attribute_segment_rolling_policy: SegmentRollingPolicy::new(4 * 1024 * 1024),
            append_retry: RetryConfig::default(),
            read_retry: RetryConfig::default(),
        }
    }
}

impl AttributeIndexConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot trigger size.
    #[must_use]
    pub const fn snapshot_trigger_size(mut self, size: u64) -> Self {
        self.snapshot_trigger_size = size;
        self
    }

    /// Sets the read block size.
    #[must_use]
    pub const fn read_block_size(mut self, size: usize) -> Self {
        self.read_block_size = size;
        self
    }

    /// Sets the rolling policy for new attribute segments.
    #[must_use]
    pub const fn attribute_segment_rolling_policy(mut self, policy: SegmentRollingPolicy) -> Self {
        self.attribute_segment_rolling_policy = policy;
        self
    }

    /// Sets the append retry policy.
    #[must_use]
    pub fn append_retry(mut self, retry: RetryConfig) -> Self {
        self.append_retry = retry;
        self
    }

    /// Sets the read retry policy.
    #[must_use]
    pub fn read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.snapshot_trigger_size == 0 {
            return Err(CoreError::invalid_config("snapshot_trigger_size must be positive"));
        }
        if self.read_block_size == 0 {
            return Err(CoreError::invalid_config("read_block_size must be positive"));
        }
        self.append_retry.validate()?;
        self.read_retry.validate()
    }
}

/// Configuration for retry behavior.
///
/// Attempt `n` (counting from 0) waits `delay_for_attempt(n)` before it
/// runs; the first attempt never waits.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: u32,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2,
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before the given attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = self
            .backoff_multiplier
            .checked_pow(attempt - 1)
            .unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::invalid_config("max_attempts must be at least 1"));
        }
        if self.backoff_multiplier == 0 {
            return Err(CoreError::invalid_config("backoff_multiplier must be positive"));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AttributeIndexConfig::default();
        assert_eq!(config.snapshot_trigger_size, 1024 * 1024);
        assert_eq!(config.append_retry.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = AttributeIndexConfig::new()
            .snapshot_trigger_size(512)
            .read_block_size(64)
            .append_retry(RetryConfig::no_retry());

        assert_eq!(config.snapshot_trigger_size, 512);
        assert_eq!(config.read_block_size, 64);
        assert_eq!(config.append_retry.max_attempts, 1);
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(AttributeIndexConfig::new().read_block_size(0).validate().is_err());
        assert!(AttributeIndexConfig::new()
            .snapshot_trigger_size(0)
            .validate()
            .is_err());
        assert!(AttributeIndexConfig::new()
            .read_retry(RetryConfig::new(0))
            .validate()
            .is_err());
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::default();

        // First attempt has no delay
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(80));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(8), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(1000));
    }
}
