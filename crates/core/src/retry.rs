//! Retry configuration with exponential backoff
//!
//! Shared by the request executor (rate-limit retries) and the job poller:
//! - Exponential backoff seeded by a base interval
//! - Uniform jitter in `[0.5, 1.5]`
//! - Presets for quick, default and patient callers
//!
//! # Example
//!
//! ```rust
//! use rulehub_core::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default().with_retry_interval(Duration::from_millis(100));
//! let delay = config.delay_for_attempt(3);
//! assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(600));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound of the jitter factor
pub const JITTER_MIN: f64 = 0.5;

/// Upper bound of the jitter factor
pub const JITTER_MAX: f64 = 1.5;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries (or status reads, for pollers)
    pub max_retries: u32,
    /// Base interval the exponential backoff is seeded with
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    /// Apply random jitter to delays
    pub jitter: bool,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_interval: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config for quick retries
    #[must_use]
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_millis(50),
            jitter: true,
        }
    }

    /// Create a config for patient retries (long-running jobs)
    #[must_use]
    pub fn patient() -> Self {
        Self {
            max_retries: 10,
            retry_interval: Duration::from_secs(2),
            jitter: true,
        }
    }

    /// Create a config with no retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retry_interval: Duration::ZERO,
            jitter: false,
        }
    }

    /// Builder-style method to set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style method to set the base interval
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Builder-style method to toggle jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another retry is allowed after `retries` have been made
    #[must_use]
    pub fn can_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Calculate delay for a given retry count
    ///
    /// `ceil(2^(retries - 1) * interval_ms * jitter)` milliseconds.
    #[must_use]
    pub fn delay_for_attempt(&self, retries: u32) -> Duration {
        let factor = if self.jitter { jitter_factor() } else { 1.0 };
        backoff(retries, self.retry_interval, factor)
    }
}

/// Backoff for `retries` with an explicit jitter factor
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn backoff(retries: u32, base: Duration, jitter: f64) -> Duration {
    // retries above 62 saturate anyway; keeps powi in range
    let exponent = i32::try_from(retries.min(62)).unwrap_or(62) - 1;
    let base_ms = base.as_nanos() as f64 / 1_000_000.0;
    let delay_ms = (2f64.powi(exponent) * base_ms * jitter).ceil();

    // float-to-int casts saturate
    Duration::from_millis(delay_ms as u64)
}

/// Uniform jitter factor in `[JITTER_MIN, JITTER_MAX]`
#[must_use]
pub fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation_without_jitter() {
        let config = RetryConfig::default()
            .with_retry_interval(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let config = RetryConfig::default()
            .with_max_retries(8)
            .with_retry_interval(Duration::from_millis(250));

        for retries in 1..config.max_retries {
            let nominal = 2f64.powi(retries as i32 - 1) * 250.0;
            let low = Duration::from_millis((nominal * JITTER_MIN).ceil() as u64);
            let high = Duration::from_millis((nominal * JITTER_MAX).ceil() as u64);

            for _ in 0..200 {
                let delay = config.delay_for_attempt(retries);
                assert!(delay >= low, "{delay:?} below {low:?} at retry {retries}");
                assert!(delay <= high, "{delay:?} above {high:?} at retry {retries}");
            }
        }
    }

    #[test]
    fn test_backoff_rounds_up() {
        assert_eq!(
            backoff(1, Duration::from_millis(3), 0.5),
            Duration::from_millis(2)
        );
    }

    #[test]
    fn test_backoff_saturates() {
        let delay = backoff(u32::MAX, Duration::from_secs(1), 1.5);
        assert!(delay > Duration::from_secs(1_000_000));
        assert_eq!(backoff(3, Duration::ZERO, 1.0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_factor_range() {
        for _ in 0..1000 {
            let factor = jitter_factor();
            assert!((JITTER_MIN..=JITTER_MAX).contains(&factor));
        }
    }

    #[test]
    fn test_can_retry() {
        let config = RetryConfig::default().with_max_retries(2);
        assert!(config.can_retry(0));
        assert!(config.can_retry(1));
        assert!(!config.can_retry(2));
        assert!(!RetryConfig::no_retry().can_retry(0));
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let config = RetryConfig::quick();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retry_interval"], 50);

        let back: RetryConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
