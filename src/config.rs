//! # Lifecycle Engine Configuration
//!
//! Explicit, validated configuration for the step driver. Retry limits,
//! backoff shape, and wait-step timeouts are deployment policy, not code:
//! they load from an optional config file plus `LIFECYCLE_*` environment
//! overrides, with sane defaults for embedding and tests.
//!
//! ## Usage
//!
//! ```rust
//! use lifecycle_core::config::LifecycleConfig;
//!
//! let config = LifecycleConfig::default();
//! assert_eq!(config.max_step_retries, 5);
//! assert_eq!(config.poll_interval().as_secs(), 30);
//! ```

use crate::error::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Driver-level tunables. All durations are stored as integer seconds so the
/// persisted/env representation stays flat and unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Cadence of the cooperative driver loop.
    pub poll_interval_seconds: u64,
    /// Maximum automatic re-attempts of a retryable failed step.
    pub max_step_retries: u32,
    /// Base delay before the first re-attempt of a failed step.
    pub retry_backoff_base_seconds: u64,
    /// Cap applied to the exponential backoff.
    pub retry_backoff_max_seconds: u64,
    /// Maximum time a wait step (sync or async) may remain unmet before the
    /// index transitions to the failed state.
    pub max_wait_seconds: u64,
    /// Bounded number of read-compute-propose attempts per scheduling pass
    /// when the store reports version conflicts.
    pub commit_retry_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            max_step_retries: 5,
            retry_backoff_base_seconds: 10,
            retry_backoff_max_seconds: 300,
            max_wait_seconds: 43_200, // 12 hours
            commit_retry_attempts: 3,
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from an optional `lifecycle.toml` in the working
    /// directory (or `LIFECYCLE_CONFIG_PATH`), with `LIFECYCLE_*` environment
    /// variables taking precedence over file values.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LIFECYCLE_CONFIG_PATH")
            .unwrap_or_else(|_| "lifecycle.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("LIFECYCLE"))
            .build()
            .map_err(|e| LifecycleError::Configuration(e.to_string()))?;

        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| LifecycleError::Configuration(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations that would stall or spin the driver.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(LifecycleError::Configuration(
                "poll_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.commit_retry_attempts == 0 {
            return Err(LifecycleError::Configuration(
                "commit_retry_attempts must be greater than zero".to_string(),
            ));
        }
        if self.retry_backoff_max_seconds < self.retry_backoff_base_seconds {
            return Err(LifecycleError::Configuration(
                "retry_backoff_max_seconds must be >= retry_backoff_base_seconds".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    /// Exponential backoff for the nth re-attempt (1-based), capped.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_backoff_base_seconds
            .saturating_mul(1u64 << exp)
            .min(self.retry_backoff_max_seconds);
        Duration::from_secs(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = LifecycleConfig {
            retry_backoff_base_seconds: 10,
            retry_backoff_max_seconds: 60,
            ..Default::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_secs(10));
        assert_eq!(config.retry_backoff(2), Duration::from_secs(20));
        assert_eq!(config.retry_backoff(3), Duration::from_secs(40));
        assert_eq!(config.retry_backoff(4), Duration::from_secs(60));
        assert_eq!(config.retry_backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let config = LifecycleConfig {
            poll_interval_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[test]
    fn inverted_backoff_bounds_rejected() {
        let config = LifecycleConfig {
            retry_backoff_base_seconds: 100,
            retry_backoff_max_seconds: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
