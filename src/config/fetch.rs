//! Fetch client configuration.

use std::time::Duration;

use crate::core::{
    ConfigError, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, MAX_RETRY_DELAY, RATE_LIMIT_COOLDOWN,
};

/// Retry, cooldown and cache policy of one remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Attempts per fetch before the source is marked permanently failed.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,

    /// Ceiling for a single retry delay.
    pub max_delay: Duration,

    /// Cooldown after a rate-limit response.
    pub rate_limit_cooldown: Duration,

    /// Validity window of the cache entry.
    ///
    /// A fresher entry is served without network I/O; `Duration::ZERO`
    /// disables this and always fetches.
    pub cache_ttl: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_RETRY_DELAY,
            rate_limit_cooldown: RATE_LIMIT_COOLDOWN,
            cache_ttl: Duration::ZERO,
        }
    }
}

impl FetchConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue {
                field: "max_delay",
                reason: format!(
                    "{:?} is below base delay {:?}",
                    self.max_delay, self.base_delay
                ),
            });
        }
        Ok(())
    }
}

/// Builder for [`FetchConfig`].
#[derive(Debug, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt limit.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the base retry delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set the retry delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set the rate-limit cooldown.
    pub fn rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.rate_limit_cooldown = cooldown;
        self
    }

    /// Set the cache validity window.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<FetchConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.rate_limit_cooldown, Duration::from_secs(70));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.cache_ttl, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        assert!(FetchConfigBuilder::new().max_attempts(0).build().is_err());
        assert!(
            FetchConfigBuilder::new()
                .base_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .build()
                .is_err()
        );

        let config = FetchConfigBuilder::new()
            .max_attempts(5)
            .cache_ttl(Duration::from_secs(15))
            .build()
            .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.cache_ttl, Duration::from_secs(15));
    }
}
