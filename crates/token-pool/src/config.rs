//! Pool tunables
//!
//! Deserialized from the `[pool]` table of the service config. Every field has
//! a default so an empty table yields a working pool.

use std::time::Duration;

use serde::Deserialize;

/// Core acquisition settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Logins in flight across all sites
    pub max_concurrent_logins: usize,
    /// Logins in flight for any single site
    pub max_logins_per_site: usize,
    /// Distinct accounts tried by one automatic request
    pub max_attempts: u32,
    /// Deadline for requests that don't carry one
    pub default_timeout_secs: u64,
    /// Longest deadline a caller may ask for
    pub max_timeout_secs: u64,
    /// Token lifetime when the login executor gives no validity hint
    pub default_token_ttl_secs: u64,
    /// Entries kept in the in-memory cache tier
    pub fast_tier_capacity: usize,
    /// When non-empty, requests for any other site are rejected
    pub known_sites: Vec<String>,
    /// Explicit credential requests may use blacklisted accounts
    pub explicit_bypasses_blacklist: bool,
    pub history_retention_days: u32,
    pub blacklist: BlacklistConfig,
    pub store_retry: StoreRetryConfig,
    pub alerts: AlertThresholds,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_logins: 4,
            max_logins_per_site: 2,
            max_attempts: 3,
            default_timeout_secs: 120,
            max_timeout_secs: 600,
            default_token_ttl_secs: 3600,
            fast_tier_capacity: 1024,
            known_sites: Vec::new(),
            explicit_bypasses_blacklist: true,
            history_retention_days: 30,
            blacklist: BlacklistConfig::default(),
            store_retry: StoreRetryConfig::default(),
            alerts: AlertThresholds::default(),
        }
    }
}

/// Blacklisting after consecutive login failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Consecutive failures that open the first blacklist window
    pub failure_threshold: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff_secs: 300,
            max_backoff_secs: 86_400,
        }
    }
}

impl BlacklistConfig {
    /// Blacklist window after `failure_streak` consecutive failures.
    ///
    /// `None` below the threshold, then `base * 2^(streak - threshold)` capped
    /// at `max_backoff_secs`.
    pub fn backoff(&self, failure_streak: u32) -> Option<Duration> {
        if failure_streak < self.failure_threshold {
            return None;
        }
        let exponent = (failure_streak - self.failure_threshold).min(32);
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_secs);
        Some(Duration::from_secs(secs))
    }
}

/// Retries for transient credential/durable store failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
        }
    }
}

/// Health thresholds for the performance monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub min_success_rate: f64,
    pub max_average_duration_secs: f64,
    pub max_timeout_rate: f64,
    pub max_concurrency: usize,
    pub min_cache_hit_rate: f64,
    /// Rate-based checks stay quiet until this many samples exist
    pub min_samples: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            max_average_duration_secs: 60.0,
            max_timeout_rate: 0.2,
            max_concurrency: 16,
            min_cache_hit_rate: 0.5,
            min_samples: 10,
        }
    }
}

impl PoolConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn default_token_ttl(&self) -> Duration {
        Duration::from_secs(self.default_token_ttl_secs)
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> common::Result<()> {
        use common::Error;

        if self.max_concurrent_logins == 0 {
            return Err(Error::invalid("pool.max_concurrent_logins", "must be greater than 0"));
        }
        if self.max_logins_per_site == 0 {
            return Err(Error::invalid("pool.max_logins_per_site", "must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(Error::invalid("pool.max_attempts", "must be greater than 0"));
        }
        if self.default_timeout_secs == 0 {
            return Err(Error::invalid("pool.default_timeout_secs", "must be greater than 0"));
        }
        if self.max_timeout_secs < self.default_timeout_secs {
            return Err(Error::invalid(
                "pool.max_timeout_secs",
                format!(
                    "must be at least default_timeout_secs ({})",
                    self.default_timeout_secs
                ),
            ));
        }
        if self.default_token_ttl_secs == 0 {
            return Err(Error::invalid("pool.default_token_ttl_secs", "must be greater than 0"));
        }
        if self.fast_tier_capacity == 0 {
            return Err(Error::invalid("pool.fast_tier_capacity", "must be greater than 0"));
        }
        if self.blacklist.failure_threshold == 0 {
            return Err(Error::invalid(
                "pool.blacklist.failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.blacklist.max_backoff_secs < self.blacklist.base_backoff_secs {
            return Err(Error::invalid(
                "pool.blacklist.max_backoff_secs",
                "must be at least base_backoff_secs",
            ));
        }
        if self.store_retry.attempts == 0 {
            return Err(Error::invalid("pool.store_retry.attempts", "must be greater than 0"));
        }
        for (field, rate) in [
            ("pool.alerts.min_success_rate", self.alerts.min_success_rate),
            ("pool.alerts.max_timeout_rate", self.alerts.max_timeout_rate),
            ("pool.alerts.min_cache_hit_rate", self.alerts.min_cache_hit_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::invalid(field, format!("must be within 0..=1, got {rate}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PoolConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_table_deserializes_to_defaults() {
        let config: PoolConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_concurrent_logins, 4);
        assert_eq!(config.blacklist.failure_threshold, 3);
        assert_eq!(config.default_token_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn nested_tables_override_defaults() {
        let config: PoolConfig = toml::from_str(
            r#"
max_logins_per_site = 1
known_sites = ["court_zxfw"]

[blacklist]
failure_threshold = 5

[alerts]
min_success_rate = 0.95
"#,
        )
        .unwrap();
        assert_eq!(config.max_logins_per_site, 1);
        assert_eq!(config.known_sites, vec!["court_zxfw"]);
        assert_eq!(config.blacklist.failure_threshold, 5);
        assert_eq!(config.blacklist.base_backoff_secs, 300);
        assert_eq!(config.alerts.min_success_rate, 0.95);
        assert_eq!(config.alerts.min_samples, 10);
    }

    #[test]
    fn zero_limits_rejected() {
        let config = PoolConfig {
            max_logins_per_site: 0,
            ..PoolConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("pool.max_logins_per_site"), "got: {err}");
    }

    #[test]
    fn max_timeout_below_default_rejected() {
        let config = PoolConfig {
            default_timeout_secs: 120,
            max_timeout_secs: 60,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_rate_rejected() {
        let mut config = PoolConfig::default();
        config.alerts.max_timeout_rate = 1.5;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_timeout_rate"), "got: {err}");
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let blacklist = BlacklistConfig {
            failure_threshold: 3,
            base_backoff_secs: 60,
            max_backoff_secs: 600,
        };
        assert_eq!(blacklist.backoff(2), None);
        assert_eq!(blacklist.backoff(3), Some(Duration::from_secs(60)));
        assert_eq!(blacklist.backoff(4), Some(Duration::from_secs(120)));
        assert_eq!(blacklist.backoff(5), Some(Duration::from_secs(240)));
        assert_eq!(blacklist.backoff(7), Some(Duration::from_secs(600)));
        assert_eq!(blacklist.backoff(200), Some(Duration::from_secs(600)));
    }
}
