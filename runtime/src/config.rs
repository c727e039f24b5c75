//! Configuration management for the selection engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::retry::RetryPolicy;
use enrollment_core::environment::{RandomSource, SeededRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Optimistic transaction retry configuration
    pub retry: RetryConfig,
    /// Lottery configuration
    pub lottery: LotteryConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Retry configuration for store transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 5)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default: 10)
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds (default: 1000)
    pub max_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub multiplier: f64,
    /// Randomize delays to spread out contending writers (default: true)
    pub jitter: bool,
}

/// Lottery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryConfig {
    /// Seed for reproducible draws. Unset means OS randomness.
    pub seed: Option<u64>,
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter (trace, debug, info, warn, error)
    pub log_level: String,
    /// Install the Prometheus recorder (default: false)
    pub metrics_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lottery: LotteryConfig { seed: None },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_enabled: false,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 10,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            retry: RetryConfig {
                max_retries: lookup("ENROLLMENT_RETRY_MAX_RETRIES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_retries),
                initial_delay_ms: lookup("ENROLLMENT_RETRY_INITIAL_DELAY_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.initial_delay_ms),
                max_delay_ms: lookup("ENROLLMENT_RETRY_MAX_DELAY_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_delay_ms),
                multiplier: lookup("ENROLLMENT_RETRY_MULTIPLIER")
                    .and_then(|s| s.parse().ok())
                    .filter(|m: &f64| m.is_finite() && *m >= 1.0)
                    .unwrap_or(defaults.retry.multiplier),
                jitter: lookup("ENROLLMENT_RETRY_JITTER")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.jitter),
            },
            lottery: LotteryConfig {
                seed: lookup("ENROLLMENT_LOTTERY_SEED").and_then(|s| s.parse().ok()),
            },
            observability: ObservabilityConfig {
                log_level: lookup("RUST_LOG").unwrap_or(defaults.observability.log_level),
                metrics_enabled: lookup("ENROLLMENT_METRICS_ENABLED")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.observability.metrics_enabled),
            },
        }
    }

    /// Retry policy for store transactions.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry.max_retries)
            .initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .multiplier(self.retry.multiplier)
            .jitter(self.retry.jitter)
            .build()
    }

    /// Randomness for lottery draws: seeded when a seed is configured.
    #[must_use]
    pub fn random_source(&self) -> Arc<dyn RandomSource> {
        match self.lottery.seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(SystemRandom),
        }
    }
}
