//! Saga runtime configuration loaded from environment variables.

use std::time::Duration;

use crate::activity::{ActivityPolicies, ActivityPolicy};

/// Timeouts and retry settings shared by every saga.
///
/// Reads from environment variables:
/// - `SAGA_EXECUTION_TIMEOUT_SECS`: overall deadline per execution (default: `300`)
/// - `SAGA_ACTIVITY_TIMEOUT_SECS`: per-attempt timeout (default: `10`)
/// - `SAGA_ACTIVITY_MAX_ATTEMPTS`: attempts per activity (default: `3`)
/// - `SAGA_RETRY_INITIAL_MS`: first retry delay (default: `1000`)
/// - `SAGA_RETRY_MAX_MS`: retry delay cap (default: `30000`)
/// - `SAGA_RETRY_BACKOFF`: backoff coefficient (default: `2.0`)
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    pub execution_timeout: Duration,
    pub activity_timeout: Duration,
    pub max_attempts: u32,
    pub retry_initial_interval: Duration,
    pub retry_max_interval: Duration,
    pub retry_backoff: f64,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            execution_timeout: env_parse("SAGA_EXECUTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.execution_timeout),
            activity_timeout: env_parse("SAGA_ACTIVITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_timeout),
            max_attempts: env_parse("SAGA_ACTIVITY_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_initial_interval: env_parse("SAGA_RETRY_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_initial_interval),
            retry_max_interval: env_parse("SAGA_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_interval),
            retry_backoff: env_parse::<f64>("SAGA_RETRY_BACKOFF")
                .filter(|b| b.is_finite() && *b >= 1.0)
                .unwrap_or(defaults.retry_backoff),
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_interval = initial;
        self.retry_max_interval = max;
        self
    }

    pub fn with_retry_backoff(mut self, coefficient: f64) -> Self {
        self.retry_backoff = coefficient;
        self
    }

    /// The base policy all presets derive from.
    pub fn activity_policy(&self) -> ActivityPolicy {
        ActivityPolicy {
            timeout: self.activity_timeout,
            initial_interval: self.retry_initial_interval,
            backoff_coefficient: self.retry_backoff,
            maximum_interval: self.retry_max_interval,
            maximum_attempts: self.max_attempts,
        }
    }

    /// Presets for provider, datastore and compensation calls.
    ///
    /// Undo actions get twice the attempts of forward steps.
    pub fn policies(&self) -> ActivityPolicies {
        let base = self.activity_policy();
        ActivityPolicies {
            provider: base.clone(),
            datastore: base.clone(),
            compensation: base.with_maximum_attempts(self.max_attempts.max(1).saturating_mul(2)),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(300),
            activity_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_initial_interval: Duration::from_millis(1000),
            retry_max_interval: Duration::from_millis(30_000),
            retry_backoff: 2.0,
        }
    }
}
