//! Retry and timeout policy around a single collaborator call.

use std::future::Future;
use std::time::{Duration, Instant};

use domain::DomainError;

use crate::error::ActivityFailure;

/// How one activity is timed out and retried.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityPolicy {
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_coefficient: f64,
    /// Cap on the delay between two attempts.
    pub maximum_interval: Duration,
    /// Total attempts, including the first one.
    pub maximum_attempts: u32,
}

impl ActivityPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `min(initial * coefficient^(attempt - 1), maximum)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let delay_nanos = self.initial_interval.as_nanos() as f64 * factor;
        let max_nanos = self.maximum_interval.as_nanos() as f64;
        if !delay_nanos.is_finite() || delay_nanos >= max_nanos {
            self.maximum_interval
        } else {
            Duration::from_nanos(delay_nanos.round() as u64)
        }
    }

    /// Single attempt, no retry.
    pub fn no_retry(mut self) -> Self {
        self.maximum_attempts = 1;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }
}

impl Default for ActivityPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
            maximum_attempts: 3,
        }
    }
}

/// Named presets handed to the sagas.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivityPolicies {
    /// Calls to the identity and directory providers.
    pub provider: ActivityPolicy,
    /// Calls to the relational datastore.
    pub datastore: ActivityPolicy,
    /// Undo actions run while draining the compensation stack.
    pub compensation: ActivityPolicy,
}

/// Runs `call` under `policy`, retrying retryable failures with backoff.
///
/// `call` may be invoked several times, so it must be safe to repeat.
/// Returns the first success or the classified error of the last attempt.
pub async fn invoke<T, F, Fut>(
    activity: &str,
    policy: &ActivityPolicy,
    mut call: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityFailure>>,
{
    let max_attempts = policy.maximum_attempts.max(1);
    let mut attempt = 1;

    loop {
        metrics::counter!("saga_activity_attempts_total", "activity" => activity.to_string())
            .increment(1);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ActivityFailure::Timeout {
                activity: activity.to_string(),
                timeout_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match outcome {
            Ok(value) => {
                metrics::histogram!(
                    "saga_activity_duration_seconds",
                    "activity" => activity.to_string()
                )
                .record(started.elapsed().as_secs_f64());
                return Ok(value);
            }
            Err(failure) => {
                let error = DomainError::from(failure);
                if error.is_non_retryable() || attempt >= max_attempts {
                    tracing::debug!(activity, attempt, error = %error, "activity gave up");
                    return Err(error);
                }

                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    activity,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "activity failed, retrying"
                );
                metrics::counter!("saga_activity_retries_total", "activity" => activity.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
