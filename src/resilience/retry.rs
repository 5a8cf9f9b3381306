//! Retry policy with configurable backoff strategies. Ports
//! `errors/retry.py::RetryConfig`/`RetryPolicy`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorContext, VenomError, VenomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialFullJitter,
    ExponentialEqualJitter,
    ExponentialDecorrelatedJitter,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
    pub exponential_base: f64,
    /// Status codes the `config` YAML layer marks retryable (spec §6's
    /// `retry_on` list, numeric half). Consulted by [`RetryPolicy::should_retry`]
    /// against whatever status a [`VenomError::RequestFailed`] carries, once
    /// the error has already cleared the `recoverable` check.
    pub retryable_status_codes: Vec<u16>,
    /// Named exception/error kinds the `config` YAML layer marks retryable
    /// (spec §6's `retry_on` list, string half, e.g. `ConnectionError`,
    /// `Timeout`). Matched against [`VenomError::exception_kind`].
    pub retryable_exception_set: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs_f64(1.0),
            max_delay: Duration::from_secs_f64(60.0),
            backoff_strategy: BackoffStrategy::ExponentialFullJitter,
            exponential_base: 2.0,
            retryable_status_codes: Vec::new(),
            retryable_exception_set: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Whether `status` is in the configured `retry_on` status-code set.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether `kind` (e.g. `"ConnectionError"`) is in the configured
    /// `retry_on` exception-name set.
    pub fn is_retryable_exception(&self, kind: &str) -> bool {
        self.retryable_exception_set.iter().any(|k| k == kind)
    }
}

/// Retries a fallible async operation, consulting [`VenomError::recoverable`]
/// and the configured backoff strategy between attempts. Ports
/// `RetryPolicy.execute_async`.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay for the given 0-indexed attempt, each strategy's jitter term
    /// drawn via `rand::thread_rng().gen_range`. Capped at `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let c = &self.config;
        let base = c.base_delay.as_secs_f64();
        let max = c.max_delay.as_secs_f64();

        let delay = match c.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * (attempt as f64 + 1.0),
            BackoffStrategy::Exponential => base * c.exponential_base.powi(attempt as i32),
            BackoffStrategy::ExponentialFullJitter => {
                let exponential_delay = base * c.exponential_base.powi(attempt as i32);
                if exponential_delay <= 0.0 {
                    0.0
                } else {
                    rand::thread_rng().gen_range(0.0..=exponential_delay)
                }
            }
            BackoffStrategy::ExponentialEqualJitter => {
                let exponential_delay = base * c.exponential_base.powi(attempt as i32);
                let half = exponential_delay / 2.0;
                let jitter = if half <= 0.0 { 0.0 } else { rand::thread_rng().gen_range(0.0..=half) };
                half + jitter
            }
            BackoffStrategy::ExponentialDecorrelatedJitter => {
                if attempt == 0 {
                    if base <= 0.0 {
                        0.0
                    } else {
                        rand::thread_rng().gen_range(0.0..=base)
                    }
                } else {
                    let cap = (base * 3.0).min(max);
                    if cap <= base {
                        base
                    } else {
                        rand::thread_rng().gen_range(base..=cap)
                    }
                }
            }
        };

        Duration::from_secs_f64(delay.min(max).max(0.0))
    }

    /// Whether `attempt` (0-indexed) should be retried given `error`. Ports
    /// `RetryPolicy.should_retry`: rate-limited errors always retry up to
    /// the attempt budget, non-recoverable errors never do, and — when the
    /// config's `retry_on` allow-list (§6) isn't empty — the error's type
    /// or carried status must also appear in it (spec §4.5 "an exception is
    /// retryable iff (a) it is not flagged non-recoverable AND (b) its type
    /// is in the set").
    pub fn should_retry(&self, error: &VenomError, attempt: u32) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        if error.is_rate_limited() {
            return true;
        }
        if !error.recoverable() {
            return false;
        }
        self.matches_retry_on(error)
    }

    /// Whether `error` is in the configured `retry_on` allow-list. An empty
    /// allow-list (the default) imposes no restriction beyond `recoverable`.
    fn matches_retry_on(&self, error: &VenomError) -> bool {
        let has_allow_list =
            !self.config.retryable_status_codes.is_empty() || !self.config.retryable_exception_set.is_empty();
        if !has_allow_list {
            return true;
        }
        if let Some(status) = error.status_code() {
            if self.config.is_retryable_status(status) {
                return true;
            }
        }
        self.config.is_retryable_exception(error.exception_kind())
    }

    fn delay_for(&self, error: &VenomError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after;
        }
        self.calculate_delay(attempt)
    }

    /// Runs `operation`, retrying on recoverable failures until it succeeds
    /// or the attempt budget is exhausted, in which case a
    /// [`VenomError::RetryExhausted`] wrapping the last error is returned.
    pub async fn execute_async<T, F, Fut>(&self, mut operation: F) -> VenomResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VenomResult<T>>,
    {
        let mut last_error: Option<VenomError> = None;

        for attempt in 0..self.config.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    if attempt + 1 < self.config.max_attempts {
                        let delay = self.delay_for(&err, attempt);
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(VenomError::RetryExhausted {
            attempts: self.config.max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            context: ErrorContext::new(),
        })
    }
}

/// Sensible defaults mirroring `create_default_retry_policy`.
pub fn default_retry_policy(max_attempts: u32, base_delay: Duration) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        base_delay,
        ..RetryConfig::default()
    })
}
