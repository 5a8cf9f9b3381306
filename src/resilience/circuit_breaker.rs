//! Circuit breaker state machine. Ports
//! `errors/retry.py::CircuitState`/`CircuitStats`/`CircuitBreaker`.
//!
//! State lives behind a `tokio::sync::Mutex` rather than a std mutex (per
//! the crate's all-tokio resolution of the dual sync/async driver question):
//! `call` holds the lock across the guarded section while deciding whether
//! to admit the half-open probe, and that decision and the probe count
//! increment must be atomic with respect to other concurrent callers
//! without blocking the executor thread.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::errors::{ErrorContext, VenomError, VenomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default)]
pub struct CircuitStats {
    pub failures: u32,
    pub successes: u32,
    pub last_failure_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub consecutive_failures: u32,
}

struct Inner {
    state: CircuitState,
    stats: CircuitStats,
    half_open_calls: u32,
}

/// Trips open after `failure_threshold` consecutive failures, holds for
/// `recovery_timeout`, then allows `half_open_max_calls` probe attempts
/// through before closing again. The transition from OPEN to HALF_OPEN is
/// evaluated lazily on each `state()`/`call` rather than on a timer, porting
/// `CircuitBreaker.state`'s property-getter check.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_calls,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                stats: CircuitStats::default(),
                half_open_calls: 0,
            }),
        }
    }

    /// Current state, lazily transitioning OPEN -> HALF_OPEN once the
    /// recovery timeout has elapsed since the last failure.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub async fn is_closed(&self) -> bool {
        self.state().await == CircuitState::Closed
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    pub async fn is_half_open(&self) -> bool {
        self.state().await == CircuitState::HalfOpen
    }

    pub async fn stats(&self) -> CircuitStats {
        self.inner.lock().await.stats.clone()
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.stats.last_failure_at {
                if last_failure.elapsed() >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                }
            }
        }
    }

    fn check(&self, inner: &mut Inner) -> VenomResult<()> {
        self.maybe_transition_to_half_open(inner);

        match inner.state {
            CircuitState::Open => Err(VenomError::CircuitOpen {
                failures_count: inner.stats.failures,
                reset_timeout: self.recovery_timeout,
                context: ErrorContext::new(),
            }),
            CircuitState::HalfOpen if inner.half_open_calls >= self.half_open_max_calls => {
                Err(VenomError::CircuitOpen {
                    failures_count: inner.stats.failures,
                    reset_timeout: self.recovery_timeout,
                    context: ErrorContext::new(),
                })
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls += 1;
                Ok(())
            }
            CircuitState::Closed => Ok(()),
        }
    }

    fn record_success(&self, inner: &mut Inner) {
        inner.stats.successes += 1;
        inner.stats.last_success_at = Some(Instant::now());
        inner.stats.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.stats = CircuitStats {
                last_success_at: inner.stats.last_success_at,
                ..CircuitStats::default()
            };
        }
    }

    fn record_failure(&self, inner: &mut Inner) {
        inner.stats.failures += 1;
        inner.stats.last_failure_at = Some(Instant::now());
        inner.stats.consecutive_failures += 1;

        match inner.state {
            CircuitState::HalfOpen => inner.state = CircuitState::Open,
            CircuitState::Closed if inner.stats.consecutive_failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Runs `operation` through the breaker: rejects immediately with
    /// [`VenomError::CircuitOpen`] while open, otherwise records the
    /// outcome and updates the state machine. The lock is released before
    /// `operation` runs and re-acquired to record the outcome, so it is
    /// never held across the caller's own await points.
    pub async fn call<T, F, Fut>(&self, operation: F) -> VenomResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VenomResult<T>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.check(&mut inner)?;
        }

        match operation().await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                self.record_success(&mut inner);
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                self.record_failure(&mut inner);
                Err(err)
            }
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats = CircuitStats::default();
        inner.state = CircuitState::Closed;
        inner.half_open_calls = 0;
    }

    pub async fn trip(&self) {
        let mut inner = self.inner.lock().await;
        inner.stats.last_failure_at = Some(Instant::now());
        inner.state = CircuitState::Open;
    }
}

pub fn default_circuit_breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
    CircuitBreaker::new(failure_threshold, recovery_timeout, 3)
}

/// Default parameters a name gets its breaker constructed with the first
/// time it's looked up without a pre-declared configuration (spec §4.5 "A
/// registry maps a name ... to a breaker ... unknown names create with
/// defaults on first use").
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerDefaults {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Process-wide map from a service identifier (e.g. `"payment-api"`) to its
/// own [`CircuitBreaker`], per spec §4.5/§9: a breaker registry keyed by
/// name so independent downstream dependencies trip independently, but the
/// registry itself is an explicit owned field passed into whatever
/// constructs it rather than a module-level global (spec §9 "Global
/// state" — "the breaker registry becomes an owned field of the resilience
/// configuration, created per test run").
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerDefaults,
    declared: HashMap<String, CircuitBreakerDefaults>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerDefaults) -> Self {
        Self {
            defaults,
            declared: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-declares the parameters a given name's breaker should be created
    /// with, before it is first looked up.
    pub fn declare(&mut self, name: impl Into<String>, params: CircuitBreakerDefaults) {
        self.declared.insert(name.into(), params);
    }

    /// Returns the breaker for `name`, creating it (from its declared
    /// parameters, or the registry's defaults) on first use.
    pub async fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }
        let params = self.declared.get(name).copied().unwrap_or(self.defaults);
        let breaker = Arc::new(CircuitBreaker::new(
            params.failure_threshold,
            params.recovery_timeout,
            params.half_open_max_calls,
        ));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Names of every breaker created so far.
    pub async fn names(&self) -> Vec<String> {
        self.breakers.lock().await.keys().cloned().collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30), 1);
        for _ in 0..2 {
            let _: VenomResult<()> = breaker
                .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
                .await;
        }
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_calls() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30), 1);
        let _: VenomResult<()> = breaker
            .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;
        assert!(breaker.is_open().await);

        let result: VenomResult<()> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(VenomError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_closes_again_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1), 2);
        let _: VenomResult<()> = breaker
            .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;
        assert!(breaker.is_open().await);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(breaker.is_half_open().await);

        let result: VenomResult<i32> = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert!(breaker.is_closed().await);
    }

    #[tokio::test]
    async fn half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1), 2);
        let _: VenomResult<()> = breaker
            .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(breaker.is_half_open().await);

        let _: VenomResult<()> = breaker
            .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn trip_forces_open_regardless_of_failure_count() {
        let breaker = CircuitBreaker::new(10, Duration::from_secs(30), 1);
        breaker.trip().await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn registry_creates_unknown_names_with_defaults() {
        let registry = CircuitBreakerRegistry::default();
        let breaker = registry.get("unseen-service").await;
        assert!(breaker.is_closed().await);
        assert_eq!(registry.names().await, vec!["unseen-service".to_string()]);
    }

    #[tokio::test]
    async fn registry_uses_declared_params_for_a_name() {
        let mut registry = CircuitBreakerRegistry::new(CircuitBreakerDefaults::default());
        registry.declare(
            "payment-api",
            CircuitBreakerDefaults {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(15),
                half_open_max_calls: 1,
            },
        );
        let breaker = registry.get("payment-api").await;
        let _: VenomResult<()> = breaker
            .call(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn registry_returns_same_breaker_instance_for_repeated_lookups() {
        let registry = CircuitBreakerRegistry::default();
        let first = registry.get("svc").await;
        first.trip().await;
        let second = registry.get("svc").await;
        assert!(second.is_open().await);
    }
}
