//! The resilience stack: retry with backoff, circuit breaking, per-operation
//! timeouts, and wait/poll helpers, composed the way `errors/retry.py`
//! composes them — a `ResilientClient` nesting a retry loop inside a
//! circuit breaker, so a trip short-circuits the whole retry loop rather
//! than letting it keep hammering a known-bad dependency.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;
pub mod wait;

use std::future::Future;
use std::sync::Arc;

use circuit_breaker::CircuitBreaker;
use retry::RetryPolicy;

use crate::errors::VenomResult;

/// Combines a retry policy with a circuit breaker. Ports
/// `errors/retry.py::ResilientClient`: `execute_async` wraps the breaker's
/// `call` around the retry policy's `execute_async`, so the breaker sees
/// one failure per exhausted retry loop rather than one per attempt.
pub struct ResilientClient {
    retry_policy: RetryPolicy,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ResilientClient {
    pub fn new(retry_policy: RetryPolicy, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry_policy, circuit_breaker }
    }

    pub async fn execute_async<T, F, Fut>(&self, operation: F) -> VenomResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = VenomResult<T>>,
    {
        let retry_policy = &self.retry_policy;
        self.circuit_breaker
            .call(|| retry_policy.execute_async(&operation))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorContext, VenomError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn resilient_client_retries_then_succeeds() {
        let client = ResilientClient::new(
            RetryPolicy::new(retry::RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            }),
            Arc::new(CircuitBreaker::new(10, Duration::from_secs(30), 3)),
        );

        let attempts = AtomicU32::new(0);
        let result = client
            .execute_async(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 1 {
                    Err(VenomError::ConnectionReset { context: ErrorContext::new() })
                } else {
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn breaker_trip_short_circuits_future_retry_loops() {
        let client = ResilientClient::new(
            RetryPolicy::new(retry::RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            }),
            Arc::new(CircuitBreaker::new(1, Duration::from_secs(30), 3)),
        );

        let _: VenomResult<()> = client
            .execute_async(|| async { Err(VenomError::ConnectionReset { context: ErrorContext::new() }) })
            .await;

        let attempts = AtomicU32::new(0);
        let result: VenomResult<()> = client
            .execute_async(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(VenomError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
