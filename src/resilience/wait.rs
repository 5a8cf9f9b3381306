//! Wait/poll helpers: `wait_for` repeatedly evaluates a predicate until true
//! or the timeout elapses; `poll_until` calls a fetcher until its value
//! satisfies a condition, failing with [`VenomError::wait_timeout`] carrying
//! the attempt count and last fetched value.

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::errors::{VenomError, VenomResult};

/// Repeatedly evaluates `predicate` until it returns true or `timeout`
/// elapses. Returns `Ok(true)` on success; on timeout, returns `Ok(false)`
/// if `raise_on_timeout` is false, otherwise an `Err`.
pub async fn wait_for<F, Fut>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
    raise_on_timeout: bool,
) -> VenomResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if predicate().await {
            return Ok(true);
        }
        if started.elapsed() >= timeout {
            if raise_on_timeout {
                return Err(VenomError::wait_timeout(attempts, None, "wait_for predicate"));
            }
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Calls `fetcher` until `condition(value)` is true, returning that value.
/// On timeout, fails with [`VenomError::wait_timeout`] carrying the number
/// of attempts made and the last fetched value (JSON-rendered for the error
/// message).
pub async fn poll_until<T, F, Fut, C>(
    mut fetcher: F,
    condition: C,
    timeout: Duration,
    interval: Duration,
    description: &str,
) -> VenomResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VenomResult<T>>,
    C: Fn(&T) -> bool,
    T: Clone + Into<Value>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut last_value: Option<T> = None;

    loop {
        attempts += 1;
        let value = fetcher().await?;
        if condition(&value) {
            return Ok(value);
        }
        last_value = Some(value);

        if started.elapsed() >= timeout {
            return Err(VenomError::wait_timeout(
                attempts,
                last_value.map(|v| v.into().to_string()),
                description,
            ));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn wait_for_true_predicate_returns_immediately() {
        let result = wait_for(|| async { true }, Duration::from_secs(1), Duration::from_millis(1), true).await;
        assert_eq!(result.unwrap(), true);
    }

    #[tokio::test]
    async fn wait_for_false_predicate_times_out_without_raising() {
        let result = wait_for(
            || async { false },
            Duration::from_millis(10),
            Duration::from_millis(2),
            false,
        )
        .await;
        assert_eq!(result.unwrap(), false);
    }

    #[tokio::test]
    async fn wait_for_false_predicate_raises_when_asked() {
        let result = wait_for(
            || async { false },
            Duration::from_millis(10),
            Duration::from_millis(2),
            true,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn poll_until_returns_value_once_condition_is_met() {
        let calls = AtomicU32::new(0);
        let result = poll_until(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<i64, VenomError>(n as i64)
            },
            |v: &i64| *v >= 2,
            Duration::from_secs(1),
            Duration::from_millis(1),
            "counter reaches 2",
        )
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn poll_until_times_out_with_last_value_and_attempts() {
        let result = poll_until(
            || async { Ok::<i64, VenomError>(0) },
            |v: &i64| *v > 100,
            Duration::from_millis(10),
            Duration::from_millis(2),
            "value exceeds 100",
        )
        .await;

        match result {
            Err(VenomError::WaitTimeout { poll_attempts, last_value, .. }) => {
                assert!(poll_attempts >= 1);
                assert_eq!(last_value, Some("0".to_string()));
            }
            other => panic!("expected WaitTimeout, got {other:?}"),
        }
    }
}
