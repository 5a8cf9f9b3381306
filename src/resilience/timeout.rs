//! Per-operation timeout wrapper. Not present in the Python original as a
//! standalone helper (timeouts there are threaded through each HTTP call's
//! own `timeout` kwarg); promoted to a first-class combinator here so
//! `runner::execute_step` can budget a step's action independent of
//! whatever timeout its own HTTP client applies.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::errors::{VenomError, VenomResult};

/// Runs `operation`, failing with [`VenomError::step_timeout`] if it does
/// not complete within `budget`.
pub async fn with_timeout<T, F>(budget: Duration, description: &str, operation: F) -> VenomResult<T>
where
    F: Future<Output = VenomResult<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(budget, operation).await {
        Ok(result) => result,
        Err(_) => Err(VenomError::step_timeout(budget, started.elapsed(), description)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_budget() {
        let result = with_timeout(Duration::from_millis(50), "quick op", async { Ok::<_, VenomError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn exceeding_budget_yields_step_timeout() {
        let result: VenomResult<()> = with_timeout(Duration::from_millis(5), "slow op", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;

        match result {
            Err(VenomError::StepTimeout { operation, .. }) => assert_eq!(operation, "slow op"),
            other => panic!("expected StepTimeout, got {other:?}"),
        }
    }
}
