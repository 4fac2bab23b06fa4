//! Bounded poll loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use landscape_core::LandscapeError;

use crate::policy::WaitPolicy;

pub type WaitResult<T, E> = Result<T, WaitError<T, E>>;

#[derive(Debug, Error)]
pub enum WaitError<T, E> {
    /// The predicate never held within the policy's bounds.
    #[error("{label} not reached within {elapsed:?} after {attempts} attempt(s)")]
    Timeout {
        label: String,
        elapsed: Duration,
        attempts: u32,
        last_value: Option<T>,
        last_error: Option<E>,
    },

    /// The supplier failed and the policy does not retry through errors.
    #[error("{0}")]
    Supplier(E),
}

impl<T> From<WaitError<T, LandscapeError>> for LandscapeError {
    fn from(err: WaitError<T, LandscapeError>) -> Self {
        match err {
            WaitError::Timeout {
                label,
                elapsed,
                last_error,
                ..
            } => LandscapeError::HealthTimeout {
                label,
                elapsed,
                last_error: last_error.map(|e| e.to_string()),
            },
            WaitError::Supplier(e) => e,
        }
    }
}

/// Poll `supplier` until `predicate` accepts its value.
///
/// Supplier errors end the wait immediately unless the policy retries on
/// error, in which case they are remembered and polling continues. When
/// the timeout or attempt budget runs out, the last value and last error
/// seen are handed back in [`WaitError::Timeout`]. A supplier call still
/// pending when the timeout elapses is dropped and counts as a timeout.
pub async fn wait<T, E, S, Fut, P>(
    label: &str,
    policy: &WaitPolicy,
    mut supplier: S,
    mut predicate: P,
) -> WaitResult<T, E>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
    E: fmt::Display,
{
    let start = Instant::now();
    let deadline = policy.timeout.map(|t| start + t);
    let mut attempts = 0u32;
    let mut last_value = None;
    let mut last_error = None;

    loop {
        attempts += 1;
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, supplier()).await.ok(),
            None => Some(supplier().await),
        };
        let Some(outcome) = outcome else {
            let elapsed = start.elapsed();
            warn!(label, attempts, ?elapsed, "supplier still pending at deadline");
            return Err(WaitError::Timeout {
                label: label.to_string(),
                elapsed,
                attempts,
                last_value,
                last_error,
            });
        };
        match outcome {
            Ok(value) if predicate(&value) => {
                debug!(
                    label,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "wait satisfied"
                );
                return Ok(value);
            }
            Ok(value) => last_value = Some(value),
            Err(e) if policy.retry_on_error => {
                debug!(label, attempts, error = %e, "supplier failed, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(WaitError::Supplier(e)),
        }

        let elapsed = start.elapsed();
        if policy.exhausted(attempts, elapsed) {
            warn!(label, attempts, ?elapsed, "wait timed out");
            return Err(WaitError::Timeout {
                label: label.to_string(),
                elapsed,
                attempts,
                last_value,
                last_error,
            });
        }

        let sleep_for = match policy.timeout {
            Some(timeout) => policy.interval.min(timeout.saturating_sub(elapsed)),
            None => policy.interval,
        };
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_accepted_value() {
        let calls = counter();
        let c = calls.clone();
        let policy = WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(5));

        let value: u32 = wait(
            "counter reaches 3",
            &policy,
            || {
                let c = c.clone();
                async move { Ok::<_, LandscapeError>(c.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            |v| *v >= 3,
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_interval_between_attempts() {
        let policy = WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(5));
        let start = Instant::now();
        let calls = counter();
        let c = calls.clone();

        wait(
            "third attempt",
            &policy,
            || {
                let c = c.clone();
                async move { Ok::<_, LandscapeError>(c.fetch_add(1, Ordering::SeqCst)) }
            },
            |v| *v == 2,
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn error_propagates_without_retry() {
        let calls = counter();
        let c = calls.clone();
        let policy = WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(5));

        let err = wait(
            "failing supplier",
            &policy,
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(LandscapeError::Remote("503".to_string())) }
            },
            |_| true,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Supplier(LandscapeError::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_errors() {
        let calls = counter();
        let c = calls.clone();
        let policy =
            WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(1)).retry_on_error();

        let value = wait(
            "flaky supplier",
            &policy,
            || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LandscapeError::Remote("connection refused".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await
        .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_carries_last_value_and_error() {
        let calls = counter();
        let c = calls.clone();
        let policy =
            WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(3)).retry_on_error();

        let err = wait(
            "never ready",
            &policy,
            || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Ok(false)
                    } else {
                        Err(LandscapeError::Remote(format!("attempt {n}")))
                    }
                }
            },
            |ready| *ready,
        )
        .await
        .unwrap_err();

        match err {
            WaitError::Timeout {
                label,
                elapsed,
                last_value,
                last_error,
                ..
            } => {
                assert_eq!(label, "never ready");
                assert_eq!(elapsed, Duration::from_secs(10));
                assert_eq!(last_value, Some(false));
                assert!(last_error.is_some());
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_limits_calls() {
        let calls = counter();
        let c = calls.clone();
        let policy = WaitPolicy::attempts(4, Duration::from_secs(30));

        let err = wait(
            "compare",
            &policy,
            || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, LandscapeError>(vec!["diff"]) }
            },
            |diffs| diffs.is_empty(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_budget_spends_every_attempt() {
        let calls = counter();
        let c = calls.clone();
        let policy = WaitPolicy::attempts(5, Duration::ZERO);

        let value = wait(
            "compare",
            &policy,
            || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, LandscapeError>(n) }
            },
            |n| *n == 3,
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_supplier_times_out_at_deadline() {
        let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();

        let err = tokio::time::timeout(
            Duration::from_secs(3600),
            wait(
                "stuck health check",
                &policy,
                || std::future::pending::<Result<bool, LandscapeError>>(),
                |ready| *ready,
            ),
        )
        .await
        .expect("wait must end at its own deadline")
        .unwrap_err();

        match err {
            WaitError::Timeout {
                elapsed, attempts, ..
            } => {
                assert_eq!(elapsed, Duration::from_secs(10));
                assert_eq!(attempts, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn converts_into_health_timeout() {
        let policy = WaitPolicy::new(Duration::from_secs(2), Duration::from_secs(1));
        let err: LandscapeError = wait(
            "master regatta42 ready",
            &policy,
            || async { Ok::<_, LandscapeError>(false) },
            |ready| *ready,
        )
        .await
        .unwrap_err()
        .into();

        match err {
            LandscapeError::HealthTimeout { label, .. } => {
                assert_eq!(label, "master regatta42 ready")
            }
            other => panic!("expected health timeout, got {other:?}"),
        }
    }
}
