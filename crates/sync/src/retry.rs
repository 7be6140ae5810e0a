use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::DelaySchedule;

/// Explicit retry policy applied at call sites that talk to flaky external
/// endpoints.
///
/// `max_attempts` counts the first try: a policy of 3 runs the operation at
/// most three times. The `retryable` predicate is consulted on every
/// failure — error kinds exempted from retry fail immediately, and an
/// exhausted policy returns the last error unchanged for the caller's
/// classifier to handle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    schedule: DelaySchedule,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            schedule: DelaySchedule::fixed(delay),
        }
    }

    pub fn with_schedule(mut self, schedule: DelaySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<T, E, F, Fut, R>(&self, label: &str, retryable: R, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut schedule = self.schedule.clone();
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !retryable(&error) => {
                    warn!(%label, %error, "giving up: error kind is exempt from retry");
                    return Err(error);
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(
                        %label,
                        %error,
                        attempts = attempt,
                        "giving up after exhausting retry attempts"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = schedule.next_delay();
                    warn!(
                        %label,
                        %error,
                        attempt,
                        remaining = self.max_attempts - attempt,
                        delay_ms = delay.as_millis() as u64,
                        "operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    fn is_transient(e: &TestError) -> bool {
        matches!(e, TestError::Transient)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, TestError> = policy
            .run("test", is_transient, move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<u32, TestError> = policy
            .run("test", is_transient, move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, TestError> = policy
            .run("test", is_transient, move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
