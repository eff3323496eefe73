//! Bounded retry with a fixed backoff schedule.
//!
//! One attempt is made up front; each transient failure consumes the next
//! backoff step. Permanent failures are returned untouched after the first
//! attempt. Sleeping goes through [`Sleeper`] so tests can run the schedule
//! without real delays.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Delays between attempts: 1s, 2s, 3s.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
];

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real sleeping on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: usize, last: E },
    /// A non-transient error; no retry was made after it.
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Permanent(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Permanent(e) => e.source(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF.to_vec())
    }
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    /// Runs `op` until it succeeds, fails permanently, or the schedule is
    /// used up. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        sleeper: &dyn Sleeper,
        is_transient: C,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !is_transient(&err) {
                return Err(RetryError::Permanent(err));
            }
            let Some(delay) = self.backoff.get(attempt - 1).copied() else {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            sleeper.sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Timeout,
        Refused,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(e: &FakeError) -> bool {
        *e == FakeError::Timeout
    }

    #[tokio::test]
    async fn always_transient_exhausts_after_four_attempts() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(&sleeper, transient, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Timeout) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 4, last: FakeError::Timeout })
        ));
        assert_eq!(*sleeper.delays.lock().unwrap(), DEFAULT_BACKOFF.to_vec());
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(&sleeper, transient, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Refused) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent(FakeError::Refused))));
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let result = RetryPolicy::default()
            .run(&sleeper, transient, |attempt| async move {
                if attempt < 3 {
                    Err(FakeError::Timeout)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn no_retry_policy_makes_one_attempt() {
        let sleeper = RecordingSleeper::default();
        let result: Result<(), _> = RetryPolicy::none()
            .run(&sleeper, transient, |_| async { Err(FakeError::Timeout) })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }
}
