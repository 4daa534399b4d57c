mod error;

pub use error::{AttemptLog, AttemptRecord, Error};

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

/// Backoff settings of a [`RetryRunner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts before giving up, including the first.
    pub max_attempts: usize,

    /// Delay added per failed attempt.
    pub delay_factor: Duration,

    /// Upper bound of the delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay_factor: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Sleep after the given failed attempt: `min(delay_factor * attempt, max_delay)`.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.delay_factor.saturating_mul(factor).min(self.max_delay)
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs a job until it succeeds, sleeping with linear backoff between failures.
///
/// One instance runs at most one job at a time.
#[derive(Debug)]
pub struct RetryRunner<F> {
    job: F,
    config: RetryConfig,
    running: AtomicBool,
    attempt: AtomicUsize,
}

impl<F, Fut, T, E> RetryRunner<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Debug + Display,
{
    /// Creates a runner for a job.
    pub const fn new(job: F, config: RetryConfig) -> Self {
        Self {
            job,
            config,
            running: AtomicBool::new(false),
            attempt: AtomicUsize::new(0),
        }
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Failed attempts of the run in flight.
    pub fn attempt(&self) -> usize {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Runs the job.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRunning` if a run is in flight and `Error::Exhausted`
    /// with every failure once the attempt budget is spent.
    pub async fn run(&self) -> Result<T, Error<E>> {
        if self.running.swap(true, Ordering::SeqCst) {
            error!("runner is already in use");
            return Err(Error::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let max_attempts = self.config.max_attempts.max(1);
        let mut log = AttemptLog::default();
        self.attempt.store(0, Ordering::SeqCst);

        loop {
            debug!("running job");

            match (self.job)().await {
                Ok(result) => {
                    self.attempt.store(0, Ordering::SeqCst);
                    return Ok(result);
                }
                Err(e) => {
                    let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(attempt, max_attempts, error = %e, "job failed");
                    log.record(attempt, e);

                    if attempt >= max_attempts {
                        debug!(attempt, max_attempts, "runner exhausted");
                        self.attempt.store(0, Ordering::SeqCst);
                        return Err(Error::Exhausted(log));
                    }

                    let sleep = self.config.backoff(attempt);
                    debug!(sleep = ?sleep, "sleep");
                    tokio::time::sleep(sleep).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use assert_matches::assert_matches;
    use tokio::time::Instant;

    fn config(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_backoff_is_linear_and_capped() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1000));
        assert_eq!(config.backoff(59), Duration::from_millis(29_500));
        assert_eq!(config.backoff(61), Duration::from_secs(30));
        assert_eq!(config.backoff(usize::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = RetryRunner::new(
            || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err("not yet"),
                        _ => Ok("done"),
                    }
                }
            },
            config(3),
        );

        let start = Instant::now();
        let result = runner.run().await;

        let elapsed = start.elapsed();
        assert_eq!(result.unwrap(), "done");
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(runner.attempt(), 0);
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_keeps_every_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = RetryRunner::new(
            || {
                let calls = calls.clone();
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(format!("failure {call}"))
                }
            },
            config(3),
        );

        let start = Instant::now();
        let result = runner.run().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600));
        assert_matches!(result, Err(Error::Exhausted(log)) => {
            assert_eq!(log.len(), 3);
            let errors: Vec<_> = log.iter().map(|record| record.error.as_str()).collect();
            assert_eq!(errors, ["failure 0", "failure 1", "failure 2"]);
            let attempts: Vec<_> = log.iter().map(|record| record.attempt).collect();
            assert_eq!(attempts, [1, 2, 3]);
        });
        assert!(!runner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_is_rejected() {
        let runner = RetryRunner::new(
            || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, String>(())
            },
            config(3),
        );

        let (first, second) = tokio::join!(runner.run(), runner.run());

        assert!(first.is_ok());
        assert_matches!(second, Err(Error::AlreadyRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_is_reusable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = RetryRunner::new(
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                        Err("odd")
                    } else {
                        Ok(())
                    }
                }
            },
            config(2),
        );

        runner.run().await.unwrap();
        runner.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let runner = RetryRunner::new(|| async { Err::<(), _>("nope") }, config(0));

        assert_matches!(runner.run().await, Err(Error::Exhausted(log)) if log.len() == 1);
    }
}
