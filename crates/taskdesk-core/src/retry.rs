//! Bounded retry with linear backoff for bootstrap fetches.
//!
//! Transient failures are retried after `base_delay * (attempt + 1)`; a
//! server that is down ends the run at once. Progress is published on a
//! `watch` channel and, optionally, as a request-registry flag held for the
//! whole run.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ApiErrorKind, ApiResult};
use crate::config::BootstrapConfig;
use crate::registry::RequestRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    /// Wait before retrying after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BootstrapConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Running,
    Waiting { delay: Duration },
    Succeeded,
    Failed,
}

/// Snapshot of a run, for "retrying (k/n)" displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProgress {
    /// Retries performed so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub phase: RetryPhase,
}

impl RetryProgress {
    pub fn is_retrying(&self) -> bool {
        self.attempt > 0 && matches!(self.phase, RetryPhase::Running | RetryPhase::Waiting { .. })
    }
}

impl fmt::Display for RetryProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            RetryPhase::Idle => write!(f, "idle"),
            RetryPhase::Running if self.attempt == 0 => write!(f, "loading"),
            RetryPhase::Running => write!(f, "retrying ({}/{})", self.attempt, self.max_attempts),
            RetryPhase::Waiting { delay } => write!(
                f,
                "retrying ({}/{}) in {}s",
                self.attempt,
                self.max_attempts,
                delay.as_secs()
            ),
            RetryPhase::Succeeded => write!(f, "ready"),
            RetryPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The server is down; retrying would not help
    Unavailable(ApiError),
    /// Every allowed retry failed transiently
    Exhausted { attempts: u32, last: ApiError },
    /// A non-retryable failure such as a validation error
    Rejected(ApiError),
    Cancelled,
}

impl RetryError {
    /// The underlying API failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            RetryError::Unavailable(e) | RetryError::Rejected(e) => Some(e),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled => None,
        }
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Unavailable(e) => write!(f, "Service unavailable: {e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "Gave up after {attempts} attempts: {last}")
            }
            RetryError::Rejected(e) => write!(f, "{e}"),
            RetryError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for RetryError {}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    progress: watch::Sender<RetryProgress>,
    cancel: CancellationToken,
    flag: Option<(RequestRegistry, &'static str)>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        let (progress, _) = watch::channel(RetryProgress {
            attempt: 0,
            max_attempts: policy.max_attempts,
            phase: RetryPhase::Idle,
        });
        Self {
            policy,
            progress,
            cancel: CancellationToken::new(),
            flag: None,
        }
    }

    /// Holds `key` loading in `registry` while a run is in progress.
    #[must_use]
    pub fn with_flag(mut self, registry: RequestRegistry, key: &'static str) -> Self {
        self.flag = Some((registry, key));
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn progress(&self) -> RetryProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetryProgress> {
        self.progress.subscribe()
    }

    /// Stops the current run at its next backoff wait. Later runs start
    /// cancelled too.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Calls `operation` with the retry number until it succeeds or the
    /// policy gives up.
    ///
    /// # Errors
    /// Returns the [`RetryError`] describing why the run stopped.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let _guard = self
            .flag
            .as_ref()
            .map(|(registry, key)| registry.begin(key));
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                self.publish(attempt, RetryPhase::Failed);
                return Err(RetryError::Cancelled);
            }

            self.publish(attempt, RetryPhase::Running);
            let err = match operation(attempt).await {
                Ok(value) => {
                    self.publish(attempt, RetryPhase::Succeeded);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let outcome = match err.kind {
                ApiErrorKind::ServerUnavailable => Some(RetryError::Unavailable(err)),
                kind if !kind.is_transient() => Some(RetryError::Rejected(err)),
                _ if attempt >= self.policy.max_attempts => Some(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: err,
                }),
                _ => {
                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient failure, retrying: {err}"
                    );
                    self.publish(attempt, RetryPhase::Waiting { delay });

                    tokio::select! {
                        () = self.cancel.cancelled() => Some(RetryError::Cancelled),
                        () = tokio::time::sleep(delay) => None,
                    }
                }
            };

            if let Some(outcome) = outcome {
                tracing::debug!(attempt, "retry run stopped: {outcome}");
                self.publish(attempt, RetryPhase::Failed);
                return Err(outcome);
            }
        }
    }

    fn publish(&self, attempt: u32, phase: RetryPhase) {
        self.progress.send_replace(RetryProgress {
            attempt,
            max_attempts: self.policy.max_attempts,
            phase,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;
    use crate::registry::keys;

    fn transient() -> ApiError {
        ApiError::new(ApiErrorKind::TransientNetwork, "timed out")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(2000))
    }

    /// Records the paused-clock offset of each invocation.
    fn timeline() -> (Arc<Mutex<Vec<Duration>>>, Instant) {
        (Arc::new(Mutex::new(Vec::new())), Instant::now())
    }

    #[test]
    fn test_delays_grow_linearly() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_give_up() {
        let retrier = Retrier::new(policy());
        let (calls, start) = timeline();

        let result: Result<(), _> = retrier
            .run(|_| {
                calls.lock().unwrap().push(start.elapsed());
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 4, .. })
        ));
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        for (actual, expected_ms) in calls.iter().zip([0, 2000, 6000, 12000]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(
                *actual >= expected && *actual < expected + Duration::from_millis(5),
                "attempt at {actual:?}, expected {expected:?}"
            );
        }
        assert_eq!(retrier.progress().phase, RetryPhase::Failed);
        assert_eq!(retrier.progress().attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_unavailable_stops_immediately() {
        let retrier = Retrier::new(policy());
        let (calls, start) = timeline();

        let result: Result<(), _> = retrier
            .run(|_| {
                calls.lock().unwrap().push(start.elapsed());
                async { Err(ApiError::new(ApiErrorKind::ServerUnavailable, "refused")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Unavailable(_))));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_not_retried() {
        let retrier = Retrier::new(policy());
        let mut calls = 0;

        let result: Result<(), _> = retrier
            .run(|_| {
                calls += 1;
                async { Err(ApiError::validation("bad request")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Rejected(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry_reports_attempt() {
        let retrier = Retrier::new(policy());
        let mut rx = retrier.subscribe();

        let value = retrier
            .run(|attempt| async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        let progress = *rx.borrow_and_update();
        assert_eq!(progress.phase, RetryPhase::Succeeded);
        assert_eq!(progress.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let retrier = Arc::new(Retrier::new(policy()));
        let mut rx = retrier.subscribe();

        let runner = Arc::clone(&retrier);
        let handle = tokio::spawn(async move {
            runner
                .run(|_| async { Err::<(), _>(transient()) })
                .await
        });

        rx.wait_for(|p| matches!(p.phase, RetryPhase::Waiting { .. }))
            .await
            .unwrap();
        assert_eq!(rx.borrow().to_string(), "retrying (1/3) in 2s");
        retrier.cancel();

        assert_eq!(handle.await.unwrap(), Err(RetryError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_held_for_whole_run() {
        let registry = RequestRegistry::new();
        let retrier = Retrier::new(policy()).with_flag(registry.clone(), keys::GOOGLE_CLIENT_ID);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = registry.subscribe(keys::GOOGLE_CLIENT_ID, move |v| sink.lock().unwrap().push(v));

        let flag_during = Mutex::new(Vec::new());
        retrier
            .run(|attempt| {
                flag_during
                    .lock()
                    .unwrap()
                    .push(registry.is_loading(keys::GOOGLE_CLIENT_ID));
                async move {
                    if attempt == 0 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*flag_during.lock().unwrap(), vec![true, true]);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }
}
