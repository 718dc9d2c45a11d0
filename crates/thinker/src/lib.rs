//! The Retry Controller ("Ralph Loop"): generic bounded retry with
//! exponential backoff and cooperative cancellation.
//!
//! Grounded in `runtime::client::DaemonClient::connect_with_backoff`
//! for the doubling-delay-capped-at-a-ceiling shape, and in
//! `original_source/src/deskflow/core/ralph.py`'s `RalphLoop` for the exact
//! state machine: an `is_running`/`current_attempt` introspection surface,
//! `cancel()`/`reset()`, and `execute(task, on_retry)` re-raising the last
//! error on exhaustion.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

/// {max_retries, initial_delay, backoff_factor, max_delay}.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Outcome of an exhausted or cancelled [`RetryController::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("ralph loop was cancelled")]
    Cancelled,
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted { attempts: usize, source: E },
}

/// Bounded retry with exponential backoff and a cooperative cancel signal,
/// observed both between attempts and during the backoff sleep.
///
/// One controller instance is reusable across calls to `execute` — each
/// call starts by resetting attempt/running state, matching the original
/// `reset()`-on-entry behavior.
pub struct RetryController {
    config: RetryConfig,
    cancel_requested: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    is_running: AtomicBool,
    current_attempt: AtomicUsize,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            is_running: AtomicBool::new(false),
            current_attempt: AtomicUsize::new(0),
        }
    }

    /// Whether the loop is currently executing.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Current retry attempt number (0-based).
    pub fn current_attempt(&self) -> usize {
        self.current_attempt.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the current (or next) execution.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        info!("retry controller cancel requested");
    }

    /// Clears cancellation and attempt state so the controller can be reused.
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.is_running.store(false, Ordering::SeqCst);
        self.current_attempt.store(0, Ordering::SeqCst);
    }

    /// Runs `task` up to `max_retries + 1` times. `on_retry(attempt, &error)`
    /// fires before each backoff sleep, with `attempt` the 0-based index of
    /// the failed try. Returns the task's success value, `Cancelled` if the
    /// cancel signal fires between attempts or during a backoff sleep, or
    /// `Exhausted` carrying the last error once retries run out.
    pub async fn execute<F, Fut, T, E>(&self, mut task: F, mut on_retry: Option<impl FnMut(usize, &E)>) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.reset();
        self.is_running.store(true, Ordering::SeqCst);

        let mut delay = self.config.initial_delay;
        let mut last_error: Option<E> = None;

        let outcome = 'attempts: loop {
            let attempt = self.current_attempt.load(Ordering::SeqCst);

            if self.cancel_requested.load(Ordering::SeqCst) {
                info!(attempt, "retry controller cancelled before attempt");
                break 'attempts Err(RetryError::Cancelled);
            }

            match task().await {
                Ok(value) => {
                    info!(attempt, total_attempts = attempt + 1, "retry controller succeeded");
                    break 'attempts Ok(value);
                }
                Err(err) => {
                    warn!(attempt, max_retries = self.config.max_retries, error = %err, "retry controller attempt failed");

                    if attempt >= self.config.max_retries {
                        last_error = Some(err);
                        break 'attempts Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            source: last_error.take().expect("just assigned"),
                        });
                    }

                    if let Some(callback) = on_retry.as_mut() {
                        callback(attempt, &err);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel_notify.notified() => {
                            info!(attempt, "retry controller cancelled during backoff");
                            break 'attempts Err(RetryError::Cancelled);
                        }
                    }
                    if self.cancel_requested.load(Ordering::SeqCst) {
                        break 'attempts Err(RetryError::Cancelled);
                    }

                    delay = Duration::from_secs_f64((delay.as_secs_f64() * self.config.backoff_factor).min(self.config.max_delay.as_secs_f64()));
                    self.current_attempt.fetch_add(1, Ordering::SeqCst);
                }
            }
        };

        self.is_running.store(false, Ordering::SeqCst);
        outcome
    }
}
