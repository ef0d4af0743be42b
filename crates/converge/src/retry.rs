//! Retry logic with exponential backoff for provider calls.

use crate::context::CancelToken;
use crate::error::ProviderError;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Longest stretch a backoff sleeps without looking at the cancel token
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Retry behaviour for transient provider errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Execute an operation with retry logic.
///
/// `operation` receives the 0-indexed attempt number. Retryable errors are
/// retried with exponential backoff; `on_retry` is told about every retry
/// before the delay. A cancelled token stops further attempts, also when it
/// fires in the middle of a backoff.
pub fn with_retry<T, F, R>(
    config: &RetryConfig,
    cancel: &CancelToken,
    mut on_retry: R,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Result<T, ProviderError>,
    R: FnMut(u32, &ProviderError, Duration),
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt + 1 >= attempts {
                    return Err(e);
                }
                if cancel.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }

                let delay = config.delay_for_attempt(attempt);
                on_retry(attempt + 1, &e, delay);
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(ProviderError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep for `delay`; returns `false` as soon as `cancel` fires.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Result of waiting on a provider call
#[derive(Debug)]
pub enum Waited<T> {
    Finished(Result<T, ProviderError>),
    /// Still running after the wait; its result can be collected later
    Running(PendingCall<T>),
}

/// A provider call that outlived its timeout
#[derive(Debug)]
pub struct PendingCall<T> {
    rx: mpsc::Receiver<Result<T, ProviderError>>,
}

impl<T> PendingCall<T> {
    /// Give the call up to `timeout` more to finish
    pub fn wait(self, timeout: Duration) -> Waited<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Waited::Finished(result),
            Err(RecvTimeoutError::Timeout) => Waited::Running(self),
            Err(RecvTimeoutError::Disconnected) => Waited::Finished(Err(panicked())),
        }
    }
}

fn panicked() -> ProviderError {
    ProviderError::permanent("provider call panicked")
}

/// Run `call` on its own thread and stop waiting after `timeout`
///
/// On timeout `abort` is cancelled so a cooperating driver can stop, and
/// the call is handed back as [`Waited::Running`]. Its late result stays
/// collectable through [`PendingCall::wait`].
pub fn call_with_timeout<T, F>(timeout: Duration, abort: &CancelToken, call: F) -> Waited<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // the receiver is gone once nobody waits for the result any more
        let _ = tx.send(call());
    });

    let waited = PendingCall { rx }.wait(timeout);
    if matches!(waited, Waited::Running(_)) {
        abort.cancel();
    }
    waited
}
