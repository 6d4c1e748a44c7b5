//! Retry and cancellation primitives
//!
//! Connect attempts and presentation starts both run as bounded, cancelable
//! retry loops. Cancellation stops the *scheduling* of further attempts; an
//! attempt already in flight always runs to completion and its result is
//! discarded by the caller's completion check.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ClientResult};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Quick retries for transient signaling races
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Deliberate retries for connection establishment
    pub fn slow() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
            use_jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Handle over a cancelable retry loop
///
/// Cloneable; canceling an already-settled loop is a no-op. Built on a watch
/// channel so loops can both poll the flag between attempts and await a
/// cancellation that arrives mid-backoff.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        // send_replace stores the value even with no receiver subscribed.
        self.tx.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when `cancel()` is called; never resolves otherwise
    pub async fn canceled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return futures::future::pending().await;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry an operation with exponential backoff
///
/// Only errors classified recoverable ([`ClientError::is_recoverable`])
/// continue the loop; any other error settles the call immediately. The
/// cancel handle is checked between attempts and during backoff sleeps, and
/// a canceled loop rejects with the last attempt's error.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    cancel: &CancelHandle,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt,
            max_attempts = config.max_attempts,
            "attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                if cancel.is_canceled() {
                    debug!(operation = operation_name, attempt, "retry loop canceled");
                    return Err(e);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "recoverable error, will retry"
                );

                let actual_delay = if config.use_jitter {
                    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
                    Duration::from_millis((delay.as_millis() as f64 * (1.0 + jitter)) as u64)
                } else {
                    delay
                };

                tokio::select! {
                    _ = sleep(actual_delay) => {}
                    _ = cancel.canceled() => {
                        debug!(operation = operation_name, attempt, "retry loop canceled during backoff");
                        return Err(e);
                    }
                }

                let next_delay_ms =
                    (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.max_delay);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "operation failed after all retry attempts"
                    );
                } else {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    #[tokio::test]
    async fn retries_recoverable_errors_until_success() {
        let cancel = CancelHandle::new();
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff("test", fast(5), &cancel, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ClientError::transient_transport("handshake failed"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(assert_ok!(result), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_recoverable_error_settles_immediately() {
        let cancel = CancelHandle::new();
        let attempts = AtomicU32::new(0);

        let result: ClientResult<()> = retry_with_backoff("test", fast(5), &cancel, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::fatal_transport("authentication rejected"))
        })
        .await;

        assert_err!(result);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_rejects_with_last_error() {
        let cancel = CancelHandle::new();
        let attempts = AtomicU32::new(0);

        let result: ClientResult<()> = retry_with_backoff("test", fast(3), &cancel, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::transient_transport("handshake failed"))
        })
        .await;

        assert!(assert_err!(result).is_recoverable());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling_but_not_the_attempt() {
        let cancel = CancelHandle::new();
        let attempts = AtomicU32::new(0);
        cancel.cancel();

        let result: ClientResult<()> = retry_with_backoff("test", fast(5), &cancel, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::transient_transport("handshake failed"))
        })
        .await;

        assert!(result.is_err());
        // The first attempt still ran; only the retry scheduling was skipped.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_visible_without_a_parked_waiter() {
        let handle = CancelHandle::new();
        assert!(!handle.is_canceled());

        // No receiver exists at this point; the flag must still stick.
        handle.cancel();
        assert!(handle.is_canceled());

        // A waiter subscribing after the fact settles immediately.
        handle.canceled().await;
    }

    #[tokio::test]
    async fn canceling_a_settled_loop_is_a_no_op() {
        let cancel = CancelHandle::new();
        let result = retry_with_backoff("test", fast(3), &cancel, || async { Ok(1u32) }).await;
        assert_eq!(result.unwrap(), 1);
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_canceled());
    }
}
