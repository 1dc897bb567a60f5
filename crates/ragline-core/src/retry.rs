//! Bounded exponential backoff for calls that cross the network boundary.
//!
//! Only errors that report themselves as transient are retried; the last
//! error is returned unchanged once attempts run out.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};

/// Errors that know whether another attempt might succeed.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl Retryable for Error {
    fn is_transient(&self) -> bool {
        Error::is_transient(self)
    }
}

/// One failed remote call. The client decides `transient` from the transport
/// failure or HTTP status; `error` is what the caller finally sees.
#[derive(Debug)]
pub struct CallError {
    pub error: Error,
    pub transient: bool,
}

impl CallError {
    pub fn transient(error: Error) -> Self {
        Self { error, transient: true }
    }

    pub fn terminal(error: Error) -> Self {
        Self { error, transient: false }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

impl Retryable for CallError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<CallError> for Error {
    fn from(call: CallError) -> Self {
        call.error
    }
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self { max_retries, base_delay_ms, ..Self::default() }
    }

    /// No retries at all; the first error is final.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn run<F, Fut, T, E>(&self, what: &str, mut operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "{what} failed, retrying");
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay_ms);
        let ms = if self.jitter && capped > 0 {
            // ±25%
            let spread = (capped / 4) as f64;
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
            (capped as f64 + offset).max(0.0) as u64
        } else {
            capped
        };
        Duration::from_millis(ms)
    }
}

/// Run `fut` under an optional deadline; on expiry produce `on_timeout`.
pub async fn with_timeout<T, Fut>(
    timeout: Option<Duration>,
    fut: Fut,
    on_timeout: impl FnOnce(Duration) -> Error,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}
