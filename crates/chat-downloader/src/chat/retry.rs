//! Retry-with-backoff shared by every site.
//!
//! Sites call [`retry`] from inside their polling loops after a transient
//! failure. The call either sleeps according to the [`RetryTimeout`] policy or
//! fails with [`ChatError::RetriesExceeded`] once the attempt budget is spent.
//! Every wait is interruptible through the stream's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum RetryTimeout {
    /// 0s after the first failure, then `2^(n-2)` seconds.
    #[default]
    Exponential,
    /// Always wait this long.
    Fixed(Duration),
    /// Block until a line is entered on stdin.
    Interactive,
}

impl RetryTimeout {
    /// Interpret a raw seconds value: negative or non-finite means interactive.
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds.is_finite() && seconds >= 0.0 {
            Self::Fixed(Duration::from_secs_f64(seconds))
        } else {
            Self::Interactive
        }
    }
}

/// Delay before the next attempt under exponential backoff.
pub fn backoff_delay(attempt_number: u32) -> Duration {
    if attempt_number <= 1 {
        return Duration::ZERO;
    }
    let exp = (attempt_number - 2).min(30);
    Duration::from_secs(1u64 << exp)
}

/// Sleep for `duration` unless the token is cancelled first.
pub async fn interruptible_sleep(duration: Duration, token: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return if token.is_cancelled() {
            Err(ChatError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = token.cancelled() => Err(ChatError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Record a failed attempt and wait before the next one.
///
/// Fails with [`ChatError::RetriesExceeded`] when `attempt_number >=
/// max_attempts`, and with [`ChatError::Cancelled`] if the wait is
/// interrupted.
pub async fn retry(
    attempt_number: u32,
    max_attempts: u32,
    error: &ChatError,
    retry_timeout: RetryTimeout,
    token: &CancellationToken,
) -> Result<()> {
    if attempt_number >= max_attempts {
        return Err(ChatError::RetriesExceeded {
            attempts: max_attempts,
            last_error: error.to_string(),
        });
    }

    let description = match retry_timeout {
        RetryTimeout::Exponential | RetryTimeout::Fixed(_) => {
            let delay = match retry_timeout {
                RetryTimeout::Fixed(d) => d,
                _ => backoff_delay(attempt_number),
            };
            format!("Retrying in {:.1}s", delay.as_secs_f64())
        }
        RetryTimeout::Interactive => "Press Enter to retry".to_string(),
    };

    warn!(
        attempt = attempt_number,
        max_attempts,
        error = %error,
        "{description}"
    );
    if let ChatError::UnexpectedHtml { html, .. } = error {
        debug!(html = %html, "Unexpected page content");
    }

    match retry_timeout {
        RetryTimeout::Exponential => interruptible_sleep(backoff_delay(attempt_number), token).await,
        RetryTimeout::Fixed(delay) => interruptible_sleep(delay, token).await,
        RetryTimeout::Interactive => wait_for_input(token).await,
    }
}

/// Run `op` until it succeeds, retrying transient failures through [`retry`].
///
/// Non-retryable errors are returned immediately.
pub async fn with_retries<T, F, Fut>(
    max_attempts: u32,
    retry_timeout: RetryTimeout,
    token: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                retry(attempt, max_attempts, &e, retry_timeout, token).await?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn wait_for_input(token: &CancellationToken) -> Result<()> {
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = token.cancelled() => Err(ChatError::Cancelled),
        read = stdin.read_line(&mut line) => {
            read?;
            Ok(())
        }
    }
}
