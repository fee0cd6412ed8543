use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{ApiError, ClientOptions, Result};

/// Retry budget and backoff base for one logical call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub(crate) max_retries: usize,
    pub(crate) base_delay_ms: u64,
}

impl From<&ClientOptions> for RetryPolicy {
    fn from(options: &ClientOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            base_delay_ms: options.retry_backoff_ms,
        }
    }
}

/// Delay before retry number `attempt` (0-based):
/// `base * 2^attempt * (0.5 + jitter * 0.5)`, with `jitter` in `[0, 1)`.
pub(crate) fn backoff_delay(base_delay_ms: u64, attempt: usize, jitter: f64) -> Duration {
    let exp = attempt.min(16) as u32;
    let ceiling = base_delay_ms.saturating_mul(1u64 << exp) as f64;
    let factor = 0.5 + jitter.clamp(0.0, 1.0) * 0.5;
    Duration::from_micros((ceiling * factor * 1_000.0).round() as u64)
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. The last error is returned unchanged.
///
/// When `cancel` fires, the in-flight attempt or backoff sleep is abandoned
/// and [`ApiError::Cancelled`] is returned.
pub(crate) async fn run<F, Fut, T>(
    policy: RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0usize;
    loop {
        let outcome = until_cancelled(cancel, attempt()).await;
        match outcome {
            Err(err) if err.is_retryable() && retries < policy.max_retries => {
                let delay = backoff_delay(policy.base_delay_ms, retries, rand::random::<f64>());

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    error = %err,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );

                until_cancelled(cancel, async {
                    sleep(delay).await;
                    Ok(())
                })
                .await?;
                retries += 1;
            }
            other => return other,
        }
    }
}

async fn until_cancelled<T>(
    cancel: Option<&CancellationToken>,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::Cancelled),
                outcome = work => outcome,
            }
        }
        None => work.await,
    }
}
