use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Linear backoff for replica reads: attempt `n` (1-based) is followed by a
/// sleep of `n * base_interval` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetryPolicy {
    pub attempts: u32,
    pub base_interval: Duration,
}

impl Default for ReadRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_interval: Duration::from_millis(500),
        }
    }
}

impl ReadRetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_interval * attempt
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug)]
pub enum ReadError<E> {
    Cancelled,
    /// Every replica attempt failed, then the single primary attempt failed.
    Failed { replica: E, primary: E },
}

/// Run `op` until it succeeds or `policy.attempts` runs are used up.
///
/// Every attempt and every sleep races `cancel`; cancellation wins ties.
pub async fn retry_linear<T, E, F, Fut>(
    policy: ReadRetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "read attempt failed");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Read from the replica under `policy`; once it is exhausted, try the
/// primary exactly once and return whatever it produces.
pub async fn read_with_fallback<T, E, R, RFut, P, PFut>(
    policy: ReadRetryPolicy,
    cancel: &CancellationToken,
    replica: R,
    primary: P,
) -> Result<T, ReadError<E>>
where
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<T, E>>,
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, E>>,
    E: Display,
{
    let replica_err = match retry_linear(policy, cancel, replica).await {
        Ok(value) => return Ok(value),
        Err(RetryError::Cancelled) => return Err(ReadError::Cancelled),
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::warn!(attempts, error = %last, "replica unavailable, reading from primary");
            last
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReadError::Cancelled),
        outcome = primary() => outcome.map_err(|primary| ReadError::Failed {
            replica: replica_err,
            primary,
        }),
    }
}
