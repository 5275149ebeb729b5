//! Retry envelope for presence reads
//!
//! The typing facade re-reads presence after transient transport errors.
//! Its retry envelope: exponential backoff starting at 1 s, capped at 5 s
//! per attempt, full jitter over half the current delay, and a 30 s total
//! budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ErrorInfo;

/// Parameters of a retry envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, before jitter.
    pub max_delay: Duration,
    /// Total budget across all delays; once spent, the last error is returned.
    pub max_elapsed: Duration,
}

impl BackoffPolicy {
    /// The envelope used for presence reads during typing operations.
    pub fn presence_get() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::presence_get()
    }
}

/// Iterator-style backoff state.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    elapsed: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// The next delay to sleep, or `None` once the total budget is spent.
    ///
    /// The returned delay is the capped exponential base with full jitter
    /// applied to its upper half: uniform in `[base / 2, base]`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.elapsed >= self.policy.max_elapsed {
            return None;
        }
        let base = self
            .policy
            .initial_delay
            .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.policy.max_delay);
        self.attempt = self.attempt.saturating_add(1);

        let half = base / 2;
        let jitter_ms = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        let delay = half + Duration::from_millis(jitter_ms);

        // Never sleep past the total budget.
        let remaining = self.policy.max_elapsed - self.elapsed;
        let delay = delay.min(remaining);
        self.elapsed += delay;
        Some(delay)
    }
}

/// Drive an async operation through the envelope until it succeeds or the
/// budget is spent.
pub async fn retry_with_backoff<T, F, Fut>(policy: BackoffPolicy, mut operation: F) -> Result<T, ErrorInfo>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ErrorInfo>>,
{
    let mut backoff = Backoff::new(policy);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!(%error, delay_ms = delay.as_millis() as u64, "retrying after error");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            },
        }
    }
}
