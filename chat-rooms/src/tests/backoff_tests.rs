//! Tests for the presence-read retry envelope

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;

use crate::backoff::{Backoff, BackoffPolicy, retry_with_backoff};
use crate::error::ErrorInfo;

proptest! {
    /// *For any* run of the envelope, every delay SHALL sit within the
    /// jitter window of its capped exponential base, the cumulative sleep
    /// SHALL not exceed the total budget, and the envelope SHALL end.
    #[test]
    fn prop_delays_respect_envelope(_seed in 0u32..64) {
        let policy = BackoffPolicy::presence_get();
        let mut backoff = Backoff::new(policy);
        let mut total = Duration::ZERO;
        let mut attempt = 0u32;

        while let Some(delay) = backoff.next_delay() {
            let base = policy
                .initial_delay
                .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
                .min(policy.max_delay);
            prop_assert!(delay <= base, "delay {delay:?} above base {base:?}");
            total += delay;
            prop_assert!(total <= policy.max_elapsed, "budget exceeded: {total:?}");
            attempt += 1;
            prop_assert!(attempt < 128, "envelope did not terminate");
        }

        // Full jitter halves the delay at worst, so the budget admits at
        // most ~2x the minimal-schedule attempt count.
        prop_assert!(attempt >= 7, "too few attempts for a 30s budget: {attempt}");
        prop_assert!(attempt <= 64, "too many attempts for a 30s budget: {attempt}");
    }

    /// The first delay comes from a 1-second base regardless of jitter.
    #[test]
    fn prop_first_delay_within_initial_window(_seed in 0u32..64) {
        let mut backoff = Backoff::new(BackoffPolicy::presence_get());
        let first = backoff.next_delay().unwrap();
        prop_assert!(first >= Duration::from_millis(500));
        prop_assert!(first <= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn retry_succeeds_once_the_operation_does() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(BackoffPolicy::presence_get(), move || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ErrorInfo::new(50_000u32, 500, "presence not ready"))
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_the_total_budget() {
    let started = tokio::time::Instant::now();

    let result: Result<(), _> = retry_with_backoff(BackoffPolicy::presence_get(), || async {
        Err(ErrorInfo::new(50_000u32, 500, "still not ready"))
    })
    .await;

    let error = result.unwrap_err();
    assert_eq!(error.code, 50_000);
    // All delays were slept and the budget is an upper bound on their sum.
    assert!(started.elapsed() <= Duration::from_secs(31));
    assert!(started.elapsed() >= Duration::from_secs(25));
}
