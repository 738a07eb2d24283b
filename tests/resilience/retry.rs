//! Retry Policy Tests
//!
//! Attempt counting, backoff timing, classification and fallback through
//! the public API.

use crate::common::*;
use std::cell::Cell;

fn transient() -> Error {
    Error::Unavailable("connection reset".into())
}

#[test]
fn succeeds_on_third_attempt_after_two_delays() {
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay_ms(20)
            .with_multiplier(2.0),
    );
    let calls = Cell::new(0);
    let started = Instant::now();

    let outcome = policy
        .execute(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            },
            Error::classification,
        )
        .unwrap();

    assert_eq!(outcome.value, "done");
    assert_eq!(outcome.attempts, 3);
    assert!(!outcome.fallback_used);
    // 20ms then 40ms
    assert!(outcome.total_delay >= Duration::from_millis(60));
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn fatal_error_stops_immediately() {
    let policy = RetryPolicy::new(RetryConfig::new().with_base_delay_ms(1));
    let calls = Cell::new(0);

    let err = policy
        .execute(
            || {
                calls.set(calls.get() + 1);
                Err::<(), _>(Error::Validation("bad amount".into()))
            },
            Error::classification,
        )
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn caller_classifier_overrides_default() {
    // Only conflicts are retried; an otherwise retryable timeout is fatal here
    let policy = RetryPolicy::new(RetryConfig::new().with_base_delay_ms(1));
    let err = policy
        .execute(
            || {
                Err::<(), _>(Error::LockTimeout {
                    id: rid(1),
                    waited_ms: 5,
                })
            },
            |e: &Error| {
                if e.is_conflict() {
                    Classification::Retryable
                } else {
                    Classification::Fatal
                }
            },
        )
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn fallback_runs_only_on_exhaustion() {
    let policy = RetryPolicy::new(fast_retry(2));

    let outcome = policy
        .execute_with_fallback(|| Err(transient()), Error::classification, |_| Ok(0))
        .unwrap();
    assert!(outcome.fallback_used);
    assert_eq!(outcome.attempts, 2);

    let fallback_ran = Cell::new(false);
    let err = policy
        .execute_with_fallback(
            || Err::<i32, _>(Error::Validation("no".into())),
            Error::classification,
            |_| {
                fallback_ran.set(true);
                Ok(0)
            },
        )
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(!fallback_ran.get());
}

#[test]
fn cancellation_interrupts_backoff() {
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay_ms(5_000)
            .with_max_delay_ms(5_000),
    );
    let token = CancellationToken::new();
    let canceller = token.clone();
    let started = Instant::now();

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });
    let err = policy
        .execute_with_cancel(|| Err::<(), _>(transient()), Error::classification, &token)
        .unwrap_err();
    handle.join().unwrap();

    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn ledger_retry_metrics_aggregate() {
    let ledger = ledger([(1, 100), (2, 0)]);
    ledger.store().faults().fail_next(1);

    ledger
        .pessimistic_transfer(rid(1), rid(2), 10, &fast_retry(3))
        .unwrap();
    let _ = ledger.pessimistic_transfer(rid(1), rid(1), 10, &fast_retry(3));

    let metrics = ledger.retry_metrics();
    assert_eq!(metrics.total_attempts, 3);
    assert_eq!(metrics.total_successes, 1);
    assert_eq!(metrics.total_failures, 1);
    assert!((metrics.success_rate - 50.0).abs() < 1e-9);
}
