//! Guarded Call Tests
//!
//! The breaker decides before the retry loop runs, and a retried call is one
//! breaker outcome.

use crate::common::*;
use std::cell::Cell;

#[test]
fn open_breaker_prevents_every_attempt() {
    let ledger = ledger([(1, 100)]);
    ledger.force_circuit_state("debit", CircuitState::Open);
    let calls = Cell::new(0);
    let started = Instant::now();

    let err = ledger
        .guarded_call(
            "debit",
            || {
                calls.set(calls.get() + 1);
                Ok(())
            },
            &RetryConfig::new().with_base_delay_ms(1_000),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        Error::CircuitOpen {
            state: CircuitState::Open,
            ..
        }
    ));
    assert_eq!(calls.get(), 0);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn retried_success_is_one_breaker_success() {
    let ledger = ledger([(1, 100)]);
    let calls = Cell::new(0);

    let value = ledger
        .guarded_call(
            "flaky",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(Error::Unavailable("blip".into()))
                } else {
                    Ok(42)
                }
            },
            &fast_retry(5),
        )
        .unwrap();

    assert_eq!(value, 42);
    let metrics = ledger.circuit_metrics("flaky");
    assert_eq!(metrics.buffered_calls, 1);
    assert_eq!(metrics.successful_calls, 1);
    assert_eq!(metrics.failed_calls, 0);
}

#[test]
fn repeated_failures_trip_the_breaker() {
    let ledger = Ledger::builder()
        .circuit(small_window())
        .in_memory([(1, 100)])
        .unwrap();

    for _ in 0..5 {
        let err = ledger
            .guarded_call(
                "down",
                || Err::<(), _>(Error::Unavailable("offline".into())),
                &fast_retry(2),
            )
            .unwrap_err();
        assert!(err.is_exhausted());
    }

    assert_eq!(ledger.circuit_metrics("down").state, CircuitState::Open);
    let err = ledger
        .guarded_call("down", || Ok(()), &fast_retry(2))
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(ledger.circuit_metrics("down").not_permitted_calls, 1);
}

#[test]
fn breakers_are_isolated_by_name() {
    let ledger = ledger([(1, 100)]);
    ledger.force_circuit_state("a", CircuitState::Open);

    assert!(ledger.guarded_call("a", || Ok(()), &fast_retry(1)).is_err());
    assert!(ledger.guarded_call("b", || Ok(()), &fast_retry(1)).is_ok());

    ledger.reset_circuit("a");
    assert!(ledger.guarded_call("a", || Ok(()), &fast_retry(1)).is_ok());
}

#[test]
fn global_breakers_are_shared_between_ledgers() {
    let a = Ledger::builder().global_circuits().in_memory([(1, 0)]).unwrap();
    let b = Ledger::builder().global_circuits().in_memory([(1, 0)]).unwrap();

    a.force_circuit_state("guarded-global-shared", CircuitState::Open);
    assert_eq!(
        b.circuit_metrics("guarded-global-shared").state,
        CircuitState::Open
    );
    a.reset_circuit("guarded-global-shared");
}

#[test]
fn guarded_transfer_with_store_faults() {
    let ledger = ledger([(1, 100), (2, 0)]);
    ledger.store().faults().fail_next(2);

    let receipt = ledger
        .guarded_call(
            "transfer",
            || ledger.pessimistic().transfer(rid(1), rid(2), 40),
            &fast_retry(3),
        )
        .unwrap();

    assert_eq!(receipt.to_balance, 40);
    assert_eq!(ledger.store().faults().injected(), 2);
    assert_eq!(ledger.circuit_metrics("transfer").successful_calls, 1);
}

#[test]
fn panicking_half_open_call_does_not_wedge_breaker() {
    let ledger = Ledger::builder()
        .circuit(
            small_window()
                .with_wait_duration_ms(20)
                .with_permitted_probe_calls(1),
        )
        .in_memory([(1, 100)])
        .unwrap();
    ledger.force_circuit_state("op", CircuitState::Open);
    thread::sleep(Duration::from_millis(40));

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = ledger.guarded_call("op", || -> Result<()> { panic!("driver crashed") }, &fast_retry(1));
    }));
    assert!(panicked.is_err());
    assert_eq!(ledger.circuit_metrics("op").state, CircuitState::Open);

    thread::sleep(Duration::from_millis(40));
    assert_eq!(ledger.guarded_call("op", || Ok(1), &fast_retry(1)).unwrap(), 1);
    assert_eq!(ledger.circuit_metrics("op").state, CircuitState::Closed);
}

#[test]
fn single_failure_reports_no_rate_yet() {
    let ledger = ledger([(1, 100)]);
    let _ = ledger.guarded_call(
        "sparse",
        || Err::<(), _>(Error::Unavailable("offline".into())),
        &fast_retry(1),
    );

    let metrics = ledger.circuit_metrics("sparse");
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.failed_calls, 1);
    assert_eq!(metrics.failure_rate, None);
}
