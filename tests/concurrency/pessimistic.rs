//! Pessimistic Transfer Tests
//!
//! Transfers are all-or-nothing and ascending lock order never deadlocks.

use crate::common::*;
use ledgerguard::scenarios;

#[test]
fn transfer_is_atomic() {
    let ledger = ledger([(1, 1000), (2, 500)]);
    let report = ledger
        .pessimistic_transfer(rid(1), rid(2), 300, &fast_retry(3))
        .unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(report.receipt.from_balance, 700);
    assert_eq!(report.receipt.to_balance, 800);
    assert_eq!(ledger.store().total_balance(), 1500);
}

#[test]
fn failed_commit_applies_nothing() {
    let ledger = ledger([(1, 1000), (2, 500)]);
    ledger.store().faults().fail_next(1);

    let err = ledger
        .pessimistic_transfer(rid(1), rid(2), 300, &RetryConfig::no_retry())
        .unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(ledger.record(rid(1)).unwrap().balance, 1000);
    assert_eq!(ledger.record(rid(2)).unwrap().balance, 500);
    assert_eq!(ledger.store().locks().held_count(), 0);
}

#[test]
fn opposite_transfers_complete_in_bounded_time() {
    let ledger = ledger([(1, 10_000), (2, 10_000)]);
    let retry = fast_retry(5);
    let started = Instant::now();

    let results = run_concurrently(8, |i| {
        let (from, to) = if i % 2 == 0 { (rid(1), rid(2)) } else { (rid(2), rid(1)) };
        (0..25)
            .map(|_| ledger.pessimistic_transfer(from, to, 7, &retry))
            .collect::<Result<Vec<_>>>()
    });

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(ledger.store().total_balance(), 20_000);
    assert_eq!(ledger.store().stats().locks.deadlocks, 0);
}

#[test]
fn lock_timeout_is_reported_and_retried() {
    let ledger = Ledger::builder()
        .lock(LockConfig::default().with_lock_timeout_ms(20))
        .in_memory([(1, 100), (2, 100)])
        .unwrap();
    let store = Arc::clone(ledger.store());

    let mut blocker = store.begin();
    store
        .try_acquire_lock(&mut blocker, rid(2), Duration::ZERO)
        .unwrap();

    let err = ledger
        .pessimistic_transfer(rid(1), rid(2), 10, &fast_retry(2))
        .unwrap_err();
    assert!(matches!(err, Error::AttemptsExhausted { attempts: 2, .. }));
    assert!(err.root_cause().is_lock_timeout());

    store.abort(&mut blocker, "test done");
    ledger
        .pessimistic_transfer(rid(1), rid(2), 10, &fast_retry(2))
        .unwrap();
}

#[test]
fn ordered_scenario_never_deadlocks() {
    let ledger = ledger([(1, 1_000), (2, 1_000)]);
    let report =
        scenarios::ordered_bidirectional_transfers(&ledger, rid(1), rid(2), 10, 4, Duration::from_millis(5))
            .unwrap();

    assert_eq!(report.transfers, 8);
    assert_eq!(report.successes, 8);
    assert_eq!(report.deadlocks_detected, 0);
    assert!(report.balance_conserved);
}

#[test]
fn ordered_scenario_counts_lock_timeout_retries() {
    let ledger = Ledger::builder()
        .lock(LockConfig::default().with_lock_timeout_ms(1))
        .retry(fast_retry(50))
        .in_memory([(1, 1_000), (2, 1_000)])
        .unwrap();
    let report =
        scenarios::ordered_bidirectional_transfers(&ledger, rid(1), rid(2), 10, 4, Duration::from_millis(30))
            .unwrap();

    // Every worker but the first to lock record 1 times out at least once
    assert!(report.retries >= 1);
    assert_eq!(report.deadlocks_detected, 0);
    assert_eq!(report.successes + report.failures, 8);
    assert!(report.balance_conserved);
}

#[test]
fn lock_contention_scenario() {
    let ledger = ledger([(3, 1_000)]);
    let report = scenarios::pessimistic_contention(&ledger, rid(3), 1, 10, Duration::ZERO).unwrap();
    assert_eq!(report.successes, 10);
    assert_eq!(report.final_balance, 990);
    assert!(report.balance_correct);
}
