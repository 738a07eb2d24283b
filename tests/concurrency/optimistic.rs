//! Optimistic Update Tests
//!
//! Every committed update bumps the version exactly once and none is lost.

use crate::common::*;

#[test]
fn two_concurrent_debits_both_commit() {
    let ledger = ledger([(1, 1000)]);
    let retry = fast_retry(5);

    let results = run_concurrently(2, |i| {
        let amount = if i == 0 { 100 } else { 50 };
        ledger.optimistic_update(rid(1), |b| account::debit(b, amount), &retry)
    });

    for result in &results {
        assert!(result.is_ok(), "{:?}", result);
    }
    let record = ledger.record(rid(1)).unwrap();
    assert_eq!(record.balance, 850);
    assert_eq!(record.version, 2);
}

#[test]
fn no_update_is_lost_under_contention() {
    let ledger = ledger([(1, 0)]);
    let retry = fast_retry(100);
    let threads = 16;

    let results = run_concurrently(threads, |i| {
        let amount = (i as i64 + 1) * 10;
        ledger
            .optimistic_update(rid(1), |b| account::credit(b, amount), &retry)
            .map(|report| report.record.delta())
    });

    let committed: Vec<i64> = results.into_iter().filter_map(Result::ok).collect();
    let record = ledger.record(rid(1)).unwrap();
    assert_eq!(record.version, committed.len() as u64);
    assert_eq!(record.balance, committed.iter().sum::<i64>());
}

#[test]
fn exhausted_conflicts_surface_as_attempts_exhausted() {
    let ledger = ledger([(1, 100)]);
    let store = Arc::clone(ledger.store());

    // Another writer moves the version inside every attempt
    let err = ledger
        .optimistic_update(
            rid(1),
            |b| {
                let current = store.get(rid(1))?;
                store.conditional_update(rid(1), current.version, current.balance + 1)?;
                Ok(b - 1)
            },
            &fast_retry(3),
        )
        .unwrap_err();

    assert!(matches!(err, Error::AttemptsExhausted { attempts: 3, .. }));
    assert!(err.root_cause().is_conflict());
    assert_eq!(ledger.retry_metrics().total_failures, 1);
}

#[test]
fn contention_scenario_balances() {
    let ledger = ledger([(7, 5_000)]);
    let report = ledgerguard::scenarios::optimistic_contention(&ledger, rid(7), 25, 12, &fast_retry(100))
        .unwrap();

    assert_eq!(report.operations, 12);
    assert!(report.balance_correct);
    assert_eq!(
        report.final_balance,
        report.initial_balance - 25 * report.successes as i64
    );
}
