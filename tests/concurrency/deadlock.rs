//! Deadlock Recovery Tests
//!
//! Opposite transfers that lock in request order deadlock; the coordinator
//! retries the victim until both commit or the bound is reached.

use crate::common::*;
use ledgerguard::scenarios;

fn deadlock_ledger() -> Ledger {
    Ledger::builder()
        .lock(LockConfig::default().with_lock_timeout_ms(5_000))
        .deadlock(
            DeadlockConfig::default()
                .with_max_attempts(10)
                .with_base_backoff_ms(5),
        )
        .in_memory([(1, 1_000), (2, 1_000)])
        .unwrap()
}

#[test]
fn opposite_transfers_both_commit() {
    let ledger = deadlock_ledger();
    let results = run_concurrently(2, |i| {
        let (from, to) = if i == 0 { (rid(1), rid(2)) } else { (rid(2), rid(1)) };
        ledger.transfer_with_deadlock_handling(from, to, 100)
    });

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(ledger.deadlock_stats().successes, 2);
    assert_eq!(ledger.store().total_balance(), 2_000);
}

#[test]
fn paused_pairs_deadlock_and_recover() {
    let ledger = deadlock_ledger();
    let report =
        scenarios::bidirectional_transfers(&ledger, rid(1), rid(2), 10, 2, Duration::from_millis(20))
            .unwrap();

    assert_eq!(report.transfers, 4);
    assert_eq!(report.successes + report.failures, 4);
    assert!(report.deadlocks_detected >= 1);
    assert!(report.balance_conserved);
    assert_eq!(ledger.store().locks().held_count(), 0);
}

#[test]
fn deadlock_bound_is_respected() {
    // One retry only: a paused pair must end with at least one success and
    // no transfer left hanging
    let ledger = Ledger::builder()
        .deadlock(DeadlockConfig::default().with_max_attempts(1))
        .in_memory([(1, 1_000), (2, 1_000)])
        .unwrap();

    let started = Instant::now();
    let report =
        scenarios::bidirectional_transfers(&ledger, rid(1), rid(2), 10, 1, Duration::from_millis(20))
            .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.successes >= 1);
    assert_eq!(report.retries, 0);
    assert!(report.balance_conserved);
}
