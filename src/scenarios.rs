//! Contention and failure scenarios
//!
//! Each function drives a [`Ledger`] from several threads (or through a
//! scripted failure pattern) and returns a serializable report. The CLI
//! prints these reports; the integration tests assert on them.
//!
//! Threads start together on a [`Barrier`] so the contention is real, and
//! every report carries enough before/after state to check that no update
//! was lost.

use crate::ledger::Ledger;
use ledgerguard_concurrency::{DeadlockCoordinator, PessimisticController};
use ledgerguard_core::{account, CircuitState, Error, RecordId, Result, RetryConfig, VersionedStore};
use ledgerguard_resilience::CircuitMetrics;
use ledgerguard_storage::InMemoryStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

fn attempts_of(err: &Error) -> u32 {
    match err {
        Error::AttemptsExhausted { attempts, .. } => *attempts,
        _ => 1,
    }
}

/// Outcome of concurrent optimistic debits against one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentionReport {
    /// Concurrent operations started
    pub operations: usize,
    /// Operations that committed
    pub successes: usize,
    /// Operations that gave up
    pub failures: usize,
    /// Attempts beyond the first, summed over all operations
    pub retries: u32,
    /// Average retries per operation
    pub avg_retries: f64,
    /// Version conflicts observed
    pub conflicts: u32,
    /// Conflicts per operation
    pub conflict_rate: f64,
    /// Balance before the run
    pub initial_balance: i64,
    /// Balance after the run
    pub final_balance: i64,
    /// `initial_balance - successes * amount`
    pub expected_balance: i64,
    /// Version before the run
    pub initial_version: u64,
    /// Version after the run
    pub final_version: u64,
    /// Final balance and version account for every success exactly once
    pub balance_correct: bool,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Debit `amount` from `id` on `operations` threads at once, optimistically
///
/// Every thread retries version conflicts under `retry`.
pub fn optimistic_contention<S: VersionedStore>(
    ledger: &Ledger<S>,
    id: RecordId,
    amount: i64,
    operations: usize,
    retry: &RetryConfig,
) -> Result<ContentionReport> {
    let initial = ledger.record(id)?;
    let barrier = Barrier::new(operations);
    let started = Instant::now();

    let results: Vec<Result<u32>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..operations)
            .map(|_| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    ledger
                        .optimistic_update(id, |b| account::debit(b, amount), retry)
                        .map(|report| report.attempts)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(Error::Internal("worker panicked".into())))
            })
            .collect()
    });

    let duration = started.elapsed();
    let fin = ledger.record(id)?;

    let mut successes = 0;
    let mut retries = 0;
    let mut conflicts = 0;
    for result in &results {
        match result {
            Ok(attempts) => {
                successes += 1;
                retries += attempts - 1;
                conflicts += attempts - 1;
            }
            Err(e) => {
                let attempts = attempts_of(e);
                retries += attempts.saturating_sub(1);
                if e.root_cause().is_conflict() {
                    conflicts += attempts;
                }
            }
        }
    }
    let failures = operations - successes;
    let expected_balance = initial.balance - amount * successes as i64;
    let per_op = |n: u32| {
        if operations == 0 {
            0.0
        } else {
            n as f64 / operations as f64
        }
    };

    let report = ContentionReport {
        operations,
        successes,
        failures,
        retries,
        avg_retries: per_op(retries),
        conflicts,
        conflict_rate: per_op(conflicts),
        initial_balance: initial.balance,
        final_balance: fin.balance,
        expected_balance,
        initial_version: initial.version,
        final_version: fin.version,
        balance_correct: fin.balance == expected_balance
            && fin.version == initial.version + successes as u64,
        duration_ms: millis(duration),
    };
    info!(
        operations,
        successes,
        conflicts,
        correct = report.balance_correct,
        "optimistic contention finished"
    );
    Ok(report)
}

/// Outcome of concurrent locked debits against one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockContentionReport {
    /// Concurrent operations started
    pub operations: usize,
    /// Operations that committed
    pub successes: usize,
    /// Operations that failed (lock timeouts included)
    pub failures: usize,
    /// Time spent waiting for the lock, summed over successful operations
    pub total_lock_wait_ms: u64,
    /// Average lock wait of successful operations
    pub avg_lock_wait_ms: f64,
    /// Longest lock wait
    pub max_lock_wait_ms: u64,
    /// Committed operations per second
    pub operations_per_second: f64,
    /// Balance before the run
    pub initial_balance: i64,
    /// Balance after the run
    pub final_balance: i64,
    /// `initial_balance - successes * amount`
    pub expected_balance: i64,
    /// Final balance accounts for every success exactly once
    pub balance_correct: bool,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Debit `amount` from `id` on `operations` threads at once under the row lock
///
/// Each operation holds the lock for `hold` before committing, so the others
/// queue behind it.
pub fn pessimistic_contention<S: VersionedStore>(
    ledger: &Ledger<S>,
    id: RecordId,
    amount: i64,
    operations: usize,
    hold: Duration,
) -> Result<LockContentionReport> {
    let initial = ledger.record(id)?;
    let locks = ledger.pessimistic();
    let barrier = Barrier::new(operations);
    let started = Instant::now();

    let results: Vec<Result<Duration>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..operations)
            .map(|_| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let requested = Instant::now();
                    locks.with_locks(&[id], |store, txn| {
                        let waited = requested.elapsed();
                        let record = store.read(txn, id)?;
                        let balance = account::debit(record.balance, amount)?;
                        store.write(txn, id, record.version, balance)?;
                        if !hold.is_zero() {
                            thread::sleep(hold);
                        }
                        Ok(waited)
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(Error::Internal("worker panicked".into())))
            })
            .collect()
    });

    let duration = started.elapsed();
    let fin = ledger.record(id)?;

    let waits: Vec<u64> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|d| millis(*d))
        .collect();
    let successes = waits.len();
    let total_lock_wait_ms: u64 = waits.iter().sum();
    let expected_balance = initial.balance - amount * successes as i64;

    let report = LockContentionReport {
        operations,
        successes,
        failures: operations - successes,
        total_lock_wait_ms,
        avg_lock_wait_ms: if successes == 0 {
            0.0
        } else {
            total_lock_wait_ms as f64 / successes as f64
        },
        max_lock_wait_ms: waits.iter().copied().max().unwrap_or(0),
        operations_per_second: if duration.is_zero() {
            0.0
        } else {
            successes as f64 / duration.as_secs_f64()
        },
        initial_balance: initial.balance,
        final_balance: fin.balance,
        expected_balance,
        balance_correct: fin.balance == expected_balance,
        duration_ms: millis(duration),
    };
    info!(
        operations,
        successes,
        max_wait_ms = report.max_lock_wait_ms,
        "pessimistic contention finished"
    );
    Ok(report)
}

/// Outcome of opposite-direction transfers between two records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlockReport {
    /// Transfers started (two per round)
    pub transfers: usize,
    /// Deadlock victims observed
    pub deadlocks_detected: u64,
    /// Retries after a deadlock or lock timeout
    pub retries: u64,
    /// Transfers that committed
    pub successes: usize,
    /// Transfers that failed
    pub failures: usize,
    /// Sum of both balances before the run
    pub total_before: i64,
    /// Sum of both balances after the run
    pub total_after: i64,
    /// No money created or destroyed
    pub balance_conserved: bool,
    /// Wall-clock duration
    pub duration_ms: u64,
}

fn run_bidirectional<F>(rounds: usize, transfer: F) -> (Vec<Result<()>>, Duration)
where
    F: Fn(bool) -> Result<()> + Sync,
{
    let threads = rounds * 2;
    let barrier = Barrier::new(threads);
    let started = Instant::now();
    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let barrier = &barrier;
                let transfer = &transfer;
                scope.spawn(move || {
                    barrier.wait();
                    transfer(i % 2 == 0)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(Error::Internal("worker panicked".into())))
            })
            .collect()
    });
    (results, started.elapsed())
}

fn total<S: VersionedStore>(ledger: &Ledger<S>, a: RecordId, b: RecordId) -> Result<i64> {
    Ok(ledger.record(a)?.balance + ledger.record(b)?.balance)
}

/// Run `rounds` pairs of opposite transfers that lock in request order
///
/// Each transfer pauses for `pause` between its two lock requests, so pairs
/// reliably deadlock; the coordinator retries the victims.
pub fn bidirectional_transfers<S: VersionedStore>(
    ledger: &Ledger<S>,
    a: RecordId,
    b: RecordId,
    amount: i64,
    rounds: usize,
    pause: Duration,
) -> Result<DeadlockReport> {
    let config = ledger.config();
    let coordinator = DeadlockCoordinator::new(Arc::clone(ledger.store()), &config.lock, &config.deadlock)
        .with_lock_pause(pause);
    let total_before = total(ledger, a, b)?;

    let (results, duration) = run_bidirectional(rounds, |forward| {
        let (from, to) = if forward { (a, b) } else { (b, a) };
        coordinator.transfer(from, to, amount).map(|_| ())
    });

    let stats = coordinator.stats();
    let total_after = total(ledger, a, b)?;
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let report = DeadlockReport {
        transfers: results.len(),
        deadlocks_detected: stats.deadlocks_detected,
        retries: stats.retries,
        successes,
        failures: results.len() - successes,
        total_before,
        total_after,
        balance_conserved: total_before == total_after,
        duration_ms: millis(duration),
    };
    info!(
        transfers = report.transfers,
        deadlocks = report.deadlocks_detected,
        "bidirectional transfers finished"
    );
    Ok(report)
}

/// Same workload as [`bidirectional_transfers`], locking in ascending order
///
/// No cycle can form, so `deadlocks_detected` stays zero; lock timeouts are
/// retried under the ledger's retry config.
pub fn ordered_bidirectional_transfers<S: VersionedStore>(
    ledger: &Ledger<S>,
    a: RecordId,
    b: RecordId,
    amount: i64,
    rounds: usize,
    pause: Duration,
) -> Result<DeadlockReport> {
    let config = ledger.config();
    let locks = PessimisticController::new(Arc::clone(ledger.store()), &config.lock).with_lock_pause(pause);
    let policy = ledger.retry_policy("ordered_transfer", &config.retry);
    let total_before = total(ledger, a, b)?;

    let retries = AtomicU64::new(0);

    let (results, duration) = run_bidirectional(rounds, |forward| {
        let (from, to) = if forward { (a, b) } else { (b, a) };
        match policy.execute(|| locks.transfer(from, to, amount), Error::classification) {
            Ok(outcome) => {
                retries.fetch_add(outcome.retries() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                retries.fetch_add(e.attempts().saturating_sub(1) as u64, Ordering::Relaxed);
                Err(e.into())
            }
        }
    });

    let total_after = total(ledger, a, b)?;
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let deadlocks = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.root_cause().is_deadlock()))
        .count() as u64;
    let report = DeadlockReport {
        transfers: results.len(),
        deadlocks_detected: deadlocks,
        retries: retries.load(Ordering::Relaxed),
        successes,
        failures: results.len() - successes,
        total_before,
        total_after,
        balance_conserved: total_before == total_after,
        duration_ms: millis(duration),
    };
    info!(
        transfers = report.transfers,
        deadlocks = report.deadlocks_detected,
        "ordered transfers finished"
    );
    Ok(report)
}

/// One guarded call in a [`flaky_transfers`] run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerCall {
    /// Position in the failure pattern
    pub index: usize,
    /// Whether a store fault was injected for this call
    pub injected_failure: bool,
    /// Breaker state before the call
    pub state_before: CircuitState,
    /// Breaker state after the call
    pub state_after: CircuitState,
    /// The call committed
    pub succeeded: bool,
    /// The breaker refused the call without running it
    pub rejected: bool,
    /// Error message, if the call failed
    pub error: Option<String>,
}

/// Outcome of a [`flaky_transfers`] run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerReport {
    /// Every call in pattern order
    pub calls: Vec<BreakerCall>,
    /// Breaker metrics after the last call
    pub metrics: CircuitMetrics,
}

impl BreakerReport {
    /// States the breaker moved through, consecutive duplicates removed
    pub fn states(&self) -> Vec<CircuitState> {
        let mut states: Vec<CircuitState> = Vec::new();
        for call in &self.calls {
            for state in [call.state_before, call.state_after] {
                if states.last() != Some(&state) {
                    states.push(state);
                }
            }
        }
        states
    }
}

/// Run one guarded transfer per entry of `pattern`, injecting a store fault
/// where the entry is `true`
///
/// Calls are not retried, so each entry is exactly one breaker outcome.
pub fn flaky_transfers(
    ledger: &Ledger<InMemoryStore>,
    name: &str,
    from: RecordId,
    to: RecordId,
    amount: i64,
    pattern: &[bool],
) -> Result<BreakerReport> {
    let breaker = ledger.breaker(name);
    let faults = ledger.store().faults();
    let no_retry = RetryConfig::no_retry();
    let mut calls = Vec::with_capacity(pattern.len());

    for (index, &fail) in pattern.iter().enumerate() {
        faults.clear();
        if fail {
            faults.fail_next(1);
        }
        let state_before = breaker.state();
        let result = ledger.guarded_call(name, || ledger.pessimistic().transfer(from, to, amount), &no_retry);
        calls.push(BreakerCall {
            index,
            injected_failure: fail,
            state_before,
            state_after: breaker.state(),
            succeeded: result.is_ok(),
            rejected: matches!(&result, Err(e) if e.is_circuit_open()),
            error: result.err().map(|e| e.to_string()),
        });
    }
    faults.clear();

    Ok(BreakerReport {
        calls,
        metrics: breaker.metrics(),
    })
}

/// Parse a failure pattern such as `"FFFSS"` (`F` fails, `S` succeeds)
pub fn parse_pattern(pattern: &str) -> Result<Vec<bool>> {
    pattern
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| match c.to_ascii_uppercase() {
            'F' => Ok(true),
            'S' => Ok(false),
            other => Err(Error::Validation(format!(
                "invalid pattern character '{}', expected F or S",
                other
            ))),
        })
        .collect()
}

/// Outcome of a retried call against a store that fails a fixed number of times
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryReport {
    /// Faults injected ahead of the call
    pub injected_failures: u32,
    /// The call eventually committed
    pub succeeded: bool,
    /// Attempts made
    pub attempts: u32,
    /// Error message, if the call failed
    pub error: Option<String>,
    /// Wall-clock duration including backoff
    pub duration_ms: u64,
}

/// Transfer under `retry` after arranging for the next `failures` store
/// writes to fail
pub fn flaky_retries(
    ledger: &Ledger<InMemoryStore>,
    from: RecordId,
    to: RecordId,
    amount: i64,
    failures: u32,
    retry: &RetryConfig,
) -> Result<RetryReport> {
    let faults = ledger.store().faults();
    faults.clear();
    faults.fail_next(failures);

    let started = Instant::now();
    let result = ledger
        .retry_policy("flaky_transfer", retry)
        .execute(|| ledger.pessimistic().transfer(from, to, amount), Error::classification);
    let duration = started.elapsed();
    faults.clear();

    let report = match result {
        Ok(outcome) => RetryReport {
            injected_failures: failures,
            succeeded: true,
            attempts: outcome.attempts,
            error: None,
            duration_ms: millis(duration),
        },
        Err(e) => RetryReport {
            injected_failures: failures,
            succeeded: false,
            attempts: e.attempts(),
            error: Some(Error::from(e).to_string()),
            duration_ms: millis(duration),
        },
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerguard_core::CircuitConfig;

    fn rid(n: u64) -> RecordId {
        RecordId::new(n)
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(parse_pattern("FfS").unwrap(), vec![true, true, false]);
        assert_eq!(parse_pattern("F, S").unwrap(), vec![true, false]);
        assert!(parse_pattern("FX").unwrap_err().is_validation());
    }

    #[test]
    fn test_optimistic_contention_loses_nothing() {
        let ledger = Ledger::in_memory([(1, 10_000)]).unwrap();
        let retry = RetryConfig::new()
            .with_max_attempts(50)
            .with_base_delay_ms(1)
            .with_max_delay_ms(5);
        let report = optimistic_contention(&ledger, rid(1), 10, 8, &retry).unwrap();

        assert!(report.balance_correct);
        assert_eq!(report.successes + report.failures, 8);
        assert_eq!(report.final_version, report.successes as u64);
    }

    #[test]
    fn test_pessimistic_contention_serializes_writers() {
        let ledger = Ledger::in_memory([(1, 1000)]).unwrap();
        let report = pessimistic_contention(&ledger, rid(1), 10, 5, Duration::from_millis(5)).unwrap();

        assert_eq!(report.successes, 5);
        assert_eq!(report.final_balance, 950);
        assert!(report.balance_correct);
        assert!(report.max_lock_wait_ms >= 5);
    }

    #[test]
    fn test_flaky_transfers_open_the_breaker() {
        let ledger = Ledger::builder()
            .circuit(
                CircuitConfig::new()
                    .with_sliding_window_size(5)
                    .with_minimum_calls(5)
                    .with_wait_duration_ms(60_000),
            )
            .in_memory([(1, 1000), (2, 0)])
            .unwrap();
        let pattern = parse_pattern("FFFSSS").unwrap();
        let report = flaky_transfers(&ledger, "transfer", rid(1), rid(2), 10, &pattern).unwrap();

        assert_eq!(report.states(), vec![CircuitState::Closed, CircuitState::Open]);
        assert!(report.calls[5].rejected);
        assert_eq!(report.metrics.not_permitted_calls, 1);
        // Only the two admitted successes moved money
        assert_eq!(ledger.record(rid(2)).unwrap().balance, 20);
    }

    #[test]
    fn test_flaky_retries_recover() {
        let ledger = Ledger::in_memory([(1, 100), (2, 0)]).unwrap();
        let retry = RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1);
        let report = flaky_retries(&ledger, rid(1), rid(2), 10, 2, &retry).unwrap();
        assert!(report.succeeded);
        assert_eq!(report.attempts, 3);

        let report = flaky_retries(&ledger, rid(1), rid(2), 10, 5, &retry).unwrap();
        assert!(!report.succeeded);
        assert_eq!(report.attempts, 3);
        assert_eq!(ledger.record(rid(1)).unwrap().balance, 90);
    }
}
