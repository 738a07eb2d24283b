//! Deadlock-aware transfers
//!
//! [`DeadlockCoordinator`] locks the source record first and the target
//! second, in the order the caller asked for. Two opposite transfers can then
//! wait on each other; the store breaks the cycle by failing one request with
//! `DeadlockDetected`. The coordinator retries only that error, with
//! jittered exponential backoff so the two sides stop colliding in lockstep.
//! Every other error (lock timeout included) is returned as is.
//!
//! After `max_attempts` deadlocks in a row the caller gets
//! `AttemptsExhausted` carrying the last `DeadlockDetected`.

use crate::pessimistic::{stage_transfer, validate_transfer, PessimisticController, TransferReceipt};
use ledgerguard_core::{
    Classification, DeadlockConfig, Error, LockConfig, MetricsSink, RecordId, Result,
    VersionedStore,
};
use ledgerguard_resilience::RetryPolicy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Deadlock counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeadlockStats {
    /// `DeadlockDetected` errors observed
    pub deadlocks_detected: u64,
    /// Retries after a deadlock
    pub retries: u64,
    /// Transfers that committed
    pub successes: u64,
    /// Transfers that ended in an error
    pub failures: u64,
}

/// Only deadlocks are worth another attempt here
fn deadlock_only(e: &Error) -> Classification {
    if e.is_deadlock() {
        Classification::Retryable
    } else {
        Classification::Fatal
    }
}

/// Transfers in request order with deadlock retries
#[derive(Debug)]
pub struct DeadlockCoordinator<S> {
    locks: PessimisticController<S>,
    policy: RetryPolicy,
    deadlocks: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl<S: VersionedStore> DeadlockCoordinator<S> {
    /// Create a coordinator over `store`
    pub fn new(store: Arc<S>, lock: &LockConfig, deadlock: &DeadlockConfig) -> Self {
        Self {
            locks: PessimisticController::new(store, lock),
            policy: RetryPolicy::new(deadlock.retry_config()).named("deadlock_transfer"),
            deadlocks: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Report attempts to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.policy = self.policy.with_sink(sink);
        self
    }

    /// Sleep for `pause` after locking the source, before locking the target
    pub fn with_lock_pause(mut self, pause: Duration) -> Self {
        self.locks = self.locks.with_lock_pause(pause);
        self
    }

    /// Retry policy applied to deadlock victims
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        self.locks.store()
    }

    /// Move `amount` from `from` to `to`, locking `from` first
    ///
    /// # Errors
    ///
    /// - `Validation` for a self-transfer, a non-positive amount or
    ///   insufficient funds
    /// - `AttemptsExhausted` (source `DeadlockDetected`) after the retry bound
    /// - any other store error, unretried
    pub fn transfer(&self, from: RecordId, to: RecordId, amount: i64) -> Result<TransferReceipt> {
        validate_transfer(from, to, amount)?;

        let result = self.policy.execute(
            || {
                let attempt = self.locks.with_locks_in_request_order(&[from, to], |store, txn| {
                    stage_transfer(store, txn, from, to, amount)
                });
                if let Err(e) = &attempt {
                    if e.is_deadlock() {
                        self.deadlocks.fetch_add(1, Ordering::Relaxed);
                        warn!(from = %from, to = %to, "transfer chosen as deadlock victim");
                    }
                }
                attempt
            },
            deadlock_only,
        );

        match result {
            Ok(outcome) => {
                let retries = outcome.retries();
                self.retries.fetch_add(retries as u64, Ordering::Relaxed);
                self.successes.fetch_add(1, Ordering::Relaxed);
                if retries > 0 {
                    info!(
                        transfer = %outcome.value.transfer_id,
                        retries,
                        "transfer committed after deadlock retries"
                    );
                }
                Ok(outcome.value)
            }
            Err(e) => {
                self.retries
                    .fetch_add(e.attempts().saturating_sub(1) as u64, Ordering::Relaxed);
                self.failures.fetch_add(1, Ordering::Relaxed);
                if e.is_exhausted() {
                    error!(from = %from, to = %to, attempts = e.attempts(), "deadlock retries exhausted");
                }
                Err(e.into())
            }
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> DeadlockStats {
        DeadlockStats {
            deadlocks_detected: self.deadlocks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.deadlocks.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}
