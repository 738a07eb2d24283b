//! Pessimistic locking
//!
//! [`PessimisticController::with_locks`] opens a transaction, locks every
//! requested record and runs the caller's closure while holding them. The
//! locks are released when the transaction commits or aborts, on every exit
//! path including a panic inside the closure.
//!
//! # Lock order
//!
//! Record ids are sorted ascending and deduplicated before acquisition. Two
//! operations that contend for the same records therefore request them in
//! the same order and cannot form a cycle. Any path that locks several
//! records in another order reintroduces deadlocks; the only such path is
//! [`PessimisticController::with_locks_in_request_order`], reserved for the
//! deadlock coordinator.

use ledgerguard_core::{
    account, Error, LockConfig, RecordId, Result, TransactionContext, VersionedStore,
};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    /// Unique id of this transfer
    pub transfer_id: Uuid,
    /// Debited record
    pub from: RecordId,
    /// Credited record
    pub to: RecordId,
    /// Amount moved, in minor units
    pub amount: i64,
    /// Balance of `from` after the transfer
    pub from_balance: i64,
    /// Balance of `to` after the transfer
    pub to_balance: i64,
    /// Version of `from` after the transfer
    pub from_version: u64,
    /// Version of `to` after the transfer
    pub to_version: u64,
}

/// Reject transfers that can never succeed
pub(crate) fn validate_transfer(from: RecordId, to: RecordId, amount: i64) -> Result<()> {
    if from == to {
        return Err(Error::Validation(format!(
            "cannot transfer from {} to itself",
            from
        )));
    }
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "transfer amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Stage a debit of `from` and a credit of `to` inside `txn`
///
/// The caller must already hold both locks.
pub(crate) fn stage_transfer<S: VersionedStore>(
    store: &S,
    txn: &mut TransactionContext,
    from: RecordId,
    to: RecordId,
    amount: i64,
) -> Result<TransferReceipt> {
    let source = store.read(txn, from)?;
    let target = store.read(txn, to)?;

    let debited = account::debit(source.balance, amount)?;
    let credited = account::credit(target.balance, amount)?;

    let source_after = store.write(txn, from, source.version, debited)?;
    let target_after = store.write(txn, to, target.version, credited)?;

    Ok(TransferReceipt {
        transfer_id: Uuid::new_v4(),
        from,
        to,
        amount,
        from_balance: source_after.balance,
        to_balance: target_after.balance,
        from_version: source_after.version,
        to_version: target_after.version,
    })
}

/// Lock-based writer over a shared store
#[derive(Debug)]
pub struct PessimisticController<S> {
    store: Arc<S>,
    lock_timeout: Duration,
    lock_pause: Duration,
}

impl<S> Clone for PessimisticController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lock_timeout: self.lock_timeout,
            lock_pause: self.lock_pause,
        }
    }
}

impl<S: VersionedStore> PessimisticController<S> {
    /// Create a controller over `store`
    pub fn new(store: Arc<S>, config: &LockConfig) -> Self {
        Self {
            store,
            lock_timeout: config.lock_timeout(),
            lock_pause: Duration::ZERO,
        }
    }

    /// Sleep for `pause` between consecutive lock acquisitions
    ///
    /// Widens the window in which concurrent requests interleave; used by
    /// contention scenarios and tests.
    pub fn with_lock_pause(mut self, pause: Duration) -> Self {
        self.lock_pause = pause;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Bound on each individual lock wait
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Lock `ids` in ascending order and run `f` inside the transaction
    ///
    /// `f` receives the store and the transaction; writes it stages commit
    /// atomically when it returns `Ok`.
    ///
    /// # Errors
    ///
    /// - `LockTimeout` if any lock wait exceeds the timeout; locks already
    ///   acquired are released before returning
    /// - `DeadlockDetected` if the store picks this transaction as a victim
    /// - whatever `f` or the commit returns
    pub fn with_locks<T, F>(&self, ids: &[RecordId], f: F) -> Result<T>
    where
        F: FnOnce(&S, &mut TransactionContext) -> Result<T>,
    {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        self.run_locked(&ordered, f)
    }

    /// Lock `ids` in the order given and run `f` inside the transaction
    ///
    /// Duplicates are dropped, order is otherwise preserved. Callers of this
    /// method must be prepared for `DeadlockDetected`.
    pub fn with_locks_in_request_order<T, F>(&self, ids: &[RecordId], f: F) -> Result<T>
    where
        F: FnOnce(&S, &mut TransactionContext) -> Result<T>,
    {
        let mut requested: Vec<RecordId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !requested.contains(id) {
                requested.push(*id);
            }
        }
        self.run_locked(&requested, f)
    }

    fn run_locked<T, F>(&self, ids: &[RecordId], f: F) -> Result<T>
    where
        F: FnOnce(&S, &mut TransactionContext) -> Result<T>,
    {
        let store = self.store.as_ref();
        store.with_transaction(|txn| {
            for (n, id) in ids.iter().enumerate() {
                if n > 0 && !self.lock_pause.is_zero() {
                    thread::sleep(self.lock_pause);
                }
                if let Err(e) = store.try_acquire_lock(txn, *id, self.lock_timeout) {
                    let partial = txn.take_held_locks();
                    for held in &partial {
                        store.release_lock(txn.txn_id, *held);
                    }
                    warn!(
                        txn = %txn.txn_id,
                        record = %id,
                        released = partial.len(),
                        error = %e,
                        "lock acquisition failed"
                    );
                    return Err(e);
                }
            }
            debug!(txn = %txn.txn_id, locks = ids.len(), "locks acquired");
            f(store, txn)
        })
    }

    /// Move `amount` from `from` to `to` under both locks
    ///
    /// # Errors
    ///
    /// - `Validation` if `from == to`, the amount is not positive or the
    ///   source balance is insufficient
    /// - `NotFound`, `LockTimeout`, `DeadlockDetected` from the store
    pub fn transfer(&self, from: RecordId, to: RecordId, amount: i64) -> Result<TransferReceipt> {
        validate_transfer(from, to, amount)?;
        let receipt = self.with_locks(&[from, to], |store, txn| {
            stage_transfer(store, txn, from, to, amount)
        })?;
        debug!(
            transfer = %receipt.transfer_id,
            from = %from,
            to = %to,
            amount,
            "transfer committed"
        );
        Ok(receipt)
    }
}
