//! The versioned store contract
//!
//! [`VersionedStore`] is the narrow interface the concurrency layer consumes.
//! A relational adapter maps it onto `SELECT ... FOR UPDATE`,
//! `UPDATE ... WHERE version = $expected` and the driver's transaction API;
//! `ledgerguard-storage` provides an in-memory implementation.
//!
//! ## Contract
//!
//! | Operation | Errors |
//! |-----------|--------|
//! | `get` | NotFound |
//! | `conditional_update` | VersionConflict, NotFound |
//! | `with_transaction` | whatever `f` or commit returns; no partial effect |
//! | `try_acquire_lock` | LockTimeout, DeadlockDetected |
//! | `release_lock` | never fails, idempotent |
//!
//! Deadlocks and lock timeouts must be reported as distinct errors: they
//! warrant different backoff strategies.

use crate::error::Result;
use crate::transaction::TransactionContext;
use crate::types::{RecordId, TxnId, VersionedRecord};
use std::time::Duration;

/// Narrow contract over a store of versioned records
pub trait VersionedStore: Send + Sync {
    /// Read the committed state of a record
    fn get(&self, id: RecordId) -> Result<VersionedRecord>;

    /// Autocommit compare-and-swap
    ///
    /// Installs `balance` if the stored version equals `expected_version`,
    /// incrementing the version by exactly one.
    fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        balance: i64,
    ) -> Result<VersionedRecord>;

    /// Open a transaction scope
    fn begin(&self) -> TransactionContext;

    /// Atomically apply the transaction's write set, then release its locks
    ///
    /// On failure nothing is applied, the transaction is marked aborted and
    /// its locks are still released.
    fn commit(&self, txn: &mut TransactionContext) -> Result<()>;

    /// Discard the transaction's write set and release its locks
    fn abort(&self, txn: &mut TransactionContext, reason: &str);

    /// Acquire the exclusive lock on `id` for `txn`, waiting at most `timeout`
    ///
    /// Re-acquiring a lock the transaction already holds succeeds immediately.
    fn try_acquire_lock(
        &self,
        txn: &mut TransactionContext,
        id: RecordId,
        timeout: Duration,
    ) -> Result<()>;

    /// Release the lock on `id` if `owner` holds it; otherwise do nothing
    fn release_lock(&self, owner: TxnId, id: RecordId);

    /// Read a record inside a transaction, seeing the transaction's own writes
    fn read(&self, txn: &TransactionContext, id: RecordId) -> Result<VersionedRecord> {
        txn.ensure_active()?;
        Ok(txn.view(self.get(id)?))
    }

    /// Stage a conditional write inside a transaction
    fn write(
        &self,
        txn: &mut TransactionContext,
        id: RecordId,
        expected_version: u64,
        balance: i64,
    ) -> Result<VersionedRecord> {
        let view = self.read(txn, id)?;
        txn.stage(&view, expected_version, balance)
    }

    /// Run `f` atomically
    ///
    /// `Ok` commits, `Err` aborts. If `f` panics the scope guard aborts the
    /// transaction during unwinding, so locks are released on every exit path.
    fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionContext) -> Result<T>,
        Self: Sized,
    {
        let mut scope = TransactionScope {
            store: self,
            txn: self.begin(),
            finished: false,
        };
        let outcome = f(&mut scope.txn);
        scope.finished = true;
        match outcome {
            Ok(value) => {
                self.commit(&mut scope.txn)?;
                Ok(value)
            }
            Err(e) => {
                self.abort(&mut scope.txn, &e.to_string());
                Err(e)
            }
        }
    }
}

/// Aborts the transaction if dropped before `with_transaction` finished it
struct TransactionScope<'a, S: VersionedStore> {
    store: &'a S,
    txn: TransactionContext,
    finished: bool,
}

impl<S: VersionedStore> Drop for TransactionScope<'_, S> {
    fn drop(&mut self) {
        if !self.finished && self.txn.is_active() {
            self.store.abort(&mut self.txn, "transaction scope unwound");
        }
    }
}
