//! In-memory `VersionedStore`
//!
//! Records live in a `DashMap` so reads of different records never contend.
//! Every write path (autocommit compare-and-swap and transaction commit)
//! runs under a single `commit_lock`, which makes validate-then-apply atomic
//! across the whole write set.
//!
//! # Autocommit updates
//!
//! `conditional_update` behaves like `UPDATE ... WHERE version = $expected`
//! on a row-locking database: it takes the row lock with a short-lived owner
//! (waiting behind any transaction that holds it), checks the version and
//! installs the new balance.
//!
//! # Commit
//!
//! 1. Validate that every staged record still has the version it had when
//!    first written by this transaction
//! 2. Apply all writes
//! 3. Release the transaction's locks
//!
//! A failed validation applies nothing and aborts the transaction.

use crate::faults::FaultInjector;
use crate::locks::{LockManager, LockStats};
use chrono::Utc;
use dashmap::DashMap;
use ledgerguard_core::{
    Error, LockConfig, RecordId, Result, TransactionContext, TxnId, VersionedRecord,
    VersionedStore,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Store counters, including the lock manager's
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Transactions committed with at least one write
    pub commits: u64,
    /// Transactions aborted
    pub aborts: u64,
    /// Compare-and-swap or commit validations that found a newer version
    pub conflicts: u64,
    /// Lock manager counters
    pub locks: LockStats,
}

/// DashMap-backed store of versioned records
pub struct InMemoryStore {
    records: DashMap<RecordId, VersionedRecord>,
    locks: LockManager,
    faults: FaultInjector,
    commit_lock: Mutex<()>,
    next_txn_id: AtomicU64,
    autocommit_lock_timeout: Duration,
    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store with the default lock timeout for autocommit writes
    pub fn new() -> Self {
        Self::with_lock_config(&LockConfig::default())
    }

    /// Create an empty store; autocommit writes wait at most `lock_timeout`
    pub fn with_lock_config(config: &LockConfig) -> Self {
        Self {
            records: DashMap::new(),
            locks: LockManager::new(),
            faults: FaultInjector::new(),
            commit_lock: Mutex::new(()),
            next_txn_id: AtomicU64::new(1),
            autocommit_lock_timeout: config.lock_timeout(),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Create a store seeded with `(id, balance)` pairs at version 0
    pub fn seeded(records: impl IntoIterator<Item = (u64, i64)>) -> Self {
        let store = Self::new();
        for (id, balance) in records {
            let id = RecordId::new(id);
            store.records.insert(id, VersionedRecord::new(id, balance));
        }
        store
    }

    /// Insert a new record at version 0
    ///
    /// # Errors
    ///
    /// `Validation` if the record already exists.
    pub fn insert(&self, id: RecordId, balance: i64) -> Result<VersionedRecord> {
        let _guard = self.commit_lock.lock();
        if self.records.contains_key(&id) {
            return Err(Error::Validation(format!("record {} already exists", id)));
        }
        let record = VersionedRecord::new(id, balance);
        self.records.insert(id, record.clone());
        Ok(record)
    }

    /// Check if a record exists
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> i64 {
        let _guard = self.commit_lock.lock();
        self.records.iter().map(|entry| entry.value().balance).sum()
    }

    /// Fault injector consulted at every write boundary
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Row lock manager
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            locks: self.locks.stats(),
        }
    }

    fn allocate_txn_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed))
    }

    fn release_held(&self, txn: &mut TransactionContext) {
        let held = txn.take_held_locks();
        self.locks.release_all(txn.txn_id, &held);
    }

    /// Validate and apply a write set; caller holds `commit_lock`
    fn apply_write_set(&self, txn: &TransactionContext) -> Result<()> {
        for (id, staged) in txn.write_set() {
            let actual = match self.records.get(id) {
                Some(record) => record.version,
                None => return Err(Error::NotFound(*id)),
            };
            if actual != staged.base_version {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(Error::VersionConflict {
                    id: *id,
                    expected: staged.base_version,
                    actual,
                });
            }
        }

        let now = Utc::now();
        for (id, staged) in txn.write_set() {
            if let Some(mut record) = self.records.get_mut(id) {
                record.balance = staged.balance;
                record.version = staged.version();
                record.updated_at = now;
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("records", &self.records.len())
            .field("locks_held", &self.locks.held_count())
            .field("stats", &self.stats())
            .finish()
    }
}

impl VersionedStore for InMemoryStore {
    fn get(&self, id: RecordId) -> Result<VersionedRecord> {
        self.records
            .get(&id)
            .map(|record| record.clone())
            .ok_or(Error::NotFound(id))
    }

    fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        balance: i64,
    ) -> Result<VersionedRecord> {
        self.faults.check("conditional_update")?;
        if !self.records.contains_key(&id) {
            return Err(Error::NotFound(id));
        }

        let owner = self.allocate_txn_id();
        self.locks
            .acquire(owner, id, self.autocommit_lock_timeout)?;

        let result = {
            let _guard = self.commit_lock.lock();
            match self.records.get_mut(&id) {
                None => Err(Error::NotFound(id)),
                Some(record) if record.version != expected_version => {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    Err(Error::VersionConflict {
                        id,
                        expected: expected_version,
                        actual: record.version,
                    })
                }
                Some(mut record) => {
                    *record = record.next(balance);
                    Ok(record.clone())
                }
            }
        };

        self.locks.release(owner, id);
        trace!(record = %id, expected_version, ok = result.is_ok(), "conditional update");
        result
    }

    fn begin(&self) -> TransactionContext {
        let txn = TransactionContext::new(self.allocate_txn_id());
        trace!(txn = %txn.txn_id, "begin");
        txn
    }

    fn commit(&self, txn: &mut TransactionContext) -> Result<()> {
        if let Err(e) = txn.ensure_active() {
            self.release_held(txn);
            return Err(e);
        }

        if txn.is_read_only() {
            txn.mark_committed();
            self.release_held(txn);
            return Ok(());
        }

        if let Err(e) = self.faults.check("commit") {
            self.abort(txn, &e.to_string());
            return Err(e);
        }

        let result = {
            let _guard = self.commit_lock.lock();
            self.apply_write_set(txn)
        };

        match result {
            Ok(()) => {
                let writes = txn.write_set().len();
                txn.mark_committed();
                self.release_held(txn);
                self.commits.fetch_add(1, Ordering::Relaxed);
                debug!(txn = %txn.txn_id, writes, "committed");
                Ok(())
            }
            Err(e) => {
                self.abort(txn, &e.to_string());
                Err(e)
            }
        }
    }

    fn abort(&self, txn: &mut TransactionContext, reason: &str) {
        if txn.is_active() {
            txn.mark_aborted(reason);
            self.aborts.fetch_add(1, Ordering::Relaxed);
            debug!(txn = %txn.txn_id, reason, "aborted");
        }
        self.release_held(txn);
    }

    fn try_acquire_lock(
        &self,
        txn: &mut TransactionContext,
        id: RecordId,
        timeout: Duration,
    ) -> Result<()> {
        txn.ensure_active()?;
        if !self.records.contains_key(&id) {
            return Err(Error::NotFound(id));
        }
        self.locks.acquire(txn.txn_id, id, timeout)?;
        txn.note_lock_acquired(id);
        Ok(())
    }

    fn release_lock(&self, owner: TxnId, id: RecordId) {
        self.locks.release(owner, id);
    }
}
