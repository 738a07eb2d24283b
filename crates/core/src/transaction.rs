//! Transaction context: staged writes and held locks for one scope
//!
//! A `TransactionContext` lives exactly as long as one
//! [`VersionedStore::with_transaction`](crate::VersionedStore::with_transaction)
//! call. It tracks:
//! - the write set: balances staged for commit, keyed by record, together
//!   with the version each record had when it was first written
//! - the locks acquired inside the scope, released at commit or abort
//!
//! Reads inside a transaction see the transaction's own staged writes
//! (read-your-writes) through [`TransactionContext::view`].

use crate::error::{Error, Result};
use crate::types::{RecordId, TxnId, VersionedRecord};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Lifecycle of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting reads, writes and lock requests
    Active,
    /// Writes applied atomically
    Committed,
    /// Writes discarded
    Aborted {
        /// Why the transaction was rolled back
        reason: String,
    },
}

/// A write staged for commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedWrite {
    /// Stored version when this transaction first wrote the record
    pub base_version: u64,
    /// Balance to install at commit
    pub balance: i64,
    /// Writes staged so far; the committed version is `base_version + writes`
    pub writes: u64,
}

impl StagedWrite {
    /// Version the record will have once committed
    pub fn version(&self) -> u64 {
        self.base_version + self.writes
    }
}

/// State of one transaction scope
#[derive(Debug)]
pub struct TransactionContext {
    /// Transaction identifier, also the owner of every lock held here
    pub txn_id: TxnId,
    /// Current lifecycle state
    pub status: TransactionStatus,
    write_set: BTreeMap<RecordId, StagedWrite>,
    held_locks: SmallVec<[RecordId; 4]>,
    started_at: Instant,
}

impl TransactionContext {
    /// Create an active transaction
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            status: TransactionStatus::Active,
            write_set: BTreeMap::new(),
            held_locks: SmallVec::new(),
            started_at: Instant::now(),
        }
    }

    /// Check if the transaction still accepts operations
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Fail unless the transaction is active
    pub fn ensure_active(&self) -> Result<()> {
        match &self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Committed => Err(Error::Internal(format!(
                "{} already committed",
                self.txn_id
            ))),
            TransactionStatus::Aborted { reason } => Err(Error::Aborted(format!(
                "{} aborted: {}",
                self.txn_id, reason
            ))),
        }
    }

    /// Overlay this transaction's staged write (if any) onto a stored record
    pub fn view(&self, stored: VersionedRecord) -> VersionedRecord {
        match self.write_set.get(&stored.id) {
            Some(staged) => VersionedRecord {
                id: stored.id,
                balance: staged.balance,
                version: staged.version(),
                updated_at: stored.updated_at,
            },
            None => stored,
        }
    }

    /// Stage a conditional write against the current `view` of a record
    ///
    /// Fails with `VersionConflict` if `expected` does not match the view.
    /// Returns the record as it will look after commit.
    pub fn stage(
        &mut self,
        view: &VersionedRecord,
        expected: u64,
        balance: i64,
    ) -> Result<VersionedRecord> {
        self.ensure_active()?;
        if view.version != expected {
            return Err(Error::VersionConflict {
                id: view.id,
                expected,
                actual: view.version,
            });
        }
        let staged = self.write_set.entry(view.id).or_insert(StagedWrite {
            base_version: view.version,
            balance,
            writes: 0,
        });
        staged.balance = balance;
        staged.writes += 1;
        Ok(view.next(balance))
    }

    /// Staged write for a record, if any
    pub fn staged(&self, id: RecordId) -> Option<&StagedWrite> {
        self.write_set.get(&id)
    }

    /// All staged writes in ascending record order
    pub fn write_set(&self) -> &BTreeMap<RecordId, StagedWrite> {
        &self.write_set
    }

    /// Check if nothing was written
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Record that the store granted a lock to this transaction
    pub fn note_lock_acquired(&mut self, id: RecordId) {
        if !self.held_locks.contains(&id) {
            self.held_locks.push(id);
        }
    }

    /// Record that a lock was released before the transaction ended
    pub fn note_lock_released(&mut self, id: RecordId) {
        self.held_locks.retain(|held| *held != id);
    }

    /// Locks currently held, in acquisition order
    pub fn held_locks(&self) -> &[RecordId] {
        &self.held_locks
    }

    /// Drain the held locks for release
    pub fn take_held_locks(&mut self) -> SmallVec<[RecordId; 4]> {
        std::mem::take(&mut self.held_locks)
    }

    /// Mark committed
    pub fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
    }

    /// Mark aborted and discard staged writes
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.write_set.clear();
        self.status = TransactionStatus::Aborted {
            reason: reason.into(),
        };
    }

    /// Time since the transaction began
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
