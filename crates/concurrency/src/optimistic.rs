//! Optimistic updates
//!
//! One call to [`OptimisticController::update`] is a single attempt:
//! 1. Read the record and its version
//! 2. Compute the new balance with the caller's `mutate`
//! 3. Compare-and-swap against the version read in step 1
//!
//! If another writer got in between, the store reports `VersionConflict`
//! (retryable) and nothing is written. The controller does not loop; wrap it
//! in a `RetryPolicy` to retry conflicts.

use ledgerguard_core::{account, RecordId, Result, VersionedRecord, VersionedStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// A successful optimistic write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedRecord {
    /// State read before the write
    pub before: VersionedRecord,
    /// State installed by the write; `after.version == before.version + 1`
    pub after: VersionedRecord,
}

impl UpdatedRecord {
    /// Signed balance change applied by the write
    pub fn delta(&self) -> i64 {
        self.after.balance - self.before.balance
    }
}

/// Compare-and-swap writer over a shared store
#[derive(Debug)]
pub struct OptimisticController<S> {
    store: Arc<S>,
}

impl<S> Clone for OptimisticController<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: VersionedStore> OptimisticController<S> {
    /// Create a controller over `store`
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read, apply `mutate`, and write back conditionally on the read version
    ///
    /// # Errors
    ///
    /// - `NotFound` if the record does not exist
    /// - whatever `mutate` returns (typically `Validation`)
    /// - `VersionConflict` if the record changed since it was read
    pub fn update<F>(&self, id: RecordId, mutate: F) -> Result<UpdatedRecord>
    where
        F: FnOnce(i64) -> Result<i64>,
    {
        let before = self.store.get(id)?;
        let balance = mutate(before.balance)?;

        match self.store.conditional_update(id, before.version, balance) {
            Ok(after) => {
                debug!(record = %id, version = after.version, "optimistic update applied");
                Ok(UpdatedRecord { before, after })
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(record = %id, read_version = before.version, "optimistic update lost the race");
                }
                Err(e)
            }
        }
    }

    /// Add `amount` to the record's balance
    pub fn credit(&self, id: RecordId, amount: i64) -> Result<UpdatedRecord> {
        self.update(id, |balance| account::credit(balance, amount))
    }

    /// Subtract `amount` from the record's balance
    pub fn debit(&self, id: RecordId, amount: i64) -> Result<UpdatedRecord> {
        self.update(id, |balance| account::debit(balance, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerguard_core::Error;
    use ledgerguard_storage::InMemoryStore;
    use proptest::prelude::*;

    fn controller(balance: i64) -> OptimisticController<InMemoryStore> {
        OptimisticController::new(Arc::new(InMemoryStore::seeded([(1, balance)])))
    }

    #[test]
    fn test_update_bumps_version_once() {
        let ctl = controller(1000);
        let updated = ctl.debit(RecordId::new(1), 100).unwrap();

        assert_eq!(updated.before.version, 0);
        assert_eq!(updated.after.version, 1);
        assert_eq!(updated.after.balance, 900);
        assert_eq!(updated.delta(), -100);
    }

    #[test]
    fn test_mutate_error_writes_nothing() {
        let ctl = controller(10);
        let err = ctl.debit(RecordId::new(1), 50).unwrap_err();

        assert!(err.is_validation());
        let record = ctl.store().get(RecordId::new(1)).unwrap();
        assert_eq!(record.version, 0);
        assert_eq!(record.balance, 10);
    }

    #[test]
    fn test_conflict_when_version_moves() {
        let ctl = controller(1000);
        let id = RecordId::new(1);

        // A concurrent writer sneaks in between read and write
        let err = ctl
            .update(id, |balance| {
                ctl.store().conditional_update(id, 0, 500).unwrap();
                Ok(balance - 100)
            })
            .unwrap_err();

        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(ctl.store().get(id).unwrap().balance, 500);
    }

    #[test]
    fn test_missing_record() {
        let ctl = controller(0);
        assert!(ctl.credit(RecordId::new(2), 5).unwrap_err().is_not_found());
    }

    proptest! {
        #[test]
        fn prop_version_counts_applied_updates(deltas in proptest::collection::vec(-80i64..80, 0..40)) {
            let ctl = controller(100);
            let id = RecordId::new(1);
            let mut balance = 100i64;
            let mut applied = 0u64;

            for delta in deltas {
                let result = if delta >= 0 {
                    ctl.credit(id, delta)
                } else {
                    ctl.debit(id, -delta)
                };
                match result {
                    Ok(updated) => {
                        prop_assert_eq!(updated.delta(), delta);
                        balance += delta;
                        applied += 1;
                    }
                    Err(e) => prop_assert!(e.is_validation()),
                }
            }

            let record = ctl.store().get(id).unwrap();
            prop_assert_eq!(record.balance, balance);
            prop_assert_eq!(record.version, applied);
            prop_assert!(record.balance >= 0);
        }
    }
}
