//! Exclusive row locks with deadlock detection
//!
//! Each record has at most one owner. A requester that finds the record
//! held waits on a condition variable until the owner releases it or the
//! lock timeout passes.
//!
//! # Deadlock detection
//!
//! While waiting, the requester records a `waits_for` edge pointing at the
//! current owner. A transaction waits on at most one lock at a time, so the
//! wait-for graph is a set of chains. Before blocking, the requester walks
//! the chain starting at the owner: if it leads back to the requester, the
//! request would close a cycle and fails with `DeadlockDetected`. The
//! requester that closes the cycle is the victim; the caller aborts it, which
//! releases its locks and lets the other side proceed.
//!
//! A timeout is reported as `LockTimeout`, never as a deadlock.

use ledgerguard_core::{Error, RecordId, Result, TxnId};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LockTable {
    owners: FxHashMap<RecordId, TxnId>,
    waits_for: FxHashMap<TxnId, TxnId>,
}

impl LockTable {
    /// Follow the wait-for chain from `waiter`; true if it returns to `waiter`
    fn closes_cycle(&self, waiter: TxnId) -> bool {
        let mut current = match self.waits_for.get(&waiter) {
            Some(holder) => *holder,
            None => return false,
        };
        // Chains are acyclic before the new edge, so the walk is bounded
        for _ in 0..=self.waits_for.len() {
            if current == waiter {
                return true;
            }
            match self.waits_for.get(&current) {
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }
}

/// Lock manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// Locks granted
    pub acquired: u64,
    /// Requests that had to wait for another owner
    pub waits: u64,
    /// Requests that gave up at the timeout
    pub timeouts: u64,
    /// Requests rejected because they would close a cycle
    pub deadlocks: u64,
}

/// Exclusive locks keyed by record
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    acquired: AtomicU64,
    waits: AtomicU64,
    timeouts: AtomicU64,
    deadlocks: AtomicU64,
}

impl LockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock on `id` for `owner`, waiting at most `timeout`
    ///
    /// Reentrant: succeeds immediately if `owner` already holds the lock.
    ///
    /// # Errors
    ///
    /// - `DeadlockDetected` if waiting would close a cycle in the wait-for graph
    /// - `LockTimeout` if the lock is still held by another owner at the deadline
    pub fn acquire(&self, owner: TxnId, id: RecordId, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut table = self.table.lock();
        let mut waited = false;

        loop {
            let holder = match table.owners.get(&id) {
                None => {
                    table.owners.insert(id, owner);
                    table.waits_for.remove(&owner);
                    self.acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Some(holder) if *holder == owner => {
                    table.waits_for.remove(&owner);
                    return Ok(());
                }
                Some(holder) => *holder,
            };

            table.waits_for.insert(owner, holder);
            if table.closes_cycle(owner) {
                table.waits_for.remove(&owner);
                self.deadlocks.fetch_add(1, Ordering::Relaxed);
                warn!(%owner, %holder, record = %id, "lock request closes a wait-for cycle");
                return Err(Error::DeadlockDetected { id });
            }

            if !waited {
                waited = true;
                self.waits.fetch_add(1, Ordering::Relaxed);
                debug!(%owner, %holder, record = %id, "waiting for lock");
            }

            if self.released.wait_until(&mut table, deadline).timed_out() {
                let still_held = table.owners.get(&id).is_some_and(|h| *h != owner);
                if still_held {
                    table.waits_for.remove(&owner);
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    let waited_ms = started.elapsed().as_millis() as u64;
                    debug!(%owner, record = %id, waited_ms, "lock wait timed out");
                    return Err(Error::LockTimeout { id, waited_ms });
                }
            }
        }
    }

    /// Release the lock on `id` if `owner` holds it
    pub fn release(&self, owner: TxnId, id: RecordId) {
        let mut table = self.table.lock();
        if table.owners.get(&id) == Some(&owner) {
            table.owners.remove(&id);
            drop(table);
            self.released.notify_all();
        }
    }

    /// Release every lock in `ids` held by `owner` and clear its wait edge
    pub fn release_all(&self, owner: TxnId, ids: &[RecordId]) {
        let mut table = self.table.lock();
        let mut freed = false;
        for id in ids {
            if table.owners.get(id) == Some(&owner) {
                table.owners.remove(id);
                freed = true;
            }
        }
        table.waits_for.remove(&owner);
        drop(table);
        if freed {
            self.released.notify_all();
        }
    }

    /// Current owner of the lock on `id`
    pub fn owner(&self, id: RecordId) -> Option<TxnId> {
        self.table.lock().owners.get(&id).copied()
    }

    /// Number of locks currently held
    pub fn held_count(&self) -> usize {
        self.table.lock().owners.len()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn rid(n: u64) -> RecordId {
        RecordId::new(n)
    }

    fn tid(n: u64) -> TxnId {
        TxnId::new(n)
    }

    #[test]
    fn test_acquire_free_lock() {
        let locks = LockManager::new();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();
        assert_eq!(locks.owner(rid(1)), Some(tid(1)));
        assert_eq!(locks.stats().acquired, 1);
    }

    #[test]
    fn test_acquire_is_reentrant() {
        let locks = LockManager::new();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();
        assert_eq!(locks.held_count(), 1);
    }

    #[test]
    fn test_timeout_when_held() {
        let locks = LockManager::new();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();

        let err = locks
            .acquire(tid(2), rid(1), Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(!err.is_deadlock());
        assert_eq!(locks.stats().timeouts, 1);
        assert_eq!(locks.owner(rid(1)), Some(tid(1)));
    }

    #[test]
    fn test_release_is_idempotent_and_owner_checked() {
        let locks = LockManager::new();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();

        locks.release(tid(2), rid(1));
        assert_eq!(locks.owner(rid(1)), Some(tid(1)));

        locks.release(tid(1), rid(1));
        locks.release(tid(1), rid(1));
        assert_eq!(locks.owner(rid(1)), None);
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let locks = Arc::new(LockManager::new());
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(tid(2), rid(1), Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        locks.release_all(tid(1), &[rid(1)]);

        waiter.join().unwrap().unwrap();
        assert_eq!(locks.owner(rid(1)), Some(tid(2)));
        assert_eq!(locks.stats().waits, 1);
    }

    #[test]
    fn test_opposite_order_reports_deadlock() {
        let locks = Arc::new(LockManager::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [(1, rid(1), rid(2)), (2, rid(2), rid(1))]
            .into_iter()
            .map(|(txn, first, second)| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let owner = tid(txn);
                    locks.acquire(owner, first, Duration::ZERO).unwrap();
                    barrier.wait();
                    let result = locks.acquire(owner, second, Duration::from_secs(5));
                    // Victim (or winner) gives everything back
                    locks.release_all(owner, &[first, second]);
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let deadlocks = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_deadlock()))
            .count();
        let granted = results.iter().filter(|r| r.is_ok()).count();

        assert_eq!(deadlocks, 1);
        assert_eq!(granted, 1);
        assert_eq!(locks.stats().deadlocks, 1);
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_three_way_cycle() {
        let locks = LockManager::new();
        locks.acquire(tid(1), rid(1), Duration::ZERO).unwrap();
        locks.acquire(tid(2), rid(2), Duration::ZERO).unwrap();
        locks.acquire(tid(3), rid(3), Duration::ZERO).unwrap();

        // Edges 1 -> 2 and 2 -> 3 installed by hand; 3 -> 1 closes the cycle
        {
            let mut table = locks.table.lock();
            table.waits_for.insert(tid(1), tid(2));
            table.waits_for.insert(tid(2), tid(3));
        }
        let err = locks
            .acquire(tid(3), rid(1), Duration::from_secs(5))
            .unwrap_err();
        assert!(err.is_deadlock());
    }
}
