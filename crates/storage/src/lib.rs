//! In-memory reference store for ledgerguard
//!
//! This crate implements the `VersionedStore` contract with:
//! - InMemoryStore: DashMap-backed records with compare-and-swap writes
//! - Atomic multi-record commit under a commit lock
//! - LockManager: exclusive row locks with bounded waits and a wait-for
//!   graph that reports lock cycles as `DeadlockDetected`
//! - FaultInjector: scripted or random transient failures and latency

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod faults;
pub mod locks;
pub mod memory;

pub use faults::FaultInjector;
pub use locks::{LockManager, LockStats};
pub use memory::{InMemoryStore, StoreStats};
