//! Concurrency control for ledgerguard
//!
//! This crate implements the three ways of mutating shared records:
//! - OptimisticController: read, compute, compare-and-swap on the version
//! - PessimisticController: exclusive locks acquired in ascending id order,
//!   held for the whole transaction
//! - DeadlockCoordinator: locks in caller order and retries the victim of a
//!   lock cycle with jittered backoff
//!
//! Controllers never retry on their own. Retrying is the job of
//! `ledgerguard_resilience::RetryPolicy`, configured at the call site.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deadlock;
pub mod optimistic;
pub mod pessimistic;

pub use deadlock::{DeadlockCoordinator, DeadlockStats};
pub use optimistic::{OptimisticController, UpdatedRecord};
pub use pessimistic::{PessimisticController, TransferReceipt};
