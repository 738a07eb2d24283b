//! # ledgerguard
//!
//! Concurrency control and fault resilience for a shared, versioned ledger.
//!
//! Many writers update the same balance records at once. ledgerguard keeps
//! every committed update, never applies a partial transfer, and keeps
//! transient failures (conflicts, lock timeouts, deadlocks, an unavailable
//! store) from turning into user-visible errors or cascading outages.
//!
//! ## Quick Start
//!
//! ```
//! use ledgerguard::prelude::*;
//!
//! let ledger = Ledger::in_memory([(1, 1000), (2, 0)])?;
//! let retry = ledger.config().retry.clone();
//!
//! // Compare-and-swap with conflict retries
//! let report = ledger.optimistic_update(RecordId::new(1), |b| account::debit(b, 150), &retry)?;
//! assert_eq!(report.record.after.balance, 850);
//!
//! // Two-record transfer under ordered locks
//! ledger.pessimistic_transfer(RecordId::new(1), RecordId::new(2), 100, &retry)?;
//!
//! // Any operation behind a named circuit breaker
//! let balance = ledger.guarded_call("read", || Ok(ledger.record(RecordId::new(2))?.balance), &retry)?;
//! assert_eq!(balance, 100);
//! # Ok::<(), ledgerguard::Error>(())
//! ```
//!
//! ## Layers
//!
//! - `ledgerguard-core`: data model, error taxonomy, configuration, the store contract
//! - [`storage`]: the in-memory reference store with row locks and fault injection
//! - [`concurrency`]: optimistic, pessimistic and deadlock-aware controllers
//! - [`resilience`]: retry policy and circuit breaker
//!
//! [`Ledger`] composes them; [`scenarios`] drives them under contention.

#![warn(missing_docs)]

mod ledger;

pub mod prelude;
pub mod scenarios;

// Re-export main entry points
pub use ledger::{Ledger, LedgerBuilder, TransferReport, UpdateReport};
pub use ledgerguard_core::{Error, Result};

// Re-export the layers
pub use ledgerguard_concurrency as concurrency;
pub use ledgerguard_resilience as resilience;
pub use ledgerguard_storage as storage;
