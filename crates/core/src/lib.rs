//! Core types for ledgerguard
//!
//! This crate defines everything the other layers agree on:
//! - [`VersionedRecord`], [`RecordId`], [`TxnId`]: the ledger data model
//! - [`Error`]: the error taxonomy with retry classification
//! - [`VersionedStore`]: the narrow contract every store adapter implements
//! - [`TransactionContext`]: staged writes and held locks for one transaction
//! - [`LedgerConfig`]: retry, circuit, lock and deadlock tuning
//! - [`MetricsSink`]: the observation seam for attempts and breaker events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod account;
pub mod cancel;
pub mod config;
pub mod error;
pub mod observe;
pub mod store;
pub mod transaction;
pub mod types;

pub use cancel::CancellationToken;
pub use config::{CircuitConfig, DeadlockConfig, Jitter, LedgerConfig, LockConfig, RetryConfig};
pub use error::{Classification, Error, Result};
pub use observe::{Attempt, AttemptOutcome, CallKind, MetricsSink, NoopSink, RetrySummary};
pub use store::VersionedStore;
pub use transaction::{StagedWrite, TransactionContext, TransactionStatus};
pub use types::{CircuitState, RecordId, TxnId, VersionedRecord};
