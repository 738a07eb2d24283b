//! Convenient imports for ledgerguard.
//!
//! ```
//! use ledgerguard::prelude::*;
//!
//! let ledger = Ledger::in_memory([(1, 10)])?;
//! assert_eq!(ledger.record(RecordId::new(1))?.balance, 10);
//! # Ok::<(), ledgerguard::Error>(())
//! ```

// Main entry point
pub use crate::ledger::{Ledger, LedgerBuilder, TransferReport, UpdateReport};

// Error handling
pub use ledgerguard_core::{Classification, Error, Result};

// Data model
pub use ledgerguard_core::{account, CircuitState, RecordId, TxnId, VersionedRecord};

// Configuration
pub use ledgerguard_core::{
    CircuitConfig, DeadlockConfig, Jitter, LedgerConfig, LockConfig, RetryConfig,
};

// Store contract and reference store
pub use ledgerguard_core::{CancellationToken, MetricsSink, TransactionContext, VersionedStore};
pub use ledgerguard_storage::InMemoryStore;

// Controllers and decorators
pub use ledgerguard_concurrency::{
    DeadlockCoordinator, OptimisticController, PessimisticController, TransferReceipt,
};
pub use ledgerguard_resilience::{CircuitBreaker, CircuitMetrics, RetryError, RetryPolicy};
