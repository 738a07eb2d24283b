//! Error taxonomy for ledger operations
//!
//! Every failure the concurrency and resilience layers can observe is a
//! variant of [`Error`]. Each variant has a fixed [`Classification`]: the
//! retry layer consults it (or a call-site override) to decide whether another
//! attempt may succeed.
//!
//! | Variant | Classification | Notes |
//! |---------|----------------|-------|
//! | VersionConflict | Retryable | optimistic path |
//! | LockTimeout | Retryable | plain exponential backoff |
//! | DeadlockDetected | Retryable | jittered backoff to break symmetry |
//! | Unavailable | Retryable | transient store failure |
//! | CircuitOpen | Fatal | never retried, distinguishable by callers |
//! | Validation | Fatal | caller error |
//! | NotFound | Fatal | |
//! | AttemptsExhausted | Fatal | terminal, carries the last cause |

use crate::types::{CircuitState, RecordId};
use thiserror::Error;

/// Whether another attempt of a failed operation may succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Transient: retry with backoff
    Retryable,
    /// Permanent: surface to the caller immediately
    Fatal,
}

impl Classification {
    /// Check if this classification allows a retry
    pub fn is_retryable(self) -> bool {
        matches!(self, Classification::Retryable)
    }
}

/// All ledgerguard errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Record does not exist
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// Compare-and-swap failed: the stored version moved on
    #[error("version conflict on record {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        /// Record being written
        id: RecordId,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Lock wait exceeded its bound
    #[error("timed out after {waited_ms}ms waiting for lock on record {id}")]
    LockTimeout {
        /// Record whose lock could not be acquired
        id: RecordId,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Store chose this caller as the victim of a lock cycle
    #[error("deadlock detected while locking record {id}")]
    DeadlockDetected {
        /// Record whose lock request closed the cycle
        id: RecordId,
    },

    /// Transient store failure (connection loss, overload, injected fault)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Breaker rejected the call without attempting it
    #[error("circuit '{operation}' is {state}; call not permitted")]
    CircuitOpen {
        /// Logical operation name
        operation: String,
        /// Breaker state at rejection time
        state: CircuitState,
    },

    /// Caller supplied invalid input (non-positive amount, overdraft, ...)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Retries ran out; `source` is the last concrete failure
    #[error("gave up after {attempts} attempts (fallback used: {fallback_used}): {source}")]
    AttemptsExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Whether a fallback ran (and also failed)
        fallback_used: bool,
        /// Last underlying error
        #[source]
        source: Box<Error>,
    },

    /// Caller cancelled between attempts
    #[error("operation cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made before cancellation was observed
        attempts: u32,
    },

    /// Transaction was rolled back
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Bug or invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Default retry classification for this error
    pub fn classification(&self) -> Classification {
        match self {
            Error::VersionConflict { .. }
            | Error::LockTimeout { .. }
            | Error::DeadlockDetected { .. }
            | Error::Unavailable(_) => Classification::Retryable,
            _ => Classification::Fatal,
        }
    }

    /// Check if this error is retryable under the default classification
    pub fn is_retryable(&self) -> bool {
        self.classification().is_retryable()
    }

    /// Check if this is a version conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    /// Check if this is a deadlock signal
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Error::DeadlockDetected { .. })
    }

    /// Check if this is a lock timeout
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// Check if the call was rejected by an open breaker
    ///
    /// Callers use this to tell "try later" apart from a failed operation.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }

    /// Check if this is a caller error
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if retries were exhausted
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::AttemptsExhausted { .. })
    }

    /// Innermost concrete cause, looking through `AttemptsExhausted`
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::AttemptsExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Map a PostgreSQL SQLSTATE reported by a store adapter
    ///
    /// Drivers surface deadlocks, lock waits and serialization failures under
    /// different exception types; the SQLSTATE is the only stable signal.
    /// Unknown codes in class 08 (connection) and 57 (operator intervention)
    /// are transient; everything else is internal.
    pub fn from_sqlstate(code: &str, id: RecordId, waited_ms: u64) -> Self {
        match code {
            "40P01" => Error::DeadlockDetected { id },
            "55P03" | "57014" => Error::LockTimeout { id, waited_ms },
            "40001" => Error::VersionConflict {
                id,
                expected: 0,
                actual: 0,
            },
            c if c.starts_with("08") || c.starts_with("57") => {
                Error::Unavailable(format!("sqlstate {}", c))
            }
            c => Error::Internal(format!("unexpected sqlstate {}", c)),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
