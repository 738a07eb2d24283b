//! Core types for the ledger
//!
//! This module defines the fundamental types used throughout the system:
//! - [`RecordId`]: identifier of one ledger record (the canonical lock order)
//! - [`TxnId`]: identifier of one transaction scope (the lock owner)
//! - [`VersionedRecord`]: a balance paired with its version stamp
//! - [`CircuitState`]: breaker state, shared so errors can report it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a ledger record
///
/// The derived `Ord` is the canonical total order for lock acquisition.
/// Any code path that locks more than one record must request them in
/// ascending `RecordId` order.
///
/// # Examples
///
/// ```
/// use ledgerguard_core::RecordId;
///
/// let mut ids = vec![RecordId::new(7), RecordId::new(2)];
/// ids.sort();
/// assert_eq!(ids, vec![RecordId::new(2), RecordId::new(7)]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    /// Create a record id from its raw value
    pub const fn new(raw: u64) -> Self {
        RecordId(raw)
    }

    /// Raw value
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(raw: u64) -> Self {
        RecordId(raw)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a transaction scope
///
/// Stores hand these out from a monotonic counter. A `TxnId` owns every lock
/// acquired inside its scope until the scope commits or aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Create a transaction id from its raw value
    pub const fn new(raw: u64) -> Self {
        TxnId(raw)
    }

    /// Raw value
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// A ledger record with its version stamp
///
/// `balance` is held in minor currency units (cents). `version` starts at 0
/// when the record is created and grows by exactly one per successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Record identifier
    pub id: RecordId,
    /// Balance in minor units
    pub balance: i64,
    /// Version stamp used for compare-and-swap
    pub version: u64,
    /// Time of the last successful write (or creation)
    pub updated_at: DateTime<Utc>,
}

impl VersionedRecord {
    /// Create a fresh record at version 0
    pub fn new(id: RecordId, balance: i64) -> Self {
        Self {
            id,
            balance,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// The record as it looks after one successful write of `balance`
    pub fn next(&self, balance: i64) -> Self {
        Self {
            id: self.id,
            balance,
            version: self.version + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Circuit breaker state for one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through; outcomes are recorded
    Closed,
    /// Calls are rejected without reaching the store
    Open,
    /// A bounded number of probe calls are admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" | "HALFOPEN" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state: {}", other)),
        }
    }
}
