//! Fault resilience for ledger operations
//!
//! This crate provides the two decorators wrapped around store calls:
//! - RetryPolicy: bounded retries with exponential (optionally jittered)
//!   backoff, caller-supplied classification, fallback and cancellation
//! - CircuitBreaker: CLOSED / OPEN / HALF_OPEN gate driven by the failure
//!   and slow-call rates over a sliding window of recent outcomes
//!
//! plus the shared pieces they are built from: backoff schedules, retry
//! counters, the outcome window and a registry of breakers keyed by
//! operation name.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod circuit;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod window;

pub use backoff::Backoff;
pub use circuit::{CircuitBreaker, CircuitMetrics, Permit};
pub use metrics::{RetryMetrics, RetryMetricsSnapshot};
pub use registry::CircuitRegistry;
pub use retry::{RetryError, RetryOutcome, RetryPolicy};
pub use window::{CircuitWindow, Outcome};
