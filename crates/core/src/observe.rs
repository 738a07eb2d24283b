//! Observation seam for retry attempts and breaker events
//!
//! The resilience layer reports everything it does through [`MetricsSink`].
//! All methods have empty default bodies, so an exporter only overrides the
//! events it cares about. [`NoopSink`] is the default.

use crate::types::CircuitState;
use std::time::Duration;

/// Terminal outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The operation returned a value
    Success,
    /// The operation failed and may be retried
    RetryableFailure,
    /// The operation failed permanently
    FatalFailure,
}

/// One try of an operation under a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 0-based attempt index
    pub index: u32,
    /// Backoff slept before this attempt (zero for the first)
    pub delay_before: Duration,
    /// Wall time the attempt itself took
    pub elapsed: Duration,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

/// Aggregate of one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySummary {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Total latency including every backoff sleep
    pub total_latency: Duration,
    /// Sum of backoff sleeps
    pub total_delay: Duration,
    /// Whether the operation (or its fallback) produced a value
    pub succeeded: bool,
    /// Whether the fallback ran
    pub fallback_used: bool,
}

/// Kind of call recorded by a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Completed within the slow-call threshold
    Success,
    /// Returned an error
    Failure,
    /// Succeeded, but slower than the slow-call threshold
    Slow,
    /// Rejected by the breaker without running
    NotPermitted,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallKind::Success => write!(f, "success"),
            CallKind::Failure => write!(f, "failure"),
            CallKind::Slow => write!(f, "slow"),
            CallKind::NotPermitted => write!(f, "not_permitted"),
        }
    }
}

/// Receiver of resilience events
///
/// Implementations must be cheap and must not block: they run inline on the
/// calling thread. They must not call back into the component that emitted
/// the event.
pub trait MetricsSink: Send + Sync {
    /// One attempt finished
    fn record_attempt(&self, _operation: &str, _attempt: &Attempt) {}

    /// A retry loop finished (success, fatal error, exhaustion or fallback)
    fn record_retry(&self, _operation: &str, _summary: &RetrySummary) {}

    /// A breaker recorded or rejected a call
    fn record_call(&self, _operation: &str, _kind: CallKind, _elapsed: Duration) {}

    /// A breaker changed state
    fn record_transition(&self, _operation: &str, _from: CircuitState, _to: CircuitState) {}
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {}
