//! Aggregate retry counters
//!
//! One [`RetryMetrics`] is typically shared by every policy of a ledger.
//! Each finished `execute` call folds its [`RetrySummary`] into the counters.

use ledgerguard_core::{MetricsSink, RetrySummary};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free retry counters
#[derive(Debug, Default)]
pub struct RetryMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
}

/// Point-in-time view of [`RetryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RetryMetricsSnapshot {
    /// Attempts across all operations, first tries included
    pub total_attempts: u64,
    /// Operations that produced a value (fallback included)
    pub total_successes: u64,
    /// Operations that ended in an error
    pub total_failures: u64,
    /// Operations whose fallback ran
    pub total_fallbacks: u64,
    /// `successes / (successes + failures)` as a percentage
    pub success_rate: f64,
    /// `attempts / (successes + failures)`
    pub average_attempts_per_operation: f64,
}

impl RetryMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished operation into the counters
    pub fn record(&self, summary: &RetrySummary) {
        self.attempts
            .fetch_add(summary.attempts as u64, Ordering::Relaxed);
        if summary.succeeded {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        if summary.fallback_used {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the counters and derived rates
    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        let total_attempts = self.attempts.load(Ordering::Relaxed);
        let total_successes = self.successes.load(Ordering::Relaxed);
        let total_failures = self.failures.load(Ordering::Relaxed);
        let total_fallbacks = self.fallbacks.load(Ordering::Relaxed);
        let operations = total_successes + total_failures;

        let (success_rate, average_attempts_per_operation) = if operations > 0 {
            (
                total_successes as f64 * 100.0 / operations as f64,
                total_attempts as f64 / operations as f64,
            )
        } else {
            (0.0, 0.0)
        };

        RetryMetricsSnapshot {
            total_attempts,
            total_successes,
            total_failures,
            total_fallbacks,
            success_rate,
            average_attempts_per_operation,
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.fallbacks.store(0, Ordering::Relaxed);
        info!("retry metrics reset");
    }
}

impl MetricsSink for RetryMetrics {
    fn record_retry(&self, _operation: &str, summary: &RetrySummary) {
        self.record(summary);
    }
}
