//! Shared helpers for integration tests

#![allow(dead_code)]

pub use ledgerguard::prelude::*;
pub use std::sync::{Arc, Barrier};
pub use std::thread;
pub use std::time::{Duration, Instant};

pub fn rid(n: u64) -> RecordId {
    RecordId::new(n)
}

/// Retry config with millisecond delays so tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(10)
}

/// Breaker config with a window of five calls
pub fn small_window() -> CircuitConfig {
    CircuitConfig::new()
        .with_sliding_window_size(5)
        .with_minimum_calls(5)
        .with_failure_rate_threshold(50.0)
}

pub fn ledger(records: impl IntoIterator<Item = (u64, i64)>) -> Ledger {
    Ledger::in_memory(records).expect("in-memory ledger")
}

/// Run `f(i)` on `n` threads released together, collecting results in thread order
pub fn run_concurrently<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let barrier = Barrier::new(n);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let barrier = &barrier;
                let f = &f;
                scope.spawn(move || {
                    barrier.wait();
                    f(i)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect()
    })
}
