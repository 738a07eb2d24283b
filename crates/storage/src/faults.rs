//! Fault injection for the in-memory store
//!
//! Faults fire at write boundaries: every autocommit `conditional_update`
//! and every `commit` consults the injector once. Injected failures surface
//! as `Error::Unavailable`, the same classification a dropped database
//! connection gets, so the retry and breaker layers treat them as transient.
//!
//! Sources, checked in order:
//! 1. a scripted outcome queue (`true` = fail)
//! 2. a fail-next counter
//! 3. a random failure rate
//!
//! Configured latency is slept before every check.

use ledgerguard_core::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Scripted and random transient failures
#[derive(Debug, Default)]
pub struct FaultInjector {
    script: Mutex<VecDeque<bool>>,
    fail_next: AtomicU32,
    /// Failure probability in parts per million
    failure_rate_ppm: AtomicU32,
    latency_us: AtomicU64,
    injected: AtomicU64,
}

impl FaultInjector {
    /// Create an injector that never fails
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` checks
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Queue explicit outcomes; `true` fails the corresponding check
    pub fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().extend(outcomes);
    }

    /// Fail each check with probability `rate`, clamped to `[0, 1]`
    pub fn set_failure_rate(&self, rate: f64) {
        let ppm = (rate.clamp(0.0, 1.0) * 1_000_000.0) as u32;
        self.failure_rate_ppm.store(ppm, Ordering::SeqCst);
    }

    /// Sleep `latency` before every check
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Remove every configured fault
    pub fn clear(&self) {
        self.script.lock().clear();
        self.fail_next.store(0, Ordering::SeqCst);
        self.failure_rate_ppm.store(0, Ordering::SeqCst);
        self.latency_us.store(0, Ordering::SeqCst);
    }

    /// Number of failures injected so far
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    /// Apply configured latency, then fail if a fault is due
    pub fn check(&self, operation: &str) -> Result<()> {
        let latency = self.latency_us.load(Ordering::Relaxed);
        if latency > 0 {
            std::thread::sleep(Duration::from_micros(latency));
        }

        if self.should_fail() {
            self.injected.fetch_add(1, Ordering::Relaxed);
            trace!(operation, "injecting transient fault");
            return Err(Error::Unavailable(format!(
                "injected fault during {}",
                operation
            )));
        }
        Ok(())
    }

    fn should_fail(&self) -> bool {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }

        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return true;
        }

        let ppm = self.failure_rate_ppm.load(Ordering::Relaxed);
        ppm > 0 && rand::thread_rng().gen_range(0..1_000_000) < ppm
    }
}
