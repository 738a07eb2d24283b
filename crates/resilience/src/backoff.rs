//! Backoff schedules
//!
//! A [`Backoff`] turns a [`RetryConfig`] into concrete sleep durations:
//! `min(base * multiplier^attempt, max)`, plus additive jitter when
//! configured. Jitter never pushes a delay past `max`. Sleeps can be
//! interrupted by a [`CancellationToken`].

use ledgerguard_core::{CancellationToken, Jitter, RetryConfig};
use rand::Rng;
use std::time::{Duration, Instant};

/// Granularity at which a cancellable sleep re-checks its token
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Delay calculator for one retry configuration
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
}

impl Backoff {
    /// Create a backoff from a retry configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Underlying configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after the failed attempt with 0-based index `attempt`, jittered
    /// and capped at `max_delay_ms`
    pub fn delay(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.config.max_delay_ms);
        apply_jitter(self.config.delay_for(attempt), self.config.jitter).min(max)
    }

    /// Deterministic delays between consecutive attempts
    ///
    /// Yields `max_attempts - 1` values: one per retry.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.config.max_attempts.saturating_sub(1)).map(|a| self.config.delay_for(a))
    }
}

/// Add jitter to a deterministic delay
///
/// `Proportional(f)` adds a uniform extra in `[0, f * delay)`, so the result
/// is never shorter than `delay`.
pub fn apply_jitter(delay: Duration, jitter: Jitter) -> Duration {
    match jitter {
        Jitter::Proportional(factor) if factor > 0.0 && !delay.is_zero() => {
            let extra = rand::thread_rng().gen_range(0.0..factor);
            delay + delay.mul_f64(extra)
        }
        _ => delay,
    }
}

/// Sleep for `duration`, waking early if `token` is cancelled
///
/// Returns `false` if the sleep was cut short by cancellation.
pub fn sleep_cancellable(duration: Duration, token: Option<&CancellationToken>) -> bool {
    let token = match token {
        Some(token) => token,
        None => {
            std::thread::sleep(duration);
            return true;
        }
    };

    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
