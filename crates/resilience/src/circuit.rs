//! Circuit breaker for one logical operation
//!
//! State machine: CLOSED → OPEN → HALF_OPEN → CLOSED
//!
//! - **CLOSED**: calls pass through; each outcome lands in a sliding window.
//!   Once the window holds at least `minimum_calls` outcomes and either the
//!   failure rate or the slow-call rate reaches its threshold, the breaker
//!   opens.
//! - **OPEN**: calls are rejected with `CircuitOpen` without running. After
//!   `wait_duration` the next call is admitted and the breaker moves to
//!   HALF_OPEN.
//! - **HALF_OPEN**: up to `permitted_probe_calls` probes are admitted.
//!   - Any failed probe → OPEN (timer restarts)
//!   - All probes succeed → CLOSED with an empty window
//!
//! Every transition bumps a generation counter. A [`Permit`] remembers the
//! generation it was issued under, and outcomes reported against an older
//! generation do not affect the state machine. This keeps `force_state` and
//! `reset` safe while calls are in flight.
//!
//! A call that panics is recorded as a failure before the panic resumes;
//! otherwise a HALF_OPEN probe slot would stay taken forever.

use crate::window::{CircuitWindow, Outcome};
use ledgerguard_core::{
    CallKind, CircuitConfig, CircuitState, Error, MetricsSink, NoopSink, Result,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Admission ticket for one call
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    generation: u64,
    started: Instant,
}

impl Permit {
    /// Time since the call was admitted
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Metrics snapshot for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitMetrics {
    /// Operation name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failure percentage over the window; `None` below `minimum_calls`
    pub failure_rate: Option<f64>,
    /// Slow-call percentage over the window; `None` below `minimum_calls`
    pub slow_call_rate: Option<f64>,
    /// Outcomes in the window
    pub buffered_calls: usize,
    /// Fast successes in the window
    pub successful_calls: usize,
    /// Failures in the window
    pub failed_calls: usize,
    /// Slow successes in the window
    pub slow_calls: usize,
    /// Calls rejected since creation or the last reset
    pub not_permitted_calls: u64,
    /// State changes since creation or the last reset
    pub state_transitions: u64,
}

struct BreakerInner {
    state: CircuitState,
    window: CircuitWindow,
    opened_at: Option<Instant>,
    generation: u64,
    probes_admitted: u32,
    probes_succeeded: u32,
}

/// Per-operation circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn MetricsSink>,
    not_permitted: AtomicU64,
    transitions: AtomicU64,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let window = CircuitWindow::new(config.sliding_window_size);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                generation: 0,
                probes_admitted: 0,
                probes_succeeded: 0,
            }),
            sink: Arc::new(NoopSink),
            not_permitted: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    /// Report calls and transitions to `sink`
    ///
    /// The sink runs while the breaker's lock is held and must not call back
    /// into this breaker.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state
    ///
    /// An OPEN breaker whose wait has elapsed still reports OPEN until the
    /// next call is admitted.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask to run a call
    ///
    /// # Errors
    ///
    /// `CircuitOpen` if the breaker is OPEN and still waiting, or HALF_OPEN
    /// with every probe slot taken.
    pub fn try_acquire(&self) -> Result<Permit> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let waited = inner
                .opened_at
                .map_or(true, |at| at.elapsed() >= self.config.wait_duration());
            if waited {
                self.transition(&mut inner, CircuitState::HalfOpen, "wait duration elapsed");
            }
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(self.permit(&inner)),
            CircuitState::HalfOpen if inner.probes_admitted < self.config.permitted_probe_calls => {
                inner.probes_admitted += 1;
                debug!(
                    operation = %self.name,
                    probe = inner.probes_admitted,
                    "admitting probe call"
                );
                Ok(self.permit(&inner))
            }
            state => {
                self.not_permitted.fetch_add(1, Ordering::Relaxed);
                self.sink
                    .record_call(&self.name, CallKind::NotPermitted, Duration::ZERO);
                warn!(operation = %self.name, %state, "call rejected by circuit breaker");
                Err(Error::CircuitOpen {
                    operation: self.name.clone(),
                    state,
                })
            }
        }
    }

    fn permit(&self, inner: &BreakerInner) -> Permit {
        Permit {
            generation: inner.generation,
            started: Instant::now(),
        }
    }

    /// Report the outcome of an admitted call
    ///
    /// `failed` marks an error; a success slower than the slow-call threshold
    /// is recorded as slow.
    pub fn record(&self, permit: Permit, failed: bool) {
        let elapsed = permit.elapsed();
        let outcome = Outcome::classify(failed, elapsed, self.config.slow_call_duration());
        let kind = match outcome {
            Outcome::Success => CallKind::Success,
            Outcome::Failure => CallKind::Failure,
            Outcome::Slow => CallKind::Slow,
        };

        let mut inner = self.inner.lock();
        self.sink.record_call(&self.name, kind, elapsed);

        if permit.generation != inner.generation {
            debug!(
                operation = %self.name,
                permit_generation = permit.generation,
                generation = inner.generation,
                "ignoring outcome from an earlier state"
            );
            return;
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.window.record(outcome);
                if inner.window.len() < self.config.minimum_calls {
                    return;
                }
                let failure_rate = inner.window.failure_rate();
                let slow_rate = inner.window.slow_rate();
                if failure_rate >= self.config.failure_rate_threshold {
                    warn!(operation = %self.name, failure_rate, "failure rate threshold reached");
                    self.transition(&mut inner, CircuitState::Open, "failure rate threshold reached");
                } else if slow_rate >= self.config.slow_call_rate_threshold {
                    warn!(operation = %self.name, slow_rate, "slow call rate threshold reached");
                    self.transition(&mut inner, CircuitState::Open, "slow call rate threshold reached");
                }
            }
            CircuitState::HalfOpen => {
                if outcome == Outcome::Failure {
                    self.transition(&mut inner, CircuitState::Open, "probe failed");
                } else {
                    inner.probes_succeeded += 1;
                    if inner.probes_succeeded >= self.config.permitted_probe_calls {
                        self.transition(&mut inner, CircuitState::Closed, "all probes succeeded");
                    }
                }
            }
            // Opening bumps the generation, so no permit can match here
            CircuitState::Open => {}
        }
    }

    /// Report a successful call
    pub fn on_success(&self, permit: Permit) {
        self.record(permit, false);
    }

    /// Report a failed call
    pub fn on_error(&self, permit: Permit) {
        self.record(permit, true);
    }

    /// Run `f` through the breaker; every error counts as a failure
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.call_with(f, |_| true)
    }

    /// Run `f` through the breaker; `is_failure` decides which errors count
    ///
    /// Errors for which `is_failure` returns false are recorded as successes.
    /// A panic in `f` is recorded as a failure and then resumed.
    pub fn call_with<T, E, F, P>(&self, f: F, is_failure: P) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        P: Fn(&E) -> bool,
        E: From<Error>,
    {
        let permit = self.try_acquire()?;
        let result = self.guard_panic(permit, f);
        let failed = matches!(&result, Err(e) if is_failure(e));
        self.record(permit, failed);
        result
    }

    /// Run `f` under `permit`, recording a failure if it panics
    ///
    /// The panic is resumed once the outcome is recorded. Callers that take
    /// a permit with [`try_acquire`](Self::try_acquire) and run arbitrary
    /// code should go through here so a HALF_OPEN probe slot is always
    /// returned.
    pub fn guard_panic<R, F>(&self, permit: Permit, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(payload) => {
                warn!(operation = %self.name, "call panicked; recording failure");
                self.record(permit, true);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Move to `state` regardless of the window
    ///
    /// Forcing OPEN restarts the wait timer; forcing CLOSED clears the window.
    pub fn force_state(&self, state: CircuitState) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, state, "forced");
    }

    /// Return to CLOSED with an empty window and zeroed counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed, "reset");
        self.not_permitted.store(0, Ordering::Relaxed);
        self.transitions.store(0, Ordering::Relaxed);
        info!(operation = %self.name, "circuit breaker reset");
    }

    /// Snapshot of state, rates and counters
    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock();
        let rated = inner.window.len() >= self.config.minimum_calls;
        CircuitMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_rate: rated.then(|| inner.window.failure_rate()),
            slow_call_rate: rated.then(|| inner.window.slow_rate()),
            buffered_calls: inner.window.len(),
            successful_calls: inner.window.successes(),
            failed_calls: inner.window.failures(),
            slow_calls: inner.window.slow(),
            not_permitted_calls: self.not_permitted.load(Ordering::Relaxed),
            state_transitions: self.transitions.load(Ordering::Relaxed),
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, reason: &str) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.probes_admitted = 0;
        inner.probes_succeeded = 0;

        match to {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {}
        }

        if from != to {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            self.sink.record_transition(&self.name, from, to);
            info!(operation = %self.name, %from, %to, reason, "circuit breaker transition");
        }
    }
}
