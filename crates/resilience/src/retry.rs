//! Bounded retries with exponential backoff
//!
//! [`RetryPolicy::execute`] runs an operation until it succeeds, fails with
//! an error the classifier calls fatal, or runs out of attempts. Between
//! attempts it sleeps for the policy's backoff delay.
//!
//! # Outcomes
//!
//! | Situation | Result |
//! |-----------|--------|
//! | operation succeeds | `Ok(RetryOutcome { fallback_used: false, .. })` |
//! | fatal error | `Err(RetryError::Fatal)` immediately |
//! | attempts exhausted, fallback succeeds | `Ok(RetryOutcome { fallback_used: true, .. })` |
//! | attempts exhausted, no fallback or fallback fails | `Err(RetryError::Exhausted)` |
//! | token cancelled before an attempt or a sleep | `Err(RetryError::Cancelled)` |
//!
//! Every attempt is reported to the policy's [`MetricsSink`], and every call
//! ends with exactly one [`RetrySummary`].

use crate::backoff::{sleep_cancellable, Backoff};
use crate::metrics::RetryMetrics;
use ledgerguard_core::{
    Attempt, AttemptOutcome, CancellationToken, Classification, Error, MetricsSink, NoopSink,
    RetryConfig, RetrySummary,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Fallback run once attempts are exhausted; receives the last error
pub type Fallback<'a, T, E> = Box<dyn FnOnce(&E) -> Result<T, E> + 'a>;

/// Successful result of a retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    /// Value produced by the operation or its fallback
    pub value: T,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Whether the value came from the fallback
    pub fallback_used: bool,
    /// Total latency including backoff sleeps
    pub elapsed: Duration,
    /// Sum of backoff sleeps
    pub total_delay: Duration,
}

impl<T> RetryOutcome<T> {
    /// Discard the bookkeeping and keep the value
    pub fn into_value(self) -> T {
        self.value
    }

    /// Number of retries after the first attempt
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Terminal failure of a retried operation
#[derive(Debug, Clone, Error)]
pub enum RetryError<E> {
    /// The classifier marked the error fatal
    #[error("fatal error on attempt {attempts}: {error}")]
    Fatal {
        /// The fatal error
        error: E,
        /// Attempts made, including the failing one
        attempts: u32,
    },

    /// Every attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Last error seen (from the fallback, if one ran)
        last: E,
        /// Attempts made, including the first
        attempts: u32,
        /// Whether a fallback ran and also failed
        fallback_used: bool,
    },

    /// Cancellation observed before an attempt or a backoff sleep
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
        /// Error of the last attempt, if any ran
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Check if the retry budget ran out
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// Check if the error was classified fatal
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal { .. })
    }

    /// Check if the call was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The last underlying error, if any attempt ran
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Fatal { error, .. } => Some(error),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Cancelled { last, .. } => last.as_ref(),
        }
    }
}

impl From<RetryError<Error>> for Error {
    fn from(e: RetryError<Error>) -> Self {
        match e {
            RetryError::Fatal { error, .. } => error,
            RetryError::Exhausted {
                last,
                attempts,
                fallback_used,
            } => Error::AttemptsExhausted {
                attempts,
                fallback_used,
                source: Box::new(last),
            },
            RetryError::Cancelled { attempts, .. } => Error::Cancelled { attempts },
        }
    }
}

/// Retry decorator for one logical operation
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
    operation: String,
    sink: Arc<dyn MetricsSink>,
    metrics: Option<Arc<RetryMetrics>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("operation", &self.operation)
            .field("config", self.backoff.config())
            .finish()
    }
}

impl RetryPolicy {
    /// Create a policy from a retry configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            backoff: Backoff::new(config),
            operation: "operation".to_string(),
            sink: Arc::new(NoopSink),
            metrics: None,
        }
    }

    /// Name used in log events and sink reports
    pub fn named(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Report attempts and summaries to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Fold every summary into shared counters
    pub fn with_metrics(mut self, metrics: Arc<RetryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying configuration
    pub fn config(&self) -> &RetryConfig {
        self.backoff.config()
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run `op` with retries; errors are classified by `classify`
    pub fn execute<T, E, Op, C>(&self, op: Op, classify: C) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        Op: FnMut() -> Result<T, E>,
        C: Fn(&E) -> Classification,
        E: fmt::Display,
    {
        self.run(op, classify, None, None)
    }

    /// Run `op` with retries, falling back to `fallback` once attempts run out
    pub fn execute_with_fallback<T, E, Op, C, F>(
        &self,
        op: Op,
        classify: C,
        fallback: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        Op: FnMut() -> Result<T, E>,
        C: Fn(&E) -> Classification,
        F: FnOnce(&E) -> Result<T, E>,
        E: fmt::Display,
    {
        self.run(op, classify, Some(Box::new(fallback)), None)
    }

    /// Run `op` with retries, stopping early once `token` is cancelled
    pub fn execute_with_cancel<T, E, Op, C>(
        &self,
        op: Op,
        classify: C,
        token: &CancellationToken,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        Op: FnMut() -> Result<T, E>,
        C: Fn(&E) -> Classification,
        E: fmt::Display,
    {
        self.run(op, classify, None, Some(token))
    }

    /// Run a ledger operation with the default error classification
    ///
    /// Exhaustion maps to `Error::AttemptsExhausted`, fatal errors pass
    /// through unchanged.
    pub fn call<T, Op>(&self, op: Op) -> ledgerguard_core::Result<T>
    where
        Op: FnMut() -> ledgerguard_core::Result<T>,
    {
        self.execute(op, Error::classification)
            .map(RetryOutcome::into_value)
            .map_err(Error::from)
    }

    /// General form of `execute`: optional fallback and cancellation
    pub fn run<T, E, Op, C>(
        &self,
        mut op: Op,
        classify: C,
        fallback: Option<Fallback<'_, T, E>>,
        token: Option<&CancellationToken>,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        Op: FnMut() -> Result<T, E>,
        C: Fn(&E) -> Classification,
        E: fmt::Display,
    {
        let started = Instant::now();
        let max_attempts = self.config().max_attempts.max(1);
        let cancelled = || token.is_some_and(CancellationToken::is_cancelled);

        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;
        let mut delay_before = Duration::ZERO;

        let last = loop {
            if cancelled() {
                self.finish(started, attempts, total_delay, false, false);
                debug!(operation = %self.operation, attempts, "cancelled before attempt");
                return Err(RetryError::Cancelled {
                    attempts,
                    last: None,
                });
            }

            let attempt_started = Instant::now();
            let result = op();
            let elapsed = attempt_started.elapsed();
            let index = attempts;
            attempts += 1;

            let err = match result {
                Ok(value) => {
                    self.report_attempt(index, delay_before, elapsed, AttemptOutcome::Success);
                    self.finish(started, attempts, total_delay, true, false);
                    if attempts > 1 {
                        info!(operation = %self.operation, attempts, "succeeded after retry");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts,
                        fallback_used: false,
                        elapsed: started.elapsed(),
                        total_delay,
                    });
                }
                Err(err) => err,
            };

            if !classify(&err).is_retryable() {
                self.report_attempt(index, delay_before, elapsed, AttemptOutcome::FatalFailure);
                self.finish(started, attempts, total_delay, false, false);
                debug!(operation = %self.operation, attempts, error = %err, "fatal error, not retrying");
                return Err(RetryError::Fatal {
                    error: err,
                    attempts,
                });
            }
            self.report_attempt(index, delay_before, elapsed, AttemptOutcome::RetryableFailure);

            if attempts >= max_attempts {
                break err;
            }

            let delay = self.backoff.delay(index);
            warn!(
                operation = %self.operation,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable failure, backing off"
            );

            if cancelled() || !sleep_cancellable(delay, token) {
                self.finish(started, attempts, total_delay, false, false);
                debug!(operation = %self.operation, attempts, "cancelled during backoff");
                return Err(RetryError::Cancelled {
                    attempts,
                    last: Some(err),
                });
            }
            total_delay += delay;
            delay_before = delay;
        };

        match fallback {
            Some(fallback) => match fallback(&last) {
                Ok(value) => {
                    self.finish(started, attempts, total_delay, true, true);
                    info!(operation = %self.operation, attempts, error = %last, "retries exhausted, fallback succeeded");
                    Ok(RetryOutcome {
                        value,
                        attempts,
                        fallback_used: true,
                        elapsed: started.elapsed(),
                        total_delay,
                    })
                }
                Err(fallback_err) => {
                    self.finish(started, attempts, total_delay, false, true);
                    error!(operation = %self.operation, attempts, error = %fallback_err, "retries exhausted, fallback failed");
                    Err(RetryError::Exhausted {
                        last: fallback_err,
                        attempts,
                        fallback_used: true,
                    })
                }
            },
            None => {
                self.finish(started, attempts, total_delay, false, false);
                error!(operation = %self.operation, attempts, error = %last, "retries exhausted");
                Err(RetryError::Exhausted {
                    last,
                    attempts,
                    fallback_used: false,
                })
            }
        }
    }

    fn report_attempt(
        &self,
        index: u32,
        delay_before: Duration,
        elapsed: Duration,
        outcome: AttemptOutcome,
    ) {
        debug!(operation = %self.operation, attempt = index + 1, ?outcome, elapsed_us = elapsed.as_micros() as u64, "attempt finished");
        self.sink.record_attempt(
            &self.operation,
            &Attempt {
                index,
                delay_before,
                elapsed,
                outcome,
            },
        );
    }

    fn finish(
        &self,
        started: Instant,
        attempts: u32,
        total_delay: Duration,
        succeeded: bool,
        fallback_used: bool,
    ) {
        let summary = RetrySummary {
            attempts,
            total_latency: started.elapsed(),
            total_delay,
            succeeded,
            fallback_used,
        };
        self.sink.record_retry(&self.operation, &summary);
        if let Some(metrics) = &self.metrics {
            metrics.record(&summary);
        }
    }
}
