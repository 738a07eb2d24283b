//! Count-based sliding window of call outcomes
//!
//! Holds the last `capacity` outcomes in arrival order. Failure and slow
//! counts are maintained incrementally, so rates are O(1).

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Classified result of one admitted call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Completed within the slow-call threshold
    Success,
    /// Returned an error
    Failure,
    /// Succeeded, but took longer than the slow-call threshold
    Slow,
}

impl Outcome {
    /// Classify a finished call; failure takes precedence over slowness
    pub fn classify(failed: bool, elapsed: Duration, slow_threshold: Duration) -> Self {
        if failed {
            Outcome::Failure
        } else if elapsed > slow_threshold {
            Outcome::Slow
        } else {
            Outcome::Success
        }
    }
}

/// Ring of the most recent outcomes
#[derive(Debug, Clone)]
pub struct CircuitWindow {
    capacity: usize,
    outcomes: VecDeque<Outcome>,
    failures: usize,
    slow: usize,
}

impl CircuitWindow {
    /// Create an empty window holding at most `capacity` outcomes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
            failures: 0,
            slow: 0,
        }
    }

    /// Append an outcome, evicting the oldest if full
    pub fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                self.adjust(evicted, false);
            }
        }
        self.outcomes.push_back(outcome);
        self.adjust(outcome, true);
    }

    fn adjust(&mut self, outcome: Outcome, added: bool) {
        let counter = match outcome {
            Outcome::Failure => &mut self.failures,
            Outcome::Slow => &mut self.slow,
            Outcome::Success => return,
        };
        if added {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    /// Drop every outcome
    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
        self.slow = 0;
    }

    /// Maximum number of outcomes held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Outcomes currently buffered
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if no outcome is buffered
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Buffered failures
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Buffered slow successes
    pub fn slow(&self) -> usize {
        self.slow
    }

    /// Buffered fast successes
    pub fn successes(&self) -> usize {
        self.outcomes.len() - self.failures - self.slow
    }

    /// Failure percentage over buffered outcomes; 0 when empty
    pub fn failure_rate(&self) -> f64 {
        self.percent(self.failures)
    }

    /// Slow-call percentage over buffered outcomes; 0 when empty
    pub fn slow_rate(&self) -> f64 {
        self.percent(self.slow)
    }

    fn percent(&self, count: usize) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            count as f64 * 100.0 / self.outcomes.len() as f64
        }
    }

    /// Buffered outcomes, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter()
    }
}
