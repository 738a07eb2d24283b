//! Breakers keyed by operation name
//!
//! A [`CircuitRegistry`] creates a breaker the first time an operation name
//! is used and hands out the same `Arc` afterwards. Breaker state is shared
//! by every caller of the same operation in the registry's scope.
//! [`CircuitRegistry::global`] is the process-wide instance; a ledger can
//! also own a private registry so independent ledgers (and tests) do not
//! share breaker state.

use crate::circuit::{CircuitBreaker, CircuitMetrics};
use dashmap::DashMap;
use ledgerguard_core::{CircuitConfig, MetricsSink, NoopSink};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

static GLOBAL: Lazy<CircuitRegistry> = Lazy::new(CircuitRegistry::default);

/// Map of operation name to breaker
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitConfig,
    sink: Arc<dyn MetricsSink>,
}

impl fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("breakers", &self.breakers.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl CircuitRegistry {
    /// Create an empty registry; new breakers use `defaults`
    pub fn new(defaults: CircuitConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            sink: Arc::new(NoopSink),
        }
    }

    /// Attach `sink` to every breaker created from now on
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Process-wide registry with default configuration
    pub fn global() -> &'static CircuitRegistry {
        &GLOBAL
    }

    /// Breaker for `name`, created with the registry defaults on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breaker_with(name, || self.defaults.clone())
    }

    /// Breaker for `name`, created with `config()` on first use
    ///
    /// If the breaker already exists its configuration is left unchanged.
    pub fn breaker_with<F>(&self, name: &str, config: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> CircuitConfig,
    {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, config()).with_sink(Arc::clone(&self.sink)))
        });
        Arc::clone(entry.value())
    }

    /// Existing breaker for `name`, without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Drop the breaker for `name`; the next use starts fresh
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    /// Names of all registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Metrics for every registered breaker, sorted by name
    pub fn all_metrics(&self) -> Vec<CircuitMetrics> {
        let mut metrics: Vec<CircuitMetrics> =
            self.breakers.iter().map(|e| e.value().metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Default configuration for new breakers
    pub fn defaults(&self) -> &CircuitConfig {
        &self.defaults
    }
}
