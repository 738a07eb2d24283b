//! The ledger facade
//!
//! [`Ledger`] ties one store to the controllers and resilience decorators
//! and exposes the operations callers use. Create one with
//! [`Ledger::builder`].
//!
//! # Composition
//!
//! | Operation | Breaker | Retry | Controller |
//! |-----------|---------|-------|------------|
//! | `optimistic_update` | | per-call config | OptimisticController |
//! | `pessimistic_transfer` | | per-call config | PessimisticController |
//! | `transfer_with_deadlock_handling` | | deadlock config, deadlocks only | DeadlockCoordinator |
//! | `guarded_call` | named breaker | per-call config | caller's closure |
//!
//! In `guarded_call` the breaker decides before the retry loop starts, so an
//! OPEN breaker prevents every attempt and every backoff sleep. The whole
//! retried call is recorded as one breaker outcome.

use ledgerguard_concurrency::{
    DeadlockCoordinator, DeadlockStats, OptimisticController, PessimisticController,
    TransferReceipt, UpdatedRecord,
};
use ledgerguard_core::{
    CircuitConfig, CircuitState, DeadlockConfig, Error, LedgerConfig, LockConfig, MetricsSink,
    NoopSink, RecordId, Result, RetryConfig, VersionedRecord, VersionedStore,
};
use ledgerguard_resilience::{
    CircuitBreaker, CircuitMetrics, CircuitRegistry, RetryMetrics, RetryMetricsSnapshot,
    RetryOutcome, RetryPolicy,
};
use ledgerguard_storage::InMemoryStore;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Result of a retried optimistic update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// The write that finally succeeded
    pub record: UpdatedRecord,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Total latency including backoff sleeps
    pub elapsed: Duration,
}

impl UpdateReport {
    /// Version conflicts lost before the successful attempt
    pub fn conflicts(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Result of a retried pessimistic transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// The committed transfer
    pub receipt: TransferReceipt,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Total latency including backoff sleeps
    pub elapsed: Duration,
}

enum Circuits {
    Owned(CircuitRegistry),
    Global,
}

impl Circuits {
    fn registry(&self) -> &CircuitRegistry {
        match self {
            Circuits::Owned(registry) => registry,
            Circuits::Global => CircuitRegistry::global(),
        }
    }
}

/// Concurrency control and resilience over one versioned store
pub struct Ledger<S = InMemoryStore> {
    store: Arc<S>,
    config: LedgerConfig,
    optimistic: OptimisticController<S>,
    pessimistic: PessimisticController<S>,
    deadlock: DeadlockCoordinator<S>,
    circuits: Circuits,
    retry_metrics: Arc<RetryMetrics>,
    sink: Arc<dyn MetricsSink>,
}

impl<S> fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("global_circuits", &matches!(self.circuits, Circuits::Global))
            .finish()
    }
}

impl Ledger<InMemoryStore> {
    /// Create a builder with default configuration
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::new()
    }

    /// In-memory ledger seeded with `(id, balance)` pairs and default configuration
    pub fn in_memory(records: impl IntoIterator<Item = (u64, i64)>) -> Result<Self> {
        LedgerBuilder::new().in_memory(records)
    }
}

impl<S: VersionedStore> Ledger<S> {
    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Committed state of a record
    pub fn record(&self, id: RecordId) -> Result<VersionedRecord> {
        self.store.get(id)
    }

    /// Optimistic controller (single attempts, no retry)
    pub fn optimistic(&self) -> &OptimisticController<S> {
        &self.optimistic
    }

    /// Pessimistic controller (single attempts, no retry)
    pub fn pessimistic(&self) -> &PessimisticController<S> {
        &self.pessimistic
    }

    /// Deadlock coordinator
    pub fn deadlock_coordinator(&self) -> &DeadlockCoordinator<S> {
        &self.deadlock
    }

    /// Retry policy for `operation` reporting to this ledger's sink and counters
    pub fn retry_policy(&self, operation: &str, retry: &RetryConfig) -> RetryPolicy {
        RetryPolicy::new(retry.clone())
            .named(operation)
            .with_sink(Arc::clone(&self.sink))
            .with_metrics(Arc::clone(&self.retry_metrics))
    }

    /// Read, apply `mutate` and compare-and-swap, retrying version conflicts
    ///
    /// `mutate` may run once per attempt.
    ///
    /// # Errors
    ///
    /// - `AttemptsExhausted` (source `VersionConflict`) once `retry` runs out
    /// - fatal errors from `mutate` or the store, unretried
    pub fn optimistic_update<F>(
        &self,
        id: RecordId,
        mutate: F,
        retry: &RetryConfig,
    ) -> Result<UpdateReport>
    where
        F: Fn(i64) -> Result<i64>,
    {
        let outcome = self
            .retry_policy("optimistic_update", retry)
            .execute(|| self.optimistic.update(id, &mutate), Error::classification)?;
        Ok(UpdateReport {
            record: outcome.value,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
        })
    }

    /// Move `amount` between records under ascending-order locks, retrying
    /// lock timeouts
    ///
    /// # Errors
    ///
    /// - `Validation` for a self-transfer, non-positive amount or overdraft
    /// - `AttemptsExhausted` (source `LockTimeout`) once `retry` runs out
    pub fn pessimistic_transfer(
        &self,
        from: RecordId,
        to: RecordId,
        amount: i64,
        retry: &RetryConfig,
    ) -> Result<TransferReport> {
        let outcome: RetryOutcome<TransferReceipt> = self
            .retry_policy("pessimistic_transfer", retry)
            .execute(
                || self.pessimistic.transfer(from, to, amount),
                Error::classification,
            )?;
        Ok(TransferReport {
            receipt: outcome.value,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
        })
    }

    /// Move `amount` locking `from` first, retrying deadlock victims with
    /// jittered backoff
    pub fn transfer_with_deadlock_handling(
        &self,
        from: RecordId,
        to: RecordId,
        amount: i64,
    ) -> Result<TransferReceipt> {
        self.deadlock.transfer(from, to, amount)
    }

    /// Run `f` behind the breaker named `name`, retrying under `retry`
    ///
    /// # Errors
    ///
    /// - `CircuitOpen` if the breaker rejects the call; `f` never runs
    /// - `AttemptsExhausted` once `retry` runs out
    /// - fatal errors from `f`, unretried
    ///
    /// # Panics
    ///
    /// A panic in `f` is recorded as a breaker failure and then resumed.
    pub fn guarded_call<T, F>(&self, name: &str, f: F, retry: &RetryConfig) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let breaker = self.breaker(name);
        let policy = self.retry_policy(name, retry);
        let permit = breaker.try_acquire()?;
        let result = breaker.guard_panic(permit, || policy.execute(f, Error::classification));
        breaker.record(permit, result.is_err());
        result.map(RetryOutcome::into_value).map_err(Error::from)
    }

    /// Breaker for `name`, created with this ledger's circuit config on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuits
            .registry()
            .breaker_with(name, || self.config.circuit.clone())
    }

    /// State, rates and counters of the breaker named `name`
    pub fn circuit_metrics(&self, name: &str) -> CircuitMetrics {
        self.breaker(name).metrics()
    }

    /// Metrics of every breaker this ledger can see
    pub fn all_circuit_metrics(&self) -> Vec<CircuitMetrics> {
        self.circuits.registry().all_metrics()
    }

    /// Move the breaker named `name` to `state`
    pub fn force_circuit_state(&self, name: &str, state: CircuitState) {
        info!(operation = name, %state, "forcing circuit state");
        self.breaker(name).force_state(state);
    }

    /// Return the breaker named `name` to CLOSED with cleared counters
    pub fn reset_circuit(&self, name: &str) {
        self.breaker(name).reset();
    }

    /// Aggregate retry counters across every facade operation
    pub fn retry_metrics(&self) -> RetryMetricsSnapshot {
        self.retry_metrics.snapshot()
    }

    /// Zero the retry counters
    pub fn reset_retry_metrics(&self) {
        self.retry_metrics.reset();
    }

    /// Deadlock coordinator counters
    pub fn deadlock_stats(&self) -> DeadlockStats {
        self.deadlock.stats()
    }
}

/// Builder for [`Ledger`]
///
/// # Example
///
/// ```
/// use ledgerguard::prelude::*;
///
/// let ledger = Ledger::builder()
///     .retry(RetryConfig::new().with_base_delay_ms(10))
///     .in_memory([(1, 1000), (2, 0)])?;
/// let report = ledger.pessimistic_transfer(
///     RecordId::new(1),
///     RecordId::new(2),
///     250,
///     &ledger.config().retry,
/// )?;
/// assert_eq!(report.receipt.to_balance, 250);
/// # Ok::<(), ledgerguard::Error>(())
/// ```
pub struct LedgerBuilder {
    config: LedgerConfig,
    sink: Arc<dyn MetricsSink>,
    global_circuits: bool,
}

impl fmt::Debug for LedgerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerBuilder")
            .field("config", &self.config)
            .field("global_circuits", &self.global_circuits)
            .finish()
    }
}

impl LedgerBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            config: LedgerConfig::default(),
            sink: Arc::new(NoopSink),
            global_circuits: false,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a TOML file
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = LedgerConfig::from_file(path)?;
        Ok(self)
    }

    /// Default retry policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Configuration for breakers created by this ledger
    pub fn circuit(mut self, circuit: CircuitConfig) -> Self {
        self.config.circuit = circuit;
        self
    }

    /// Lock timeout
    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.config.lock = lock;
        self
    }

    /// Deadlock retry tuning
    pub fn deadlock(mut self, deadlock: DeadlockConfig) -> Self {
        self.config.deadlock = deadlock;
        self
    }

    /// Report attempts, breaker calls and transitions to `sink`
    pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share breakers with every other ledger in the process
    ///
    /// By default each ledger owns its breakers. With the global registry
    /// the first ledger to use an operation name fixes that breaker's
    /// configuration, and breaker events are not sent to this ledger's sink.
    pub fn global_circuits(mut self) -> Self {
        self.global_circuits = true;
        self
    }

    /// Build a ledger over `store`
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid.
    pub fn build<S: VersionedStore>(self, store: Arc<S>) -> Result<Ledger<S>> {
        self.config.validate()?;
        let config = self.config;

        let circuits = if self.global_circuits {
            Circuits::Global
        } else {
            Circuits::Owned(
                CircuitRegistry::new(config.circuit.clone()).with_sink(Arc::clone(&self.sink)),
            )
        };

        Ok(Ledger {
            optimistic: OptimisticController::new(Arc::clone(&store)),
            pessimistic: PessimisticController::new(Arc::clone(&store), &config.lock),
            deadlock: DeadlockCoordinator::new(Arc::clone(&store), &config.lock, &config.deadlock)
                .with_sink(Arc::clone(&self.sink)),
            store,
            config,
            circuits,
            retry_metrics: Arc::new(RetryMetrics::new()),
            sink: self.sink,
        })
    }

    /// Build a ledger over a fresh in-memory store seeded with `(id, balance)` pairs
    pub fn in_memory(self, records: impl IntoIterator<Item = (u64, i64)>) -> Result<Ledger> {
        let store = InMemoryStore::with_lock_config(&self.config.lock);
        for (id, balance) in records {
            store.insert(RecordId::new(id), balance)?;
        }
        self.build(Arc::new(store))
    }
}

impl Default for LedgerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
