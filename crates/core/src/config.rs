//! Configuration for retry, circuit breaking, locking and deadlock handling
//!
//! All durations are expressed in milliseconds so the structs map one-to-one
//! onto TOML:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 100
//! multiplier = 2.0
//! max_delay_ms = 5000
//!
//! [circuit]
//! failure_rate_threshold = 50.0
//! minimum_calls = 5
//! wait_duration_ms = 10000
//!
//! [lock]
//! lock_timeout_ms = 5000
//!
//! [deadlock]
//! max_attempts = 4
//! base_backoff_ms = 50
//! ```
//!
//! Missing sections and fields fall back to their defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Randomization added on top of an exponential delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Deterministic delays
    #[default]
    None,
    /// Add a uniform random extra in `[0, factor * delay)`
    ///
    /// The extra is additive, so the jittered delay never drops below the
    /// deterministic one.
    Proportional(f64),
}

/// Configuration for retry behavior
///
/// `max_attempts` counts the first try: `max_attempts = 5` means one attempt
/// plus up to four retries.
///
/// # Example
/// ```
/// use ledgerguard_core::RetryConfig;
///
/// let config = RetryConfig::new()
///     .with_max_attempts(3)
///     .with_base_delay_ms(20)
///     .with_max_delay_ms(200);
/// assert_eq!(config.delay_for(0).as_millis(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Ceiling on any single delay
    pub max_delay_ms: u64,
    /// Randomization applied to each delay
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5000,
            jitter: Jitter::None,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set maximum delay between attempts
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set jitter mode
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay after the failed attempt with 0-based index `attempt`
    ///
    /// `min(base * multiplier^attempt, max)`. Jitter is applied by the retry
    /// layer on top of this value.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.base_delay_ms as f64 * exp;
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if let Jitter::Proportional(f) = self.jitter {
            if !(0.0..=1.0).contains(&f) {
                return Err(Error::Config(format!(
                    "retry.jitter factor must be within [0, 1], got {}",
                    f
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for a circuit breaker
///
/// Rates are percentages in `(0, 100]`. A breaker trips when, with at least
/// `minimum_calls` outcomes buffered, either rate reaches its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Failure percentage that opens the breaker
    pub failure_rate_threshold: f64,
    /// Slow-call percentage that opens the breaker
    pub slow_call_rate_threshold: f64,
    /// A successful call slower than this counts as slow
    pub slow_call_duration_ms: u64,
    /// Outcomes required before rates are evaluated
    pub minimum_calls: usize,
    /// Capacity of the outcome window
    pub sliding_window_size: usize,
    /// Time spent OPEN before a probe is admitted
    pub wait_duration_ms: u64,
    /// Probe calls admitted in HALF_OPEN
    pub permitted_probe_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration_ms: 2000,
            minimum_calls: 5,
            sliding_window_size: 10,
            wait_duration_ms: 10_000,
            permitted_probe_calls: 3,
        }
    }
}

impl CircuitConfig {
    /// Create a new CircuitConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure rate threshold (percent)
    pub fn with_failure_rate_threshold(mut self, pct: f64) -> Self {
        self.failure_rate_threshold = pct;
        self
    }

    /// Set slow call rate threshold (percent)
    pub fn with_slow_call_rate_threshold(mut self, pct: f64) -> Self {
        self.slow_call_rate_threshold = pct;
        self
    }

    /// Set slow call duration
    pub fn with_slow_call_duration_ms(mut self, ms: u64) -> Self {
        self.slow_call_duration_ms = ms;
        self
    }

    /// Set minimum calls before rates are evaluated
    pub fn with_minimum_calls(mut self, n: usize) -> Self {
        self.minimum_calls = n;
        self
    }

    /// Set sliding window capacity
    pub fn with_sliding_window_size(mut self, n: usize) -> Self {
        self.sliding_window_size = n;
        self
    }

    /// Set time spent OPEN before probing
    pub fn with_wait_duration_ms(mut self, ms: u64) -> Self {
        self.wait_duration_ms = ms;
        self
    }

    /// Set number of probes admitted in HALF_OPEN
    pub fn with_permitted_probe_calls(mut self, n: u32) -> Self {
        self.permitted_probe_calls = n;
        self
    }

    /// Slow call duration as a `Duration`
    pub fn slow_call_duration(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_ms)
    }

    /// Wait duration as a `Duration`
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_duration_ms)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        for (name, pct) in [
            ("failure_rate_threshold", self.failure_rate_threshold),
            ("slow_call_rate_threshold", self.slow_call_rate_threshold),
        ] {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(Error::Config(format!(
                    "circuit.{} must be within (0, 100], got {}",
                    name, pct
                )));
            }
        }
        if self.sliding_window_size == 0 || self.minimum_calls == 0 {
            return Err(Error::Config(
                "circuit.sliding_window_size and circuit.minimum_calls must be at least 1".into(),
            ));
        }
        if self.minimum_calls > self.sliding_window_size {
            return Err(Error::Config(format!(
                "circuit.minimum_calls ({}) exceeds circuit.sliding_window_size ({})",
                self.minimum_calls, self.sliding_window_size
            )));
        }
        if self.permitted_probe_calls == 0 {
            return Err(Error::Config(
                "circuit.permitted_probe_calls must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for pessimistic lock acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Bound on the wait for each individual lock
    pub lock_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
        }
    }
}

impl LockConfig {
    /// Lock timeout as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Set lock timeout
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }
}

/// Configuration for deadlock retries
///
/// Deadlock victims retry with jittered exponential backoff so the two
/// competing transactions stop colliding in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_backoff_ms: u64,
    /// Ceiling on any single delay
    pub max_backoff_ms: u64,
    /// Jitter factor in `[0, 1]`
    pub jitter_factor: f64,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 50,
            max_backoff_ms: 1000,
            jitter_factor: 1.0,
        }
    }
}

impl DeadlockConfig {
    /// Set maximum attempts
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set base backoff
    pub fn with_base_backoff_ms(mut self, ms: u64) -> Self {
        self.base_backoff_ms = ms;
        self
    }

    /// Retry configuration used by the deadlock coordinator
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_backoff_ms,
            multiplier: 2.0,
            max_delay_ms: self.max_backoff_ms.max(self.base_backoff_ms),
            jitter: Jitter::Proportional(self.jitter_factor),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Default retry policy for facade operations
    pub retry: RetryConfig,
    /// Default breaker configuration for new operation names
    pub circuit: CircuitConfig,
    /// Pessimistic lock tuning
    pub lock: LockConfig,
    /// Deadlock retry tuning
    pub deadlock: DeadlockConfig,
}

impl LedgerConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LedgerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check invariants of every section
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit.validate()?;
        self.deadlock.retry_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.max_delay_ms, 5000);
        assert_eq!(config.jitter, Jitter::None);
    }

    #[test]
    fn test_retry_config_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(1000);

        // Exponential backoff: 100, 200, 400, 800, 1000 (capped)
        assert_eq!(config.delay_for(0).as_millis(), 100);
        assert_eq!(config.delay_for(1).as_millis(), 200);
        assert_eq!(config.delay_for(2).as_millis(), 400);
        assert_eq!(config.delay_for(3).as_millis(), 800);
        assert_eq!(config.delay_for(4).as_millis(), 1000);
        assert_eq!(config.delay_for(60).as_millis(), 1000);
        assert_eq!(config.delay_for(u32::MAX).as_millis(), 1000);
    }

    #[test]
    fn test_retry_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::default().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::default().with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::default()
            .with_base_delay_ms(10)
            .with_max_delay_ms(5)
            .validate()
            .is_err());
        assert!(RetryConfig::default()
            .with_jitter(Jitter::Proportional(1.5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_circuit_config_validation() {
        assert!(CircuitConfig::default().validate().is_ok());
        assert!(CircuitConfig::default()
            .with_failure_rate_threshold(0.0)
            .validate()
            .is_err());
        assert!(CircuitConfig::default()
            .with_minimum_calls(20)
            .with_sliding_window_size(10)
            .validate()
            .is_err());
        assert!(CircuitConfig::default()
            .with_permitted_probe_calls(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_deadlock_retry_config() {
        let retry = DeadlockConfig::default().retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay_ms, 50);
        assert_eq!(retry.jitter, Jitter::Proportional(1.0));
        assert!(retry.validate().is_ok());
    }

    #[test]
    fn test_ledger_config_from_partial_toml() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [retry]
            max_attempts = 3
            jitter = { proportional = 0.5 }

            [circuit]
            minimum_calls = 4
            wait_duration_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.retry.jitter, Jitter::Proportional(0.5));
        assert_eq!(config.circuit.minimum_calls, 4);
        assert_eq!(config.circuit.wait_duration_ms, 250);
        assert_eq!(config.circuit.sliding_window_size, 10);
        assert_eq!(config.lock, LockConfig::default());
    }

    #[test]
    fn test_ledger_config_rejects_invalid_values() {
        let err = LedgerConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = LedgerConfig::from_toml_str("[retry]\nmax_attempts = \"many\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_ledger_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[lock]\nlock_timeout_ms = 750").unwrap();

        let config = LedgerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lock.lock_timeout(), Duration::from_millis(750));

        let missing = LedgerConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_delays_are_monotonic_and_capped(
            base in 1u64..1000,
            extra in 0u64..10_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..40,
        ) {
            let config = RetryConfig::new()
                .with_base_delay_ms(base)
                .with_max_delay_ms(base + extra)
                .with_multiplier(multiplier);
            let d0 = config.delay_for(attempt);
            let d1 = config.delay_for(attempt + 1);
            prop_assert!(d1 >= d0);
            prop_assert!(d1.as_millis() as u64 <= base + extra);
        }
    }
}
