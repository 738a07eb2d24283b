//! Configuration Tests
//!
//! TOML loading into the ledger builder.

use crate::common::*;
use std::io::Write;

#[test]
fn builder_loads_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[retry]
max_attempts = 7
base_delay_ms = 15

[circuit]
minimum_calls = 4
sliding_window_size = 8

[lock]
lock_timeout_ms = 250

[deadlock]
max_attempts = 6
"#
    )
    .unwrap();

    let ledger = Ledger::builder()
        .config_file(file.path())
        .unwrap()
        .in_memory([(1, 0)])
        .unwrap();

    let config = ledger.config();
    assert_eq!(config.retry.max_attempts, 7);
    assert_eq!(config.retry.base_delay_ms, 15);
    assert_eq!(config.retry.multiplier, 2.0);
    assert_eq!(config.circuit.minimum_calls, 4);
    assert_eq!(config.lock.lock_timeout_ms, 250);
    assert_eq!(config.deadlock.max_attempts, 6);
    assert_eq!(ledger.pessimistic().lock_timeout(), Duration::from_millis(250));
    assert_eq!(ledger.breaker("any").config().minimum_calls, 4);
}

#[test]
fn invalid_file_is_a_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[circuit]\nminimum_calls = 20\nsliding_window_size = 10\n").unwrap();

    let err = Ledger::builder().config_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Ledger::builder()
        .config_file(dir.path().join("absent.toml"))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
