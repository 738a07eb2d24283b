//! Circuit Breaker Tests
//!
//! CLOSED / OPEN / HALF_OPEN transitions driven by recorded outcomes.

use crate::common::*;

fn feed(breaker: &CircuitBreaker, pattern: &str) {
    for c in pattern.chars() {
        if let Ok(permit) = breaker.try_acquire() {
            breaker.record(permit, c == 'F');
        }
    }
}

#[test]
fn majority_failures_open_the_breaker() {
    let breaker = CircuitBreaker::new("fffss", small_window());
    feed(&breaker, "FFFSS");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.metrics().failure_rate, Some(60.0));
}

#[test]
fn minority_failures_keep_it_closed() {
    let breaker = CircuitBreaker::new("fsfss", small_window());
    feed(&breaker, "FSFSS");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_rate, Some(40.0));
}

#[test]
fn open_breaker_rejects_until_wait_elapses() {
    let breaker = CircuitBreaker::new("wait", small_window().with_wait_duration_ms(50));
    feed(&breaker, "FFFFF");
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = breaker.try_acquire().unwrap_err();
    assert!(err.is_circuit_open());

    thread::sleep(Duration::from_millis(80));
    assert!(breaker.try_acquire().is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[test]
fn successful_probes_close_with_cleared_window() {
    let breaker = CircuitBreaker::new(
        "probes",
        small_window()
            .with_wait_duration_ms(20)
            .with_permitted_probe_calls(3),
    );
    feed(&breaker, "FFFFF");
    thread::sleep(Duration::from_millis(40));

    feed(&breaker, "SS");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    feed(&breaker, "S");
    assert_eq!(breaker.state(), CircuitState::Closed);

    let metrics = breaker.metrics();
    assert_eq!(metrics.buffered_calls, 0);
    assert_eq!(metrics.failure_rate, None);
}

#[test]
fn failed_probe_reopens() {
    let breaker = CircuitBreaker::new("reopen", small_window().with_wait_duration_ms(20));
    feed(&breaker, "FFFFF");
    thread::sleep(Duration::from_millis(40));

    feed(&breaker, "SF");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.try_acquire().unwrap_err().is_circuit_open());
}

#[test]
fn flaky_transfer_scenario_walks_every_state() {
    let ledger = Ledger::builder()
        .circuit(small_window().with_wait_duration_ms(30).with_permitted_probe_calls(2))
        .in_memory([(1, 1_000), (2, 0)])
        .unwrap();
    let pattern = ledgerguard::scenarios::parse_pattern("FFFFF").unwrap();

    let report =
        ledgerguard::scenarios::flaky_transfers(&ledger, "transfer", rid(1), rid(2), 5, &pattern).unwrap();
    assert_eq!(report.metrics.state, CircuitState::Open);

    thread::sleep(Duration::from_millis(50));
    let recovery = ledgerguard::scenarios::flaky_transfers(
        &ledger,
        "transfer",
        rid(1),
        rid(2),
        5,
        &[false, false],
    )
    .unwrap();

    assert_eq!(
        recovery.states(),
        vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
    );
    assert_eq!(ledger.record(rid(2)).unwrap().balance, 10);
}

#[test]
fn metrics_serialize_for_reporting() {
    let ledger = ledger([(1, 0)]);
    ledger.force_circuit_state("report", CircuitState::HalfOpen);

    let json = serde_json::to_value(ledger.circuit_metrics("report")).unwrap();
    assert_eq!(json["name"], "report");
    assert_eq!(json["state"], "HALF_OPEN");
    assert_eq!(json["state_transitions"], 1);
}
