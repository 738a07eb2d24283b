//! Report formatting for human and JSON output.

use ledgerguard::resilience::{CircuitMetrics, RetryMetricsSnapshot};
use ledgerguard::scenarios::{
    BreakerReport, ContentionReport, DeadlockReport, LockContentionReport, RetryReport,
};
use serde::Serialize;
use std::fmt::Write;

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Result of one scenario run.
#[derive(Debug, Serialize)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum Report {
    Optimistic(ContentionReport),
    Pessimistic(LockContentionReport),
    Deadlock {
        ordered: bool,
        report: DeadlockReport,
    },
    Retry {
        report: RetryReport,
        metrics: RetryMetricsSnapshot,
    },
    Breaker {
        run: BreakerReport,
        recovery: Option<BreakerReport>,
    },
}

/// Render a report in the requested mode.
pub fn format_report(report: &Report, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        OutputMode::Human => format_human(report),
    }
}

/// Render an error in the requested mode.
pub fn format_error(message: &str, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::json!({ "error": message }).to_string(),
        OutputMode::Human => format!("(error) {}", message),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn format_human(report: &Report) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = match report {
        Report::Optimistic(r) => write_contention(&mut out, r),
        Report::Pessimistic(r) => write_lock_contention(&mut out, r),
        Report::Deadlock { ordered, report } => write_deadlock(&mut out, *ordered, report),
        Report::Retry { report, metrics } => write_retry(&mut out, report, metrics),
        Report::Breaker { run, recovery } => write_breaker(&mut out, run, recovery.as_ref()),
    };
    out.trim_end().to_string()
}

fn write_contention(out: &mut String, r: &ContentionReport) -> std::fmt::Result {
    writeln!(out, "optimistic contention: {} operations in {}ms", r.operations, r.duration_ms)?;
    writeln!(out, "  succeeded        {}", r.successes)?;
    writeln!(out, "  failed           {}", r.failures)?;
    writeln!(out, "  retries          {} ({:.2} per op)", r.retries, r.avg_retries)?;
    writeln!(out, "  conflicts        {} ({:.2} per op)", r.conflicts, r.conflict_rate)?;
    writeln!(out, "  balance          {} -> {} (expected {})", r.initial_balance, r.final_balance, r.expected_balance)?;
    writeln!(out, "  version          {} -> {}", r.initial_version, r.final_version)?;
    writeln!(out, "  balance correct  {}", yes_no(r.balance_correct))
}

fn write_lock_contention(out: &mut String, r: &LockContentionReport) -> std::fmt::Result {
    writeln!(out, "pessimistic contention: {} operations in {}ms", r.operations, r.duration_ms)?;
    writeln!(out, "  succeeded        {}", r.successes)?;
    writeln!(out, "  failed           {}", r.failures)?;
    writeln!(
        out,
        "  lock wait        total {}ms, avg {:.1}ms, max {}ms",
        r.total_lock_wait_ms, r.avg_lock_wait_ms, r.max_lock_wait_ms
    )?;
    writeln!(out, "  throughput       {:.1} ops/s", r.operations_per_second)?;
    writeln!(out, "  balance          {} -> {} (expected {})", r.initial_balance, r.final_balance, r.expected_balance)?;
    writeln!(out, "  balance correct  {}", yes_no(r.balance_correct))
}

fn write_deadlock(out: &mut String, ordered: bool, r: &DeadlockReport) -> std::fmt::Result {
    let order = if ordered { "ascending id" } else { "request" };
    writeln!(out, "bidirectional transfers ({} lock order): {} transfers in {}ms", order, r.transfers, r.duration_ms)?;
    writeln!(out, "  succeeded        {}", r.successes)?;
    writeln!(out, "  failed           {}", r.failures)?;
    writeln!(out, "  deadlocks        {}", r.deadlocks_detected)?;
    writeln!(out, "  retries          {}", r.retries)?;
    writeln!(out, "  total balance    {} -> {}", r.total_before, r.total_after)?;
    writeln!(out, "  conserved        {}", yes_no(r.balance_conserved))
}

fn write_retry(out: &mut String, r: &RetryReport, m: &RetryMetricsSnapshot) -> std::fmt::Result {
    writeln!(out, "retried transfer with {} injected failures", r.injected_failures)?;
    writeln!(out, "  succeeded        {}", yes_no(r.succeeded))?;
    writeln!(out, "  attempts         {}", r.attempts)?;
    writeln!(out, "  duration         {}ms", r.duration_ms)?;
    if let Some(e) = &r.error {
        writeln!(out, "  error            {}", e)?;
    }
    writeln!(
        out,
        "  metrics          {} attempts, {:.1}% success, {:.2} attempts/op",
        m.total_attempts, m.success_rate, m.average_attempts_per_operation
    )
}

fn rate(pct: Option<f64>) -> String {
    match pct {
        Some(pct) => format!("{:.1}%", pct),
        None => "n/a (below minimum calls)".to_string(),
    }
}

fn write_metrics(out: &mut String, m: &CircuitMetrics) -> std::fmt::Result {
    writeln!(out, "  state            {}", m.state)?;
    writeln!(
        out,
        "  window           {} calls: {} ok, {} failed, {} slow",
        m.buffered_calls, m.successful_calls, m.failed_calls, m.slow_calls
    )?;
    writeln!(out, "  failure rate     {}", rate(m.failure_rate))?;
    writeln!(out, "  slow call rate   {}", rate(m.slow_call_rate))?;
    writeln!(out, "  not permitted    {}", m.not_permitted_calls)?;
    writeln!(out, "  transitions      {}", m.state_transitions)
}

fn write_calls(out: &mut String, r: &BreakerReport) -> std::fmt::Result {
    for call in &r.calls {
        let outcome = if call.rejected {
            "rejected"
        } else if call.succeeded {
            "ok"
        } else {
            "failed"
        };
        writeln!(
            out,
            "  #{:<3} {}  {:<8} {} -> {}",
            call.index,
            if call.injected_failure { 'F' } else { 'S' },
            outcome,
            call.state_before,
            call.state_after
        )?;
    }
    Ok(())
}

fn write_breaker(out: &mut String, run: &BreakerReport, recovery: Option<&BreakerReport>) -> std::fmt::Result {
    writeln!(out, "circuit breaker '{}'", run.metrics.name)?;
    write_calls(out, run)?;
    if let Some(recovery) = recovery {
        writeln!(out, "after waiting out the open state:")?;
        write_calls(out, recovery)?;
    }
    write_metrics(out, recovery.map_or(&run.metrics, |r| &r.metrics))
}
