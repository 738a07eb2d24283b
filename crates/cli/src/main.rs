//! ledgerguard CLI: run concurrency and failure scenarios against a seeded
//! in-memory ledger and print what happened.
//!
//! ```text
//! ledgerguard optimistic --threads 20
//! ledgerguard deadlock --rounds 5 --json
//! ledgerguard breaker --pattern FFFSS --recover -v
//! ```

mod commands;
mod format;
mod parse;

use std::process;
use std::result::Result;
use std::thread;

use ledgerguard::prelude::*;
use ledgerguard::scenarios;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::build_cli;
use format::{format_error, format_report, OutputMode, Report};
use parse::{matches_to_scenario, Scenario};

fn main() {
    let matches = build_cli().get_matches();

    let mode = if matches.get_flag("json") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    init_logging(matches.get_count("verbose"));

    let result = load_config(&matches)
        .and_then(|config| matches_to_scenario(&matches).map(|scenario| (config, scenario)))
        .and_then(|(config, scenario)| run(config, scenario));

    match result {
        Ok(report) => println!("{}", format_report(&report, mode)),
        Err(e) => {
            eprintln!("{}", format_error(&e, mode));
            process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(matches: &clap::ArgMatches) -> Result<LedgerConfig, String> {
    match matches.get_one::<String>("config") {
        Some(path) => LedgerConfig::from_file(path).map_err(|e| e.to_string()),
        None => Ok(LedgerConfig::default()),
    }
}

fn run(config: LedgerConfig, scenario: Scenario) -> Result<Report, String> {
    let ledger = Ledger::builder()
        .config(config)
        .in_memory(scenario.seed())
        .map_err(|e| format!("Failed to create ledger: {}", e))?;
    info!(?scenario, "running scenario");

    let report = match scenario {
        Scenario::Optimistic {
            id,
            amount,
            threads,
            ..
        } => {
            let retry = ledger.config().retry.clone();
            scenarios::optimistic_contention(&ledger, RecordId::new(id), amount, threads, &retry)
                .map(Report::Optimistic)
        }
        Scenario::Pessimistic {
            id,
            amount,
            threads,
            hold,
            ..
        } => scenarios::pessimistic_contention(&ledger, RecordId::new(id), amount, threads, hold)
            .map(Report::Pessimistic),
        Scenario::Deadlock {
            from,
            to,
            amount,
            rounds,
            pause,
            ordered,
            ..
        } => {
            let (a, b) = (RecordId::new(from), RecordId::new(to));
            let report = if ordered {
                scenarios::ordered_bidirectional_transfers(&ledger, a, b, amount, rounds, pause)
            } else {
                scenarios::bidirectional_transfers(&ledger, a, b, amount, rounds, pause)
            };
            report.map(|report| Report::Deadlock { ordered, report })
        }
        Scenario::Retry {
            from,
            to,
            amount,
            failures,
            ..
        } => {
            let retry = ledger.config().retry.clone();
            scenarios::flaky_retries(&ledger, RecordId::new(from), RecordId::new(to), amount, failures, &retry)
                .map(|report| Report::Retry {
                    report,
                    metrics: ledger.retry_metrics(),
                })
        }
        Scenario::Breaker {
            from,
            to,
            amount,
            pattern,
            recover,
            ..
        } => run_breaker(&ledger, RecordId::new(from), RecordId::new(to), amount, &pattern, recover),
    };
    report.map_err(|e| e.to_string())
}

fn run_breaker(
    ledger: &Ledger,
    from: RecordId,
    to: RecordId,
    amount: i64,
    pattern: &[bool],
    recover: bool,
) -> ledgerguard::Result<Report> {
    const NAME: &str = "transfer";
    let run = scenarios::flaky_transfers(ledger, NAME, from, to, amount, pattern)?;

    let recovery = if recover && run.metrics.state == CircuitState::Open {
        let circuit = &ledger.config().circuit;
        info!(wait_ms = circuit.wait_duration_ms, "waiting for the breaker to half-open");
        thread::sleep(circuit.wait_duration());
        let probes = vec![false; circuit.permitted_probe_calls as usize];
        Some(scenarios::flaky_transfers(ledger, NAME, from, to, amount, &probes)?)
    } else {
        None
    };

    Ok(Report::Breaker { run, recovery })
}
