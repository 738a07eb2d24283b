//! ArgMatches → Scenario conversion.

use clap::ArgMatches;
use ledgerguard::scenarios::parse_pattern;
use std::time::Duration;

/// A scenario selected on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    Optimistic {
        id: u64,
        amount: i64,
        balance: i64,
        threads: usize,
    },
    Pessimistic {
        id: u64,
        amount: i64,
        balance: i64,
        threads: usize,
        hold: Duration,
    },
    Deadlock {
        from: u64,
        to: u64,
        amount: i64,
        balance: i64,
        rounds: usize,
        pause: Duration,
        ordered: bool,
    },
    Retry {
        from: u64,
        to: u64,
        amount: i64,
        balance: i64,
        failures: u32,
    },
    Breaker {
        from: u64,
        to: u64,
        amount: i64,
        balance: i64,
        pattern: Vec<bool>,
        recover: bool,
    },
}

fn get<T: Clone + Send + Sync + 'static>(m: &ArgMatches, name: &str) -> Result<T, String> {
    m.get_one::<T>(name)
        .cloned()
        .ok_or_else(|| format!("missing --{}", name))
}

fn count(m: &ArgMatches, name: &str) -> Result<usize, String> {
    let n: u64 = get(m, name)?;
    usize::try_from(n).map_err(|_| format!("--{} is too large", name))
}

fn millis(m: &ArgMatches, name: &str) -> Result<Duration, String> {
    Ok(Duration::from_millis(get(m, name)?))
}

fn distinct(from: u64, to: u64) -> Result<(u64, u64), String> {
    if from == to {
        return Err("--from and --to must name different records".to_string());
    }
    Ok((from, to))
}

/// Convert clap ArgMatches into a Scenario.
pub fn matches_to_scenario(matches: &ArgMatches) -> Result<Scenario, String> {
    let (name, m) = matches
        .subcommand()
        .ok_or_else(|| "No scenario provided".to_string())?;

    match name {
        "optimistic" => Ok(Scenario::Optimistic {
            id: get(m, "id")?,
            amount: get(m, "amount")?,
            balance: get(m, "balance")?,
            threads: count(m, "threads")?,
        }),
        "pessimistic" => Ok(Scenario::Pessimistic {
            id: get(m, "id")?,
            amount: get(m, "amount")?,
            balance: get(m, "balance")?,
            threads: count(m, "threads")?,
            hold: millis(m, "hold-ms")?,
        }),
        "deadlock" => {
            let (from, to) = distinct(get(m, "from")?, get(m, "to")?)?;
            Ok(Scenario::Deadlock {
                from,
                to,
                amount: get(m, "amount")?,
                balance: get(m, "balance")?,
                rounds: count(m, "rounds")?,
                pause: millis(m, "pause-ms")?,
                ordered: m.get_flag("ordered"),
            })
        }
        "retry" => {
            let (from, to) = distinct(get(m, "from")?, get(m, "to")?)?;
            Ok(Scenario::Retry {
                from,
                to,
                amount: get(m, "amount")?,
                balance: get(m, "balance")?,
                failures: get(m, "failures")?,
            })
        }
        "breaker" => {
            let (from, to) = distinct(get(m, "from")?, get(m, "to")?)?;
            let pattern: String = get(m, "pattern")?;
            Ok(Scenario::Breaker {
                from,
                to,
                amount: get(m, "amount")?,
                balance: get(m, "balance")?,
                pattern: parse_pattern(&pattern).map_err(|e| e.to_string())?,
                recover: m.get_flag("recover"),
            })
        }
        other => Err(format!("Unknown scenario: {}", other)),
    }
}

impl Scenario {
    /// Records to seed, with their starting balances.
    pub fn seed(&self) -> Vec<(u64, i64)> {
        match self {
            Scenario::Optimistic { id, balance, .. } | Scenario::Pessimistic { id, balance, .. } => {
                vec![(*id, *balance)]
            }
            Scenario::Deadlock { from, to, balance, .. }
            | Scenario::Retry { from, to, balance, .. }
            | Scenario::Breaker { from, to, balance, .. } => vec![(*from, *balance), (*to, *balance)],
        }
    }
}
