//! Clap command tree.

use clap::{value_parser, Arg, ArgAction, Command};

fn id_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_parser(value_parser!(u64))
        .default_value(default)
        .help(help)
}

fn amount_arg(default: &'static str) -> Arg {
    Arg::new("amount")
        .long("amount")
        .value_parser(value_parser!(i64).range(1..))
        .default_value(default)
        .help("Amount moved per operation, in minor units")
}

fn balance_arg() -> Arg {
    Arg::new("balance")
        .long("balance")
        .value_parser(value_parser!(i64))
        .default_value("100000")
        .help("Starting balance of every seeded record")
}

fn count_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_parser(value_parser!(u64).range(1..))
        .default_value(default)
        .help(help)
}

fn ms_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_parser(value_parser!(u64))
        .default_value(default)
        .help(help)
}

/// Build the `ledgerguard` command.
pub fn build_cli() -> Command {
    Command::new("ledgerguard")
        .about("Run concurrency and failure scenarios against an in-memory ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("FILE")
                .help("Load retry, circuit, lock and deadlock settings from a TOML file"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("Log to stderr (-v info, -vv debug)"),
        )
        .subcommand(
            Command::new("optimistic")
                .about("Concurrent compare-and-swap debits against one record")
                .arg(id_arg("id", "1", "Record to debit"))
                .arg(amount_arg("10"))
                .arg(balance_arg())
                .arg(count_arg("threads", "10", "Concurrent operations")),
        )
        .subcommand(
            Command::new("pessimistic")
                .about("Concurrent locked debits against one record")
                .arg(id_arg("id", "1", "Record to debit"))
                .arg(amount_arg("10"))
                .arg(balance_arg())
                .arg(count_arg("threads", "10", "Concurrent operations"))
                .arg(ms_arg("hold-ms", "10", "Time each operation holds the lock")),
        )
        .subcommand(
            Command::new("deadlock")
                .about("Opposite-direction transfers between two records")
                .arg(id_arg("from", "1", "First record"))
                .arg(id_arg("to", "2", "Second record"))
                .arg(amount_arg("10"))
                .arg(balance_arg())
                .arg(count_arg("rounds", "3", "Pairs of opposite transfers"))
                .arg(ms_arg("pause-ms", "10", "Pause between the two lock requests"))
                .arg(
                    Arg::new("ordered")
                        .long("ordered")
                        .action(ArgAction::SetTrue)
                        .help("Lock in ascending id order instead of request order"),
                ),
        )
        .subcommand(
            Command::new("retry")
                .about("Transfer against a store that fails the next N writes")
                .arg(id_arg("from", "1", "Debited record"))
                .arg(id_arg("to", "2", "Credited record"))
                .arg(amount_arg("10"))
                .arg(balance_arg())
                .arg(
                    Arg::new("failures")
                        .long("failures")
                        .value_parser(value_parser!(u32))
                        .default_value("2")
                        .help("Store writes to fail before the transfer can commit"),
                ),
        )
        .subcommand(
            Command::new("breaker")
                .about("Drive a circuit breaker with a failure pattern")
                .arg(id_arg("from", "1", "Debited record"))
                .arg(id_arg("to", "2", "Credited record"))
                .arg(amount_arg("1"))
                .arg(balance_arg())
                .arg(
                    Arg::new("pattern")
                        .long("pattern")
                        .default_value("FFFSS")
                        .help("Outcomes to inject in order: F fails, S succeeds"),
                )
                .arg(
                    Arg::new("recover")
                        .long("recover")
                        .action(ArgAction::SetTrue)
                        .help("Wait out the open state and send probe calls afterwards"),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let m = build_cli()
            .try_get_matches_from(["ledgerguard", "optimistic", "--threads", "4", "--json"])
            .unwrap();
        assert!(m.get_flag("json"));
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "optimistic");
        assert_eq!(sub.get_one::<u64>("threads"), Some(&4));
    }

    #[test]
    fn test_amount_must_be_positive() {
        let err = build_cli().try_get_matches_from(["ledgerguard", "retry", "--amount", "0"]);
        assert!(err.is_err());
    }
}
