//! Argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::logging::LogFormat;

/// Default configuration path
pub const DEFAULT_CONFIG: &str = "forkswap.toml";

/// Subcommand to run
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Execute named targets now
    Swap {
        /// Target ids, executed in this order
        targets: Vec<String>,
    },
    /// Run the loop until every target is marked or a signal arrives
    Daemon,
    /// Print per-target status
    Status {
        /// Emit JSON instead of a table
        json: bool,
    },
    /// Print planned thresholds in registry order
    Plan {
        /// Emit JSON instead of a table
        json: bool,
    },
    /// Delete completion markers
    Reset {
        /// Target ids; empty together with `all`
        targets: Vec<String>,
        /// Delete every marker
        all: bool,
    },
    /// Run the loop against a simulated chain
    Simulate {
        /// Random seed
        seed: u64,
        /// Probability that a start fails
        fail_rate: f64,
        /// Head slot at the first poll
        start_slot: u64,
    },
}

/// Fully parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Configuration file
    pub config: PathBuf,
    /// Log line format
    pub log_format: LogFormat,
    /// Subcommand
    pub action: Action,
}

/// Build the `forkswap` command
#[must_use]
pub fn command() -> Command {
    Command::new("forkswap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fork-schedule driven component swaps for multi-node testnets")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value(DEFAULT_CONFIG)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(LogFormat::NAMES)
                .help("Log line format on stderr"),
        )
        .subcommand(
            Command::new("swap")
                .about("Execute the named targets now, skipping completed ones")
                .arg(
                    Arg::new("targets")
                        .required(true)
                        .num_args(1..)
                        .help("Target ids, executed in the given order"),
                ),
        )
        .subcommand(Command::new("daemon").about("Swap every target when it becomes due"))
        .subcommand(
            Command::new("status")
                .about("Show completed, overdue and pending targets")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("plan")
                .about("Show planned activation thresholds")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("reset")
                .about("Delete completion markers so targets run again")
                .arg(
                    Arg::new("targets")
                        .num_args(1..)
                        .required_unless_present("all")
                        .conflicts_with("all")
                        .help("Target ids"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Delete every marker"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the loop against a simulated chain and a fault-injecting lifecycle")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("fail-rate")
                        .long("fail-rate")
                        .default_value("0")
                        .value_parser(parse_rate)
                        .help("Probability in [0, 1] that a start call fails"),
                )
                .arg(
                    Arg::new("start-slot")
                        .long("start-slot")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Head slot at the first poll"),
                ),
        )
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|_| format!("{raw:?} is not a number"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is outside [0, 1]"))
    }
}

impl Invocation {
    /// Parse from an argument iterator
    ///
    /// # Errors
    /// Returns the clap error for `--help`, `--version` and bad arguments.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Self::from_matches(&matches).map_err(|e| command().error(clap::error::ErrorKind::InvalidValue, format!("{e:#}")))
    }

    /// Extract an invocation from parsed matches
    ///
    /// # Errors
    /// Fails only if `matches` did not come from [`command`].
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let config = matches
            .get_one::<PathBuf>("config")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        let log_format = matches
            .get_one::<String>("log-format")
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()
            .map_err(anyhow::Error::msg)?
            .unwrap_or_default();

        let action = match matches.subcommand() {
            Some(("swap", args)) => Action::Swap {
                targets: strings(args, "targets"),
            },
            Some(("daemon", _)) => Action::Daemon,
            Some(("status", args)) => Action::Status {
                json: args.get_flag("json"),
            },
            Some(("plan", args)) => Action::Plan {
                json: args.get_flag("json"),
            },
            Some(("reset", args)) => Action::Reset {
                targets: strings(args, "targets"),
                all: args.get_flag("all"),
            },
            Some(("simulate", args)) => Action::Simulate {
                seed: *args.get_one::<u64>("seed").context("--seed")?,
                fail_rate: *args.get_one::<f64>("fail-rate").context("--fail-rate")?,
                start_slot: *args.get_one::<u64>("start-slot").context("--start-slot")?,
            },
            Some((other, _)) => anyhow::bail!("unknown subcommand {other}"),
            None => anyhow::bail!("a subcommand is required"),
        };

        Ok(Self {
            config,
            log_format,
            action,
        })
    }
}

fn strings(args: &ArgMatches, id: &str) -> Vec<String> {
    args.get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn rate_must_be_a_probability() {
        assert_eq!(parse_rate("0.25"), Ok(0.25));
        assert!(parse_rate("1.5").is_err());
        assert!(parse_rate("-0.1").is_err());
        assert!(parse_rate("often").is_err());
    }
}
