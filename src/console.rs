//! Interactive commands read from stdin while the coordinator runs.

use crate::evolution::GeneticAlgorithm;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{value_parser, Arg, ColorChoice, Command};
use std::fmt;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  mutation -m <index> -r <rate>   set the rate of one mutation operator
  params                          show GA parameters
  stats                           show the last generation report
  stop | quit                     finish the current generation and stop
  help                            show this message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    UnknownCommand,
    UnknownOption,
    MissingArgument,
    MissingParameters,
    InvalidValue,
    InvalidMutationIndex,
    InvalidMutationRate,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
}

impl CommandError {
    fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        CommandError {
            kind,
            message: message.into(),
        }
    }

    /// Exit status a shell would see. Always non-zero.
    pub fn code(&self) -> i32 {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Stop,
    ShowParams,
    ShowStats,
    Help,
    SetMutationRate { args: Vec<String> },
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleCommand::Stop => write!(f, "stop"),
            ConsoleCommand::ShowParams => write!(f, "params"),
            ConsoleCommand::ShowStats => write!(f, "stats"),
            ConsoleCommand::Help => write!(f, "help"),
            ConsoleCommand::SetMutationRate { args } => write!(f, "mutation {}", args.join(" ")),
        }
    }
}

/// Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name {
        "stop" | "quit" | "exit" => ConsoleCommand::Stop,
        "params" => ConsoleCommand::ShowParams,
        "stats" => ConsoleCommand::ShowStats,
        "help" => ConsoleCommand::Help,
        "mutation" => ConsoleCommand::SetMutationRate {
            args: words.map(str::to_owned).collect(),
        },
        other => {
            return Err(CommandError::new(
                CommandErrorKind::UnknownCommand,
                format!("Unknown command `{other}'"),
            ))
        }
    };
    Ok(Some(command))
}

fn mutation_command() -> Command {
    Command::new("mutation")
        .no_binary_name(true)
        .disable_help_flag(true)
        .args_override_self(true)
        .color(ColorChoice::Never)
        .arg(
            Arg::new("index")
                .short('m')
                .value_name("INDEX")
                .help("Index in the mutation table")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64)),
        )
        .arg(
            Arg::new("rate")
                .short('r')
                .value_name("RATE")
                .help("New rate, between 0 and 1")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(f64)),
        )
}

fn offending_flag(error: &clap::Error) -> String {
    match error.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => arg
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned(),
        _ => String::new(),
    }
}

fn from_clap(error: clap::Error) -> CommandError {
    match error.kind() {
        ErrorKind::UnknownArgument => CommandError::new(
            CommandErrorKind::UnknownOption,
            format!("Unknown option `{}'", offending_flag(&error)),
        ),
        ErrorKind::InvalidValue => CommandError::new(
            CommandErrorKind::MissingArgument,
            format!("Option {} requires an argument", offending_flag(&error)),
        ),
        _ => {
            let rendered = error.render().to_string();
            let first_line = rendered.lines().next().unwrap_or_default();
            CommandError::new(
                CommandErrorKind::InvalidValue,
                first_line.trim_start_matches("error: ").to_owned(),
            )
        }
    }
}

/// Parses `-m <index> -r <rate>` and updates the engine's mutation table.
/// The table is left untouched on any error.
pub fn set_mutation_rate(engine: &mut GeneticAlgorithm, args: &[String]) -> Result<(), CommandError> {
    let matches = mutation_command()
        .try_get_matches_from(args)
        .map_err(from_clap)?;

    let count = engine.mutations().len();
    let check_index = |index: i64| match usize::try_from(index) {
        Ok(index) if index < count => Ok(index),
        _ => Err(CommandError::new(
            CommandErrorKind::InvalidMutationIndex,
            format!("Invalid mutation index {index}"),
        )),
    };
    let check_rate = |rate: f64| {
        if (0.0..=1.0).contains(&rate) {
            Ok(rate)
        } else {
            Err(CommandError::new(
                CommandErrorKind::InvalidMutationRate,
                format!("Invalid mutation rate {rate:.2}"),
            ))
        }
    };

    // Values are checked in the order their flags were given, before the
    // missing-parameter check.
    let index = matches.get_one::<i64>("index").copied();
    let rate = matches.get_one::<f64>("rate").copied();
    let index_first = match (matches.index_of("index"), matches.index_of("rate")) {
        (Some(i), Some(r)) => i < r,
        (Some(_), None) => true,
        _ => false,
    };
    let (index, rate) = if index_first {
        let index = index.map(check_index).transpose()?;
        (index, rate.map(check_rate).transpose()?)
    } else {
        let rate = rate.map(check_rate).transpose()?;
        (index.map(check_index).transpose()?, rate)
    };

    let (Some(index), Some(rate)) = (index, rate) else {
        return Err(CommandError::new(
            CommandErrorKind::MissingParameters,
            "Missing parameters",
        ));
    };

    engine
        .set_mutation_rate(index, rate)
        .map_err(|error| CommandError::new(CommandErrorKind::InvalidValue, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvolutionConfig;

    fn engine() -> GeneticAlgorithm {
        GeneticAlgorithm::new(EvolutionConfig {
            population_size: 4,
            global_seed: Some(1),
            ..Default::default()
        })
        .unwrap()
    }

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("stop").unwrap(), Some(ConsoleCommand::Stop));
        assert_eq!(parse_line("quit").unwrap(), Some(ConsoleCommand::Stop));
        assert_eq!(
            parse_line("mutation -m 1 -r 0.3").unwrap(),
            Some(ConsoleCommand::SetMutationRate {
                args: args("-m 1 -r 0.3")
            })
        );
        let error = parse_line("jump").unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::UnknownCommand);
        assert_ne!(error.code(), 0);
    }

    #[test]
    fn test_set_mutation_rate_updates_table() {
        let mut engine = engine();
        set_mutation_rate(&mut engine, &args("-m 2 -r 0.4")).unwrap();
        assert_eq!(engine.mutations()[2].rate, 0.4);

        // Later flags win.
        set_mutation_rate(&mut engine, &args("-m 0 -r 0.1 -r 0.2")).unwrap();
        assert_eq!(engine.mutations()[0].rate, 0.2);
    }

    // Test index equal to the table size is rejected and nothing changes.
    #[test]
    fn test_index_out_of_range_leaves_table_unchanged() {
        let mut engine = engine();
        let before = engine.mutations().to_vec();
        let count = before.len();

        let error = set_mutation_rate(&mut engine, &args(&format!("-m {count} -r 0.5"))).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationIndex);
        assert_eq!(error.message, format!("Invalid mutation index {count}"));
        assert_ne!(error.code(), 0);
        assert_eq!(engine.mutations(), &before[..]);

        let error = set_mutation_rate(&mut engine, &args("-m -1 -r 0.5")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationIndex);
        assert_eq!(engine.mutations(), &before[..]);
    }

    #[test]
    fn test_invalid_rate_and_missing_parameters() {
        let mut engine = engine();
        let before = engine.mutations().to_vec();

        let error = set_mutation_rate(&mut engine, &args("-m 0 -r 1.5")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationRate);
        assert_eq!(error.message, "Invalid mutation rate 1.50");

        let error = set_mutation_rate(&mut engine, &args("-m 0")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::MissingParameters);
        assert_eq!(error.message, "Missing parameters");

        let error = set_mutation_rate(&mut engine, &args("")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::MissingParameters);

        let error = set_mutation_rate(&mut engine, &args("-m 0 -x 3")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::UnknownOption);

        let error = set_mutation_rate(&mut engine, &args("-m 0 -r")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::MissingArgument);
        assert_eq!(error.message, "Option -r requires an argument");

        assert_eq!(engine.mutations(), &before[..]);
    }

    // Test a bad value is reported before the missing flag, in flag order.
    #[test]
    fn test_values_checked_in_flag_order() {
        let mut engine = engine();
        let before = engine.mutations().to_vec();

        let error = set_mutation_rate(&mut engine, &args("-m 9")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationIndex);
        assert_eq!(error.message, "Invalid mutation index 9");

        let error = set_mutation_rate(&mut engine, &args("-r 2")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationRate);

        let error = set_mutation_rate(&mut engine, &args("-r 2 -m 9")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationRate, "Rate came first");

        let error = set_mutation_rate(&mut engine, &args("-m 9 -r 2")).unwrap_err();
        assert_eq!(error.kind, CommandErrorKind::InvalidMutationIndex, "Index came first");

        assert_eq!(engine.mutations(), &before[..]);
    }
}
