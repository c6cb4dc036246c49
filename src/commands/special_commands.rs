//! Command parser for the interactive control loop
//!
//! `airlink run` keeps the session open and reads one command per line:
//!
//! - `on` / `off`
//! - `mode <auto|low|medium|high>`
//! - `help`
//! - `quit` / `exit`
//!
//! Commands are case-insensitive; a leading `/` is accepted and ignored.

use thiserror::Error;

use crate::control::protocol::FanMode;
use crate::control::ControlOp;

/// Errors that can occur when parsing a control-loop line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType 'help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType 'help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// A parsed control-loop line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Send a control operation to the device
    Control(ControlOp),

    /// Display help information
    Help,

    /// Leave the loop
    Exit,

    /// Blank line
    None,
}

/// Parses one line typed into the control loop.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and bad mode arguments.
///
/// # Examples
///
/// ```
/// use airlink::commands::special_commands::{parse_special_command, SpecialCommand};
/// use airlink::control::{ControlOp, FanMode};
///
/// assert_eq!(
///     parse_special_command("mode high").unwrap(),
///     SpecialCommand::Control(ControlOp::SetMode(FanMode::High))
/// );
/// assert_eq!(parse_special_command("quit").unwrap(), SpecialCommand::Exit);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let lower = input.trim().to_lowercase();
    let lower = lower.strip_prefix('/').unwrap_or(&lower);

    let mut parts = lower.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(SpecialCommand::None);
    };
    let arg = parts.collect::<Vec<_>>().join(" ");

    match (command, arg.as_str()) {
        ("on", "") => Ok(SpecialCommand::Control(ControlOp::PowerOn)),
        ("off", "") => Ok(SpecialCommand::Control(ControlOp::PowerOff)),
        ("on" | "off", extra) => Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: extra.to_string(),
        }),

        ("mode", "") => Err(CommandError::MissingArgument {
            command: "mode".to_string(),
            usage: "mode <auto|low|medium|high>".to_string(),
        }),
        ("mode", arg) => arg
            .parse::<FanMode>()
            .map(|mode| SpecialCommand::Control(ControlOp::SetMode(mode)))
            .map_err(|_| CommandError::UnsupportedArgument {
                command: "mode".to_string(),
                arg: arg.to_string(),
            }),

        ("help" | "?", _) => Ok(SpecialCommand::Help),
        ("quit" | "exit", _) => Ok(SpecialCommand::Exit),

        _ => Err(CommandError::UnknownCommand(input.trim().to_string())),
    }
}

/// Prints the control-loop help text.
pub fn print_help() {
    println!(
        r#"
Commands:
  on                 Turn the purifier on
  off                Turn the purifier off
  mode <mode>        Set the fan mode (auto, low, medium, high)
  help               Show this help
  quit, exit         Disconnect and leave
"#
    );
}
