//! # Console Commands
//!
//! Turns lines typed at the terminal into [`SessionCommand`]s.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `connect [host] [port]` | Open the link (defaults from config) |
//! | `disconnect` | Stop the motors and close the link, after a y/n prompt |
//! | `enable` / `disable` | Arm or disarm manual motor control |
//! | `power FL FR BL BR` | Set all four powers (0-255) |
//! | `up [n]` / `down [n]` | Ramp every motor by `n` (default `motors.ramp_step`) |
//! | `stop` | Same as `disable` |
//! | `esc` | Start the ESC reset sequence |
//! | `cancel` | Cancel the ESC reset at the next step |
//! | `yes` / `no` | Answer the pending prompt |
//! | `banner` | Ask the vehicle for its reset reason |
//! | `status` | Show the latest telemetry |
//! | `help` | List commands |
//! | `quit` | Shut down |
//!
//! A `disconnect` is only sent after the user confirms it. While that
//! question is open, `yes`/`no` answer it instead of the ESC prompt.

use crate::config::Config;
use crate::error::{GroundError, Result};
use crate::link::SessionCommand;
use crate::motors::MotorPowers;

/// Help text printed for `help`
pub const HELP: &str = "\
Commands:
  connect [host] [port]   open the link
  disconnect              stop motors and close the link
  enable | disable        arm or disarm motor control
  power FL FR BL BR       set motor powers (0-255)
  up [n] | down [n]       ramp all motors
  stop                    disarm motor control
  esc                     start the ESC reset sequence
  cancel                  cancel the ESC reset
  yes | no                answer the current prompt
  banner                  request the reset banner
  status                  show latest telemetry
  quit                    exit";

const DISCONNECT_PROMPT: &str = "Stop the motors and disconnect? (yes/no)";

/// What the front end should do with a line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Send(SessionCommand),
    Print(String),
    ShowStatus,
    Quit,
    /// Blank line
    Nothing,
}

/// Values used when a command omits an argument
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleDefaults {
    pub host: String,
    pub port: u16,
    pub ramp_step: u8,
}

impl ConsoleDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.link.host.clone(),
            port: config.link.port,
            ramp_step: config.motors.ramp_step,
        }
    }
}

impl Default for ConsoleDefaults {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Stateful line parser
#[derive(Debug)]
pub struct Console {
    defaults: ConsoleDefaults,
    disconnect_pending: bool,
}

impl Console {
    pub fn new(defaults: ConsoleDefaults) -> Self {
        Self {
            defaults,
            disconnect_pending: false,
        }
    }

    /// A disconnect is waiting for `yes`/`no`
    pub fn disconnect_pending(&self) -> bool {
        self.disconnect_pending
    }

    /// Interpret one input line
    ///
    /// # Errors
    ///
    /// Returns `InvalidCommand` for unknown commands or bad arguments. A
    /// pending disconnect question is dropped in that case.
    pub fn handle_line(&mut self, line: &str) -> Result<ConsoleAction> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(ConsoleAction::Nothing);
        };
        let command = first.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        if self.disconnect_pending {
            self.disconnect_pending = false;
            return Ok(match command.as_str() {
                "y" | "yes" => ConsoleAction::Send(SessionCommand::Disconnect),
                _ => ConsoleAction::Print("Disconnect cancelled".to_string()),
            });
        }

        let action = match command.as_str() {
            "connect" => {
                expect_at_most(&command, &args, 2)?;
                let host = args.first().map_or_else(|| self.defaults.host.clone(), |h| h.to_string());
                let port = match args.get(1) {
                    Some(text) => parse_number::<u16>(text, "port")?,
                    None => self.defaults.port,
                };
                ConsoleAction::Send(SessionCommand::Connect { host, port })
            }
            "disconnect" => {
                expect_at_most(&command, &args, 0)?;
                self.disconnect_pending = true;
                ConsoleAction::Print(DISCONNECT_PROMPT.to_string())
            }
            "enable" => {
                expect_at_most(&command, &args, 0)?;
                ConsoleAction::Send(SessionCommand::SetMotorsEnabled(true))
            }
            "disable" | "stop" => {
                expect_at_most(&command, &args, 0)?;
                ConsoleAction::Send(SessionCommand::SetMotorsEnabled(false))
            }
            "power" => ConsoleAction::Send(SessionCommand::SetDesiredPowers(parse_powers(&args)?)),
            "up" | "down" => {
                expect_at_most(&command, &args, 1)?;
                let step: u8 = match args.first() {
                    Some(text) => parse_number(text, "step")?,
                    None => self.defaults.ramp_step,
                };
                let delta = if command == "up" { step as i32 } else { -(step as i32) };
                ConsoleAction::Send(SessionCommand::Ramp(delta))
            }
            "esc" => ConsoleAction::Send(SessionCommand::StartEscReset),
            "cancel" => ConsoleAction::Send(SessionCommand::CancelEscReset),
            "y" | "yes" => ConsoleAction::Send(SessionCommand::Confirm(true)),
            "n" | "no" => ConsoleAction::Send(SessionCommand::Confirm(false)),
            "banner" => ConsoleAction::Send(SessionCommand::RequestBanner),
            "status" => ConsoleAction::ShowStatus,
            "help" | "?" => ConsoleAction::Print(HELP.to_string()),
            "quit" | "exit" => ConsoleAction::Quit,
            _ => {
                return Err(GroundError::InvalidCommand(format!(
                    "unknown command '{}', type 'help' for a list",
                    first
                )))
            }
        };

        Ok(action)
    }
}

fn expect_at_most(command: &str, args: &[&str], max: usize) -> Result<()> {
    if args.len() > max {
        return Err(GroundError::InvalidCommand(format!(
            "'{}' takes at most {} argument(s)",
            command, max
        )));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.parse()
        .map_err(|_| GroundError::InvalidCommand(format!("invalid {} '{}'", what, text)))
}

fn parse_powers(args: &[&str]) -> Result<MotorPowers> {
    if args.len() != 4 {
        return Err(GroundError::InvalidCommand(
            "'power' needs four values: FL FR BL BR".to_string(),
        ));
    }

    let mut levels = [0u8; 4];
    for (level, text) in levels.iter_mut().zip(args) {
        *level = parse_number(text, "power")?;
    }
    Ok(MotorPowers::from_array(levels))
}
