//! # Quad Ground
//!
//! Terminal ground station for the WiFi quadrotor.
//!
//! Reads commands from stdin (type `help`), runs the connection session in
//! its own task and prints what the vehicle reports.
//!
//! ## Configuration
//!
//! The config file is taken from `QUAD_GROUND_CONFIG`, then
//! `config/default.toml` if present, otherwise built-in defaults are used.
//! `RUST_LOG` overrides `logging.level`.
//!
//! ```bash
//! QUAD_GROUND_CONFIG=flight.toml RUST_LOG=quad_ground=debug cargo run --release
//! ```

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use quad_ground::config::{Config, LoggingConfig};
use quad_ground::console::{Console, ConsoleAction, ConsoleDefaults};
use quad_ground::link::{ConnectionSession, SessionCommand, SessionEvent, SessionSettings, TcpConnector};
use quad_ground::protocol::packets::{DebugRecord, FastRecord, TelemetryRecord};
use quad_ground::telemetry::battery::BatteryStatus;
use quad_ground::telemetry::recorder::TelemetryRecorder;

/// Environment variable naming the config file
const CONFIG_ENV: &str = "QUAD_GROUND_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Depth of the command queue into the session task
const COMMAND_QUEUE_DEPTH: usize = 32;

const LOG_FILE_PREFIX: &str = "quad-ground.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let (config, source) = load_config()?;
    init_logging(&config.logging)?;

    info!("Quad Ground v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    let mut session = ConnectionSession::new(TcpConnector, SessionSettings::from_config(&config), event_tx);
    if let Some(recorder) = TelemetryRecorder::from_config(&config.telemetry)? {
        session = session.with_recorder(recorder);
    }
    let session_task = tokio::spawn(session.run(command_rx));

    let mut lines = spawn_stdin_reader();
    let mut console = Console::new(ConsoleDefaults::from_config(&config));
    let mut board = StatusBoard::default();

    println!("Type 'help' for commands, 'connect' to reach {}:{}", config.link.host, config.link.port);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Input closed, shutting down...");
                    break;
                };

                match console.handle_line(&line) {
                    Ok(ConsoleAction::Send(command)) => {
                        if command_tx.send(command).await.is_err() {
                            warn!("Session task has stopped");
                            break;
                        }
                    }
                    Ok(ConsoleAction::Print(text)) => println!("{}", text),
                    Ok(ConsoleAction::ShowStatus) => println!("{}", board.render()),
                    Ok(ConsoleAction::Quit) => break,
                    Ok(ConsoleAction::Nothing) => {}
                    Err(e) => println!("{}", e),
                }
            }

            Some(event) = event_rx.recv() => {
                if let Some(text) = board.apply(event) {
                    println!("{}", text);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    // The session zeroes the motors and closes the link on shutdown
    let _ = command_tx.send(SessionCommand::Shutdown).await;
    match session_task.await {
        Ok(Ok(())) => info!("Session closed"),
        Ok(Err(e)) => error!("Session ended with error: {}", e),
        Err(e) => error!("Session task failed: {}", e),
    }

    Ok(())
}

/// Load the configuration and describe where it came from
fn load_config() -> Result<(Config, String)> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let config = Config::load(&path).with_context(|| format!("Failed to load config from {}", path))?;
        return Ok((config, path));
    }

    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        let config = Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH))?;
        return Ok((config, DEFAULT_CONFIG_PATH.to_string()));
    }

    Ok((Config::default(), "built-in defaults".to_string()))
}

/// Console logging, plus a daily rolling file when `logging.log_dir` is set
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    if config.log_dir.is_empty() {
        registry.init();
    } else {
        let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        registry
            .with(fmt::layer().with_ansi(false).with_writer(appender))
            .init();
    }

    Ok(())
}

/// Read stdin lines on a plain thread
///
/// A blocking read cannot be cancelled, so it stays off the runtime and
/// never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Latest values seen from the session, for `status` and event messages
#[derive(Debug, Default)]
struct StatusBoard {
    connected: Option<String>,
    fast: Option<FastRecord>,
    debug: Option<DebugRecord>,
    battery: Option<BatteryStatus>,
    motors_enabled: bool,
}

impl StatusBoard {
    /// Fold in an event; returns a line to show the user, if any
    fn apply(&mut self, event: SessionEvent) -> Option<String> {
        match event {
            SessionEvent::Connected { peer } => {
                let text = format!("Connected to {}", peer);
                self.connected = Some(peer);
                Some(text)
            }
            SessionEvent::Disconnected => {
                self.clear_link_state();
                Some("Disconnected".to_string())
            }
            SessionEvent::ConnectionError(reason) => {
                self.clear_link_state();
                Some(format!("Connection error: {}", reason))
            }
            SessionEvent::Telemetry(TelemetryRecord::Fast(record)) => {
                self.fast = Some(record);
                None
            }
            SessionEvent::Telemetry(TelemetryRecord::Debug(record)) => {
                self.debug = Some(record);
                None
            }
            SessionEvent::Battery(status) => {
                self.battery = Some(status);
                None
            }
            SessionEvent::ResetBanner(report) => Some(report.to_string()),
            SessionEvent::SwitchChanged { state, volts } => {
                Some(format!("Power switch {} ({:.2} V)", state, volts))
            }
            SessionEvent::MotorsEnabled(enabled) => {
                self.motors_enabled = enabled;
                Some(format!("Motor control {}", if enabled { "enabled" } else { "disabled" }))
            }
            SessionEvent::EscReset { state, prompt, progress } => {
                if prompt.is_empty() {
                    Some(format!("ESC reset: {} ({}%)", state, progress))
                } else {
                    Some(format!("ESC reset: {} ({}%) {}", state, progress, prompt))
                }
            }
            SessionEvent::CommandRejected(reason) => Some(format!("Rejected: {}", reason)),
        }
    }

    fn clear_link_state(&mut self) {
        self.connected = None;
        self.fast = None;
        self.debug = None;
        self.battery = None;
        self.motors_enabled = false;
    }

    fn render(&self) -> String {
        let Some(peer) = &self.connected else {
            return "Not connected".to_string();
        };

        let mut lines = vec![format!(
            "Link: {}  motors {}",
            peer,
            if self.motors_enabled { "enabled" } else { "disabled" }
        )];

        match &self.fast {
            Some(fast) => lines.push(format!(
                "Attitude: roll {:+.1}°  pitch {:+.1}°  gyro {:+.1}/{:+.1} dps  loop {} us  motors {}",
                fast.roll_deg, fast.pitch_deg, fast.gyro_x_dps, fast.gyro_y_dps, fast.loop_us, fast.motors
            )),
            None => lines.push("Attitude: waiting for telemetry".to_string()),
        }

        if let Some(debug) = &self.debug {
            lines.push(format!(
                "Control: error {:+.2}/{:+.2}°  effort {:+.2}/{:+.2}",
                debug.roll_error_deg, debug.pitch_error_deg, debug.roll_effort, debug.pitch_effort
            ));
        }

        match &self.battery {
            Some(battery) => lines.push(format!(
                "Battery: {:.2} V ({:.2} V/cell) {}% {:?}",
                battery.volts, battery.per_cell, battery.percent, battery.level
            )),
            None => lines.push("Battery: --".to_string()),
        }

        lines.join("\n")
    }
}
