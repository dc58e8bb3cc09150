//! # ESC Reset Sequencer
//!
//! Drives the ESC calibration procedure:
//!
//! ```text
//! Idle ─start(switch OFF)─▶ AwaitingSwitchOff ─confirm(yes, still OFF)─▶ AwaitingSwitchOn
//!   AwaitingSwitchOn ─switch ON─▶ HoldFullPower (N × step) ─▶ HoldZeroPower (N × step)
//!   HoldZeroPower ─▶ LowPowerCheck ─confirm(yes)─▶ Completed
//!                                  ─confirm(no)──▶ Failed(MotorsNotSpinning)
//! ```
//!
//! Any active state can end in `Cancelled` (cancel flag, honoured at step
//! boundaries) or `Failed` (prompt timeout, or an external [`abort`]).
//! Completed, Failed and Cancelled are terminal; `start` begins again from Idle.
//!
//! The sequencer never blocks. The owner calls [`tick`] periodically and the
//! machine compares the supplied instant against its own step and prompt
//! deadlines, so holds never stall the event loop and tests can drive time
//! by hand.
//!
//! ## Power invariant
//!
//! After every call that changes or ticks the machine, all four motors are
//! at the level of the current state: full power only in `HoldFullPower`,
//! spin-check power only in `LowPowerCheck`, zero everywhere else. An
//! aborted or cancelled sequence therefore always leaves the motors stopped.
//!
//! [`abort`]: EscResetSequencer::abort
//! [`tick`]: EscResetSequencer::tick

use serde::Serialize;
use std::fmt;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use super::switch_monitor::SwitchState;
use crate::error::{GroundError, Result};
use crate::motors::MotorPowers;

/// Power applied while the ESCs learn the top of their range
pub const DEFAULT_FULL_POWER: u8 = 180;

/// Power applied for the final "are all rotors spinning" check
pub const DEFAULT_SPIN_CHECK_POWER: u8 = 5;

/// Length of one hold step (one ESC beep interval)
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(700);

/// Steps held at full power and again at zero power
pub const DEFAULT_HOLD_STEPS: u32 = 9;

/// Longest wait for the switch or for a user answer
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Power levels and timing for one ESC reset run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscResetProfile {
    pub full_power: u8,
    pub spin_check_power: u8,
    pub step_interval: Duration,
    pub full_power_steps: u32,
    pub zero_power_steps: u32,
    pub prompt_timeout: Duration,
}

impl Default for EscResetProfile {
    fn default() -> Self {
        Self {
            full_power: DEFAULT_FULL_POWER,
            spin_check_power: DEFAULT_SPIN_CHECK_POWER,
            step_interval: DEFAULT_STEP_INTERVAL,
            full_power_steps: DEFAULT_HOLD_STEPS,
            zero_power_steps: DEFAULT_HOLD_STEPS,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }
}

/// Why a reset run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EscResetFailure {
    /// Switch never turned on within the prompt timeout
    SwitchTimeout,
    /// User never answered a prompt within the prompt timeout
    ConfirmationTimeout,
    /// User reported that not every rotor spun during the check
    MotorsNotSpinning,
    /// Arm switch turned off while the sequence was running
    SwitchTurnedOff,
    /// Link to the vehicle closed while the sequence was running
    ConnectionLost,
}

impl EscResetFailure {
    /// User-facing diagnostic
    pub const fn diagnostic(self) -> &'static str {
        match self {
            EscResetFailure::SwitchTimeout => "Timed out waiting for the switch to turn ON.",
            EscResetFailure::ConfirmationTimeout => "Timed out waiting for a response.",
            EscResetFailure::MotorsNotSpinning => {
                "Some motors did not spin. Check ESC signal and ground wiring, \
                 re-run the calibration per the ESC vendor procedure, \
                 and inspect for mechanical obstruction."
            }
            EscResetFailure::SwitchTurnedOff => "The switch turned OFF during the ESC reset.",
            EscResetFailure::ConnectionLost => "Connection to the vehicle was lost during the ESC reset.",
        }
    }

    pub const fn is_timeout(self) -> bool {
        matches!(
            self,
            EscResetFailure::SwitchTimeout | EscResetFailure::ConfirmationTimeout
        )
    }
}

impl From<EscResetFailure> for GroundError {
    fn from(failure: EscResetFailure) -> Self {
        if failure.is_timeout() {
            GroundError::SequenceTimeout(failure.diagnostic().to_string())
        } else {
            GroundError::SequenceFailed(failure.diagnostic().to_string())
        }
    }
}

/// Sequencer states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EscResetState {
    Idle,
    AwaitingSwitchOff,
    AwaitingSwitchOn,
    HoldFullPower,
    HoldZeroPower,
    LowPowerCheck,
    Completed,
    Failed(EscResetFailure),
    Cancelled,
}

impl EscResetState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            EscResetState::Completed | EscResetState::Failed(_) | EscResetState::Cancelled
        )
    }

    /// A run is in progress and owns the motor powers
    pub const fn is_active(self) -> bool {
        !matches!(self, EscResetState::Idle) && !self.is_terminal()
    }

    /// The state waits for a yes/no answer from the user
    pub const fn awaits_confirmation(self) -> bool {
        matches!(
            self,
            EscResetState::AwaitingSwitchOff | EscResetState::LowPowerCheck
        )
    }

    /// Text shown to the user while in this state
    pub const fn prompt(self) -> &'static str {
        match self {
            EscResetState::Idle => "ESC reset idle.",
            EscResetState::AwaitingSwitchOff => {
                "Reset the ESCs? Make sure the switch is OFF (O), then confirm."
            }
            EscResetState::AwaitingSwitchOn => "Turn the switch ON now.",
            EscResetState::HoldFullPower => "Holding FULL power. Beep, beep...",
            EscResetState::HoldZeroPower => "Cutting power to 0. Beep, beep...",
            EscResetState::LowPowerCheck => "Are ALL motors spinning smoothly at low power?",
            EscResetState::Completed => "ESC reset/test complete.",
            EscResetState::Failed(failure) => failure.diagnostic(),
            EscResetState::Cancelled => "ESC reset cancelled. Motors stopped.",
        }
    }
}

impl fmt::Display for EscResetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscResetState::Failed(failure) => write!(f, "Failed({:?})", failure),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A state change reported by the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscResetTransition {
    pub from: EscResetState,
    pub to: EscResetState,
}

/// Cancellable, tick-driven ESC calibration state machine
#[derive(Debug, Clone)]
pub struct EscResetSequencer {
    profile: EscResetProfile,
    state: EscResetState,
    entered_at: Instant,
    step: u32,
    step_started: Instant,
    cancel_requested: bool,
}

impl EscResetSequencer {
    pub fn new(profile: EscResetProfile) -> Self {
        let now = Instant::now();
        Self {
            profile,
            state: EscResetState::Idle,
            entered_at: now,
            step: 0,
            step_started: now,
            cancel_requested: false,
        }
    }

    pub fn state(&self) -> EscResetState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Completed hold steps in the current hold state
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Power every motor must be at while in `state`
    pub fn power_for(&self, state: EscResetState) -> u8 {
        match state {
            EscResetState::HoldFullPower => self.profile.full_power,
            EscResetState::LowPowerCheck => self.profile.spin_check_power,
            _ => 0,
        }
    }

    /// Rough progress through the whole run, 0-100
    pub fn progress_percent(&self) -> u8 {
        let within = |steps: u32| -> u32 {
            if steps == 0 {
                0
            } else {
                self.step.min(steps) * 45 / steps
            }
        };

        match self.state {
            EscResetState::Idle | EscResetState::AwaitingSwitchOff => 0,
            EscResetState::AwaitingSwitchOn => 5,
            EscResetState::HoldFullPower => (5 + within(self.profile.full_power_steps)) as u8,
            EscResetState::HoldZeroPower => (50 + within(self.profile.zero_power_steps)) as u8,
            EscResetState::LowPowerCheck => 99,
            EscResetState::Completed => 100,
            EscResetState::Failed(_) | EscResetState::Cancelled => 0,
        }
    }

    /// Begin a run
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed`, leaving the state untouched, if a run is
    /// already active or the switch is not positively known to be OFF.
    pub fn start(
        &mut self,
        switch: SwitchState,
        now: Instant,
        powers: &mut MotorPowers,
    ) -> Result<EscResetTransition> {
        if self.is_active() {
            return Err(GroundError::PreconditionFailed(format!(
                "ESC reset already in progress ({})",
                self.state
            )));
        }

        if switch != SwitchState::Off {
            return Err(GroundError::PreconditionFailed(format!(
                "switch must be OFF to reset the ESCs (currently {})",
                switch
            )));
        }

        self.state = EscResetState::Idle;
        Ok(self.enter(EscResetState::AwaitingSwitchOff, now, powers))
    }

    /// Answer the pending yes/no prompt
    ///
    /// In `AwaitingSwitchOff` a "yes" re-checks the switch: if it is no
    /// longer OFF the run is refused with `PreconditionFailed` and the
    /// sequencer returns to Idle with the motors stopped.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` if no prompt is pending or the switch
    /// re-check fails.
    pub fn confirm(
        &mut self,
        yes: bool,
        switch: SwitchState,
        now: Instant,
        powers: &mut MotorPowers,
    ) -> Result<EscResetTransition> {
        match (self.state, yes) {
            (EscResetState::AwaitingSwitchOff, false) => {
                Ok(self.enter(EscResetState::Cancelled, now, powers))
            }
            (EscResetState::AwaitingSwitchOff, true) => {
                if switch != SwitchState::Off {
                    self.enter(EscResetState::Idle, now, powers);
                    return Err(GroundError::PreconditionFailed(format!(
                        "switch is no longer OFF (currently {})",
                        switch
                    )));
                }
                Ok(self.enter(EscResetState::AwaitingSwitchOn, now, powers))
            }
            (EscResetState::LowPowerCheck, true) => {
                Ok(self.enter(EscResetState::Completed, now, powers))
            }
            (EscResetState::LowPowerCheck, false) => Ok(self.enter(
                EscResetState::Failed(EscResetFailure::MotorsNotSpinning),
                now,
                powers,
            )),
            (state, _) => Err(GroundError::PreconditionFailed(format!(
                "no confirmation pending in state {}",
                state
            ))),
        }
    }

    /// Request cancellation; honoured on the next step boundary
    ///
    /// Returns `false` if no run is active.
    pub fn cancel(&mut self) -> bool {
        if self.is_active() {
            self.cancel_requested = true;
        }
        self.cancel_requested
    }

    /// End an active run immediately with `reason`
    pub fn abort(
        &mut self,
        reason: EscResetFailure,
        now: Instant,
        powers: &mut MotorPowers,
    ) -> Option<EscResetTransition> {
        if !self.is_active() {
            return None;
        }
        Some(self.enter(EscResetState::Failed(reason), now, powers))
    }

    /// Advance the machine to `now`
    ///
    /// Polls the switch, checks deadlines and step boundaries, and
    /// reasserts the state's motor power. Returns the transition if one
    /// happened. Does nothing while Idle or terminal.
    pub fn tick(
        &mut self,
        now: Instant,
        switch: SwitchState,
        powers: &mut MotorPowers,
    ) -> Option<EscResetTransition> {
        if !self.is_active() {
            return None;
        }

        let waited = now.saturating_duration_since(self.entered_at);
        let prompt_expired = waited >= self.profile.prompt_timeout;

        let next = match self.state {
            EscResetState::AwaitingSwitchOff | EscResetState::LowPowerCheck => {
                if self.cancel_requested {
                    Some(EscResetState::Cancelled)
                } else if prompt_expired {
                    Some(EscResetState::Failed(EscResetFailure::ConfirmationTimeout))
                } else {
                    None
                }
            }
            EscResetState::AwaitingSwitchOn => {
                if self.cancel_requested {
                    Some(EscResetState::Cancelled)
                } else if switch == SwitchState::On {
                    Some(EscResetState::HoldFullPower)
                } else if prompt_expired {
                    Some(EscResetState::Failed(EscResetFailure::SwitchTimeout))
                } else {
                    None
                }
            }
            EscResetState::HoldFullPower => {
                self.advance_hold(now, self.profile.full_power_steps, EscResetState::HoldZeroPower)
            }
            EscResetState::HoldZeroPower => {
                self.advance_hold(now, self.profile.zero_power_steps, EscResetState::LowPowerCheck)
            }
            _ => None,
        };

        match next {
            Some(to) => Some(self.enter(to, now, powers)),
            None => {
                self.apply_power(powers);
                None
            }
        }
    }

    /// Step bookkeeping for the two hold states
    fn advance_hold(&mut self, now: Instant, steps: u32, after: EscResetState) -> Option<EscResetState> {
        if now.saturating_duration_since(self.step_started) < self.profile.step_interval {
            return None;
        }

        if self.cancel_requested {
            return Some(EscResetState::Cancelled);
        }

        self.step += 1;
        self.step_started = now;

        if self.step >= steps {
            Some(after)
        } else {
            None
        }
    }

    fn enter(&mut self, to: EscResetState, now: Instant, powers: &mut MotorPowers) -> EscResetTransition {
        let from = self.state;

        self.state = to;
        self.entered_at = now;
        self.step = 0;
        self.step_started = now;
        self.cancel_requested = false;
        self.apply_power(powers);

        match to {
            EscResetState::Failed(failure) => {
                warn!("ESC reset {} -> {}: {}", from, to, failure.diagnostic())
            }
            EscResetState::Cancelled => warn!("ESC reset {} -> {} (motors stopped)", from, to),
            _ => info!("ESC reset {} -> {} (motors at {})", from, to, self.power_for(to)),
        }

        EscResetTransition { from, to }
    }

    fn apply_power(&self, powers: &mut MotorPowers) {
        powers.set_all(self.power_for(self.state));
    }

    /// Result of the last run, once terminal
    pub fn outcome(&self) -> Option<Result<()>> {
        match self.state {
            EscResetState::Completed => Some(Ok(())),
            EscResetState::Cancelled => Some(Err(GroundError::UserCancelled)),
            EscResetState::Failed(failure) => Some(Err(failure.into())),
            _ => None,
        }
    }
}
