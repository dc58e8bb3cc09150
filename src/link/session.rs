//! # Connection Session
//!
//! Owns the link to the vehicle and every piece of state that decides what
//! the motors do.
//!
//! One task runs [`ConnectionSession::run`], a `tokio::select!` loop over:
//!
//! - commands from the user interface ([`SessionCommand`])
//! - bytes arriving on the link
//! - the transmit tick (`send_hz`), which sends the current motor powers
//! - the UI tick (`ui_fps`), which emits the newest telemetry
//! - the ESC reset tick, only while a reset sequence is running
//!
//! Each handler runs to completion before the next event is taken, so the
//! motor powers, the switch state and the sequencer need no locking.
//! Everything the user interface needs comes back as [`SessionEvent`]s.
//!
//! ## Safety rules
//!
//! - Motor powers are zero on connect, on disconnect, on link loss and
//!   whenever the arm switch turns off.
//! - Manual powers are accepted only while flight controls are enabled,
//!   which requires the switch to be ON and no ESC reset to be running.
//! - While an ESC reset runs, the sequencer alone sets the powers.
//! - Every write to the link is bounded by `write_timeout`. A vehicle that
//!   stops reading costs one timeout and then the link is dropped.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::banner::{BannerProgress, BannerReader, ResetReport};
use super::transport::{Connector, LinkStream};
use crate::config::Config;
use crate::error::{GroundError, Result};
use crate::motors::MotorPowers;
use crate::protocol::decoder::decode_frame;
use crate::protocol::encoder::encode_motor_command;
use crate::protocol::frame_sync::FrameSync;
use crate::protocol::packets::{DebugRecord, FastRecord, TelemetryRecord, HANDSHAKE_TOKEN};
use crate::safety::esc_reset::{EscResetFailure, EscResetProfile, EscResetSequencer, EscResetState};
use crate::safety::switch_monitor::{SwitchMonitor, SwitchState, SwitchThresholds};
use crate::telemetry::battery::{BatteryGauge, BatteryStatus};
use crate::telemetry::recorder::TelemetryRecorder;

/// Bytes requested from the link per read
const READ_CHUNK: usize = 1024;

/// Requests from the user interface
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Connect { host: String, port: u16 },
    /// Stop the motors and close the link (ask the user first)
    Disconnect,
    SetDesiredPowers(MotorPowers),
    /// Add `delta` to every motor, clamped to `[0, full_power]`
    Ramp(i32),
    SetMotorsEnabled(bool),
    StartEscReset,
    CancelEscReset,
    /// Answer to the pending ESC reset prompt
    Confirm(bool),
    /// Send the handshake and read the reset report (once per connection)
    RequestBanner,
    Shutdown,
}

/// Notifications to the user interface
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { peer: String },
    Disconnected,
    ConnectionError(String),
    Telemetry(TelemetryRecord),
    Battery(BatteryStatus),
    ResetBanner(ResetReport),
    SwitchChanged { state: SwitchState, volts: f32 },
    MotorsEnabled(bool),
    EscReset {
        state: EscResetState,
        prompt: &'static str,
        progress: u8,
    },
    CommandRejected(String),
}

/// Session timing and limits
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub send_interval: Duration,
    pub ui_interval: Duration,
    pub handshake_on_connect: bool,
    pub banner_timeout: Duration,
    /// Longest a write may block before the link counts as lost
    pub write_timeout: Duration,
    pub esc_tick: Duration,
    pub switch: SwitchThresholds,
    /// Ceiling for manual motor powers
    pub full_power: u8,
    pub esc_reset: EscResetProfile,
    pub battery_cells: u8,
    pub battery_alpha: f32,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.link.connect_timeout(),
            send_interval: config.link.send_interval(),
            ui_interval: config.link.ui_interval(),
            handshake_on_connect: config.link.handshake_on_connect,
            banner_timeout: config.link.banner_timeout(),
            write_timeout: config.link.write_timeout(),
            esc_tick: config.esc_reset.tick_interval(),
            switch: config.switch.thresholds(),
            full_power: config.motors.full_power,
            esc_reset: config.esc_reset_profile(),
            battery_cells: config.battery.cells,
            battery_alpha: config.battery.ema_alpha,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An open link and its per-connection handshake state
struct Link {
    stream: Box<dyn LinkStream>,
    peer: String,
    banner: Option<BannerReader>,
    handshake_sent: bool,
}

/// Single owner of the vehicle link, motor powers and safety state
pub struct ConnectionSession<C: Connector> {
    connector: C,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    link: Option<Link>,
    frame_sync: FrameSync,
    switch: SwitchMonitor,
    battery: BatteryGauge,
    sequencer: EscResetSequencer,
    powers: MotorPowers,
    motors_enabled: bool,
    latest_fast: Option<FastRecord>,
    latest_debug: Option<DebugRecord>,
    battery_updated: bool,
    recorder: Option<TelemetryRecorder>,
}

impl<C: Connector> ConnectionSession<C> {
    pub fn new(connector: C, settings: SessionSettings, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            connector,
            switch: SwitchMonitor::new(settings.switch),
            battery: BatteryGauge::new(settings.battery_cells, settings.battery_alpha),
            sequencer: EscResetSequencer::new(settings.esc_reset),
            settings,
            events,
            link: None,
            frame_sync: FrameSync::new(),
            powers: MotorPowers::ZERO,
            motors_enabled: false,
            latest_fast: None,
            latest_debug: None,
            battery_updated: false,
            recorder: None,
        }
    }

    /// Record every decoded telemetry record
    pub fn with_recorder(mut self, recorder: TelemetryRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Powers sent on the next transmit tick
    pub fn powers(&self) -> MotorPowers {
        self.powers
    }

    pub fn motors_enabled(&self) -> bool {
        self.motors_enabled
    }

    pub fn switch_state(&self) -> SwitchState {
        self.switch.state()
    }

    pub fn esc_state(&self) -> EscResetState {
        self.sequencer.state()
    }

    /// Run the event loop until `Shutdown` or until every command sender is dropped
    ///
    /// Closes the link cleanly (final zero command) before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the telemetry recorder cannot be flushed on exit
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) -> Result<()> {
        let mut transmit = interval(self.settings.send_interval);
        transmit.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ui = interval(self.settings.ui_interval);
        ui.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut esc_tick = interval(self.settings.esc_tick);
        esc_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut read_buf = vec![0u8; READ_CHUNK];

        info!(
            "Session started (transmit every {:?}, UI every {:?})",
            self.settings.send_interval, self.settings.ui_interval
        );

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }

                result = read_link(&mut self.link, &mut read_buf) => {
                    match result {
                        Ok(0) => {
                            info!("Vehicle closed the link");
                            self.teardown(None);
                        }
                        Ok(n) => self.ingest(&read_buf[..n], Instant::now()),
                        Err(e) => {
                            let error = GroundError::Connection(format!("read failed: {}", e));
                            self.teardown(Some(error.to_string()));
                        }
                    }
                }

                _ = transmit.tick(), if self.link.is_some() => {
                    self.transmit().await;
                }

                _ = ui.tick() => {
                    self.refresh_ui(Instant::now());
                }

                _ = esc_tick.tick(), if self.sequencer.is_active() => {
                    self.tick_sequencer(Instant::now());
                }
            }
        }

        info!("Session shutting down");
        if self.link.is_some() {
            self.disconnect().await;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.flush()?;
        }
        Ok(())
    }

    pub(crate) async fn handle_command(&mut self, command: SessionCommand) {
        debug!("Command: {:?}", command);

        match command {
            SessionCommand::Connect { host, port } => self.connect(&host, port).await,
            SessionCommand::Disconnect => {
                if self.link.is_some() {
                    self.disconnect().await;
                } else {
                    self.reject("not connected");
                }
            }
            SessionCommand::SetDesiredPowers(powers) => {
                if let Err(e) = self.check_flight_gate() {
                    self.reject(e);
                    return;
                }
                self.powers = powers;
                self.powers.limit(self.settings.full_power);
                trace!("Desired powers {}", self.powers);
            }
            SessionCommand::Ramp(delta) => {
                if let Err(e) = self.check_flight_gate() {
                    self.reject(e);
                    return;
                }
                self.powers.ramp(delta, self.settings.full_power);
                trace!("Ramped powers by {} to {}", delta, self.powers);
            }
            SessionCommand::SetMotorsEnabled(enable) => self.request_motors_enabled(enable),
            SessionCommand::StartEscReset => self.start_esc_reset(),
            SessionCommand::CancelEscReset => {
                if self.sequencer.cancel() {
                    info!("ESC reset cancel requested");
                } else {
                    self.reject("no ESC reset in progress");
                }
            }
            SessionCommand::Confirm(yes) => self.confirm_esc_reset(yes),
            SessionCommand::RequestBanner => self.request_banner().await,
            SessionCommand::Shutdown => {}
        }
    }

    async fn connect(&mut self, host: &str, port: u16) {
        if let Some(link) = &self.link {
            let message = format!("already connected to {}", link.peer);
            self.reject(message);
            return;
        }

        let peer = format!("{}:{}", host, port);
        info!("Connecting to {}", peer);

        let attempt = timeout(self.settings.connect_timeout, self.connector.connect(host, port)).await;
        let stream = match attempt {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let error = GroundError::Connection(format!("connect to {} failed: {}", peer, e));
                warn!("{}", error);
                self.emit(SessionEvent::ConnectionError(error.to_string()));
                return;
            }
            Err(_) => {
                let error = GroundError::Connection(format!(
                    "connect to {} timed out after {:?}",
                    peer, self.settings.connect_timeout
                ));
                warn!("{}", error);
                self.emit(SessionEvent::ConnectionError(error.to_string()));
                return;
            }
        };

        self.reset_link_state();
        self.link = Some(Link {
            stream,
            peer: peer.clone(),
            banner: None,
            handshake_sent: false,
        });

        info!("Connected to {}", peer);
        self.emit(SessionEvent::Connected { peer });

        if self.settings.handshake_on_connect {
            self.request_banner().await;
        }
    }

    /// Stop the motors, send a final zero command, then close the link
    async fn disconnect(&mut self) {
        self.powers.zero();
        self.abort_sequence(EscResetFailure::ConnectionLost, Instant::now());

        let limit = self.settings.write_timeout;
        if let Some(link) = self.link.as_mut() {
            let command = encode_motor_command(&MotorPowers::ZERO);
            let result = async {
                write_link(&mut link.stream, &command, limit).await?;
                match timeout(limit, link.stream.shutdown()).await {
                    Ok(closed) => closed.map_err(|e| GroundError::Connection(format!("shutdown failed: {}", e))),
                    Err(_) => Err(GroundError::Connection("shutdown stalled".to_string())),
                }
            }
            .await;

            if let Err(e) = result {
                debug!("Final zero command to {} not delivered: {}", link.peer, e);
            }
            info!("Disconnected from {}", link.peer);
        }

        self.teardown(None);
    }

    /// Drop the link and revoke everything that depended on it
    ///
    /// `error` selects `ConnectionError` over `Disconnected`.
    fn teardown(&mut self, error: Option<String>) {
        let Some(link) = self.link.take() else {
            return;
        };
        drop(link);

        self.powers.zero();
        self.abort_sequence(EscResetFailure::ConnectionLost, Instant::now());
        self.set_motors_enabled(false);
        self.reset_link_state();

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.flush() {
                warn!("Failed to flush telemetry: {}", e);
            }
        }

        match error {
            Some(text) => {
                warn!("Link lost: {}", text);
                self.emit(SessionEvent::ConnectionError(text));
            }
            None => self.emit(SessionEvent::Disconnected),
        }
    }

    /// Per-connection state back to its initial values
    fn reset_link_state(&mut self) {
        self.frame_sync.reset();
        self.switch.reset();
        self.battery.reset();
        self.powers.zero();
        self.motors_enabled = false;
        self.latest_fast = None;
        self.latest_debug = None;
        self.battery_updated = false;
    }

    async fn request_banner(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.reject("not connected");
            return;
        };

        // The vehicle only reads text before streaming starts; later bytes
        // are taken as motor commands.
        if link.handshake_sent {
            self.reject("handshake already sent on this connection");
            return;
        }

        match write_link(&mut link.stream, HANDSHAKE_TOKEN, self.settings.write_timeout).await {
            Ok(()) => {
                link.handshake_sent = true;
                link.banner = Some(BannerReader::new(Instant::now() + self.settings.banner_timeout));
                debug!("Handshake sent, waiting {:?} for reset report", self.settings.banner_timeout);
            }
            Err(e) => self.teardown(Some(e.to_string())),
        }
    }

    /// Route received bytes through the banner reader and the frame synchronizer
    pub(crate) fn ingest(&mut self, data: &[u8], now: Instant) {
        self.expire_banner(now);

        let banner = self.link.as_mut().and_then(|link| link.banner.as_mut().map(|reader| reader.absorb(data)));

        match banner {
            None => self.feed_frames(data, now),
            Some(BannerProgress::Waiting) => {}
            Some(BannerProgress::Complete { line, rest }) => {
                self.finish_banner();
                self.handle_banner_line(&line);
                self.feed_frames(&rest, now);
            }
            Some(BannerProgress::Overflow { bytes }) => {
                self.finish_banner();
                debug!("No reset report line within {} bytes", bytes.len());
                self.feed_frames(&bytes, now);
            }
        }
    }

    fn finish_banner(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.banner = None;
        }
    }

    /// Give up on the banner once its deadline passes; buffered bytes are telemetry
    fn expire_banner(&mut self, now: Instant) {
        let expired = self
            .link
            .as_mut()
            .filter(|link| link.banner.as_ref().is_some_and(|reader| reader.is_expired(now)))
            .and_then(|link| link.banner.take());

        if let Some(reader) = expired {
            debug!("No reset report within {:?}", self.settings.banner_timeout);
            let bytes = reader.into_buffered();
            self.feed_frames(&bytes, now);
        }
    }

    fn handle_banner_line(&mut self, line: &str) {
        match ResetReport::parse(line) {
            Ok(report) => {
                if report.is_new_reset() {
                    warn!("Vehicle reset report: {}", report);
                } else {
                    info!("Vehicle reset report: {}", report);
                }
                self.emit(SessionEvent::ResetBanner(report));
            }
            Err(e) => debug!("Ignoring banner line {:?}: {}", line, e),
        }
    }

    fn feed_frames(&mut self, data: &[u8], now: Instant) {
        let frames: Vec<Bytes> = self.frame_sync.feed(data).collect();

        for frame in frames {
            match decode_frame(&frame) {
                Ok(record) => self.handle_record(record, now),
                Err(e) => debug!("Dropping telemetry frame: {}", e),
            }
        }
    }

    fn handle_record(&mut self, record: TelemetryRecord, now: Instant) {
        trace!("Telemetry {:?} seq={}", record.frame_type(), record.seq());

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(&record) {
                warn!("Telemetry recording stopped: {}", e);
                self.recorder = None;
            }
        }

        match record {
            TelemetryRecord::Fast(fast) => {
                self.handle_switch_reading(fast.battery_volts, now);
                self.latest_fast = Some(fast);
            }
            TelemetryRecord::Debug(debug) => self.latest_debug = Some(debug),
        }
    }

    fn handle_switch_reading(&mut self, volts: f32, now: Instant) {
        let update = self.switch.update(volts);

        if update.changed {
            info!("Arm switch {} -> {} ({:.2} V)", update.previous, update.state, volts);
            self.emit(SessionEvent::SwitchChanged {
                state: update.state,
                volts,
            });
        }

        if update.turned_off() {
            warn!("Arm switch turned OFF, stopping motors");
            if matches!(
                self.sequencer.state(),
                EscResetState::HoldFullPower | EscResetState::HoldZeroPower | EscResetState::LowPowerCheck
            ) {
                self.abort_sequence(EscResetFailure::SwitchTurnedOff, now);
            }
            self.powers.zero();
            self.set_motors_enabled(false);
        } else if update.turned_on() && self.sequencer.is_active() {
            self.tick_sequencer(now);
        }

        if update.state == SwitchState::On {
            self.battery.update(volts);
            self.battery_updated = true;
        } else {
            self.battery.reset();
        }
    }

    async fn transmit(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let command = encode_motor_command(&self.powers);
        if let Err(e) = write_link(&mut link.stream, &command, self.settings.write_timeout).await {
            self.teardown(Some(e.to_string()));
        }
    }

    /// Emit the newest record of each type received since the last refresh
    pub(crate) fn refresh_ui(&mut self, now: Instant) {
        self.expire_banner(now);

        if let Some(fast) = self.latest_fast.take() {
            self.emit(SessionEvent::Telemetry(TelemetryRecord::Fast(fast)));
        }
        if let Some(debug) = self.latest_debug.take() {
            self.emit(SessionEvent::Telemetry(TelemetryRecord::Debug(debug)));
        }
        if std::mem::take(&mut self.battery_updated) {
            if let Some(status) = self.battery.status() {
                self.emit(SessionEvent::Battery(status));
            }
        }
    }

    /// Manual powers are allowed only while flight controls are enabled
    fn check_flight_gate(&self) -> std::result::Result<(), &'static str> {
        if self.link.is_none() {
            Err("not connected")
        } else if self.sequencer.is_active() {
            Err("ESC reset in progress")
        } else if !self.motors_enabled {
            Err("motors are disabled")
        } else {
            Ok(())
        }
    }

    fn request_motors_enabled(&mut self, enable: bool) {
        if !enable {
            self.powers.zero();
            self.set_motors_enabled(false);
            return;
        }

        let refusal = if self.link.is_none() {
            Some("not connected".to_string())
        } else if self.sequencer.is_active() {
            Some("ESC reset in progress".to_string())
        } else if !self.switch.is_on() {
            Some(format!("switch must be ON to enable motors (currently {})", self.switch.state()))
        } else {
            None
        };

        match refusal {
            Some(reason) => self.reject(reason),
            None => self.set_motors_enabled(true),
        }
    }

    fn set_motors_enabled(&mut self, enabled: bool) {
        if self.motors_enabled == enabled {
            return;
        }
        self.motors_enabled = enabled;
        info!("Flight controls {}", if enabled { "enabled" } else { "disabled" });
        self.emit(SessionEvent::MotorsEnabled(enabled));
    }

    fn start_esc_reset(&mut self) {
        if self.link.is_none() {
            self.reject("not connected");
            return;
        }

        match self.sequencer.start(self.switch.state(), Instant::now(), &mut self.powers) {
            Ok(_) => {
                self.set_motors_enabled(false);
                self.emit_esc_state();
            }
            Err(e) => self.reject(e.to_string()),
        }
    }

    fn confirm_esc_reset(&mut self, yes: bool) {
        let was = self.sequencer.state();
        match self.sequencer.confirm(yes, self.switch.state(), Instant::now(), &mut self.powers) {
            Ok(_) => self.after_esc_transition(),
            Err(e) => {
                self.reject(e.to_string());
                if self.sequencer.state() != was {
                    self.emit_esc_state();
                }
            }
        }
    }

    fn tick_sequencer(&mut self, now: Instant) {
        let switch = self.switch.state();
        if self.sequencer.tick(now, switch, &mut self.powers).is_some() {
            self.after_esc_transition();
        }
    }

    fn abort_sequence(&mut self, reason: EscResetFailure, now: Instant) {
        if self.sequencer.abort(reason, now, &mut self.powers).is_some() {
            self.after_esc_transition();
        }
    }

    fn after_esc_transition(&mut self) {
        self.emit_esc_state();

        match self.sequencer.outcome() {
            Some(Ok(())) => info!("ESC reset completed"),
            Some(Err(e)) => warn!("ESC reset ended: {}", e),
            None => {}
        }
    }

    fn emit_esc_state(&self) {
        let state = self.sequencer.state();
        self.emit(SessionEvent::EscReset {
            state,
            prompt: state.prompt(),
            progress: self.sequencer.progress_percent(),
        });
    }

    fn reject(&self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Command rejected: {}", reason);
        self.emit(SessionEvent::CommandRejected(reason));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

/// Write and flush `bytes`, giving up after `limit`
///
/// A vehicle that stops reading fills the socket buffers; the stall is
/// reported as a connection error instead of blocking the caller.
async fn write_link(stream: &mut Box<dyn LinkStream>, bytes: &[u8], limit: Duration) -> Result<()> {
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };

    match timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GroundError::Connection(format!("write failed: {}", e))),
        Err(_) => Err(GroundError::Connection(format!(
            "write stalled for {:?}, vehicle not reading",
            limit
        ))),
    }
}

/// Read from the link, or wait forever while disconnected
async fn read_link(link: &mut Option<Link>, buf: &mut [u8]) -> std::io::Result<usize> {
    match link {
        Some(link) => link.stream.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::MockConnector;
    use crate::protocol::decoder::test_frames::*;
    use async_trait::async_trait;
    use std::io;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    /// ADC reading well above the ON threshold (about 9.7 V)
    const ADC_ON: u16 = 3000;
    const ADC_OFF: u16 = 0;

    type Events = mpsc::UnboundedReceiver<SessionEvent>;

    fn settings(handshake: bool) -> SessionSettings {
        SessionSettings {
            handshake_on_connect: handshake,
            ..SessionSettings::default()
        }
    }

    fn connector_for(stream: DuplexStream) -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(stream) as Box<dyn LinkStream>));
        connector
    }

    fn drain(events: &mut Events) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn rejected(events: &[SessionEvent]) -> bool {
        events.iter().any(|event| matches!(event, SessionEvent::CommandRejected(_)))
    }

    fn esc_states(events: &[SessionEvent]) -> Vec<EscResetState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::EscReset { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Connected session without the loop; handlers are driven directly
    async fn connected(handshake: bool) -> (ConnectionSession<MockConnector>, DuplexStream, Events) {
        let (client, mut server) = tokio::io::duplex(4096);
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(connector_for(client), settings(handshake), tx);

        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Connected {
                peer: "192.168.4.1:2323".to_string()
            }
        );

        if handshake {
            let mut hello = [0u8; 6];
            server.read_exact(&mut hello).await.unwrap();
            assert_eq!(&hello, HANDSHAKE_TOKEN);
        }

        (session, server, events)
    }

    /// Feed one Fast frame with the given battery ADC reading
    fn feed_fast(session: &mut ConnectionSession<MockConnector>, seq: u16, adc: u16) {
        session.ingest(&fast_frame_with(seq, adc), Instant::now());
    }

    /// Connected, switch ON, flight controls enabled
    async fn armed() -> (ConnectionSession<MockConnector>, DuplexStream, Events) {
        let (mut session, server, mut events) = connected(false).await;
        feed_fast(&mut session, 1, ADC_ON);
        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        assert!(session.motors_enabled());
        drain(&mut events);
        (session, server, events)
    }

    #[tokio::test]
    async fn test_connect_resets_state_and_sends_handshake() {
        let (session, _server, _events) = connected(true).await;
        assert!(session.is_connected());
        assert!(session.powers().is_zero());
        assert!(!session.motors_enabled());
        assert_eq!(session.switch_state(), SwitchState::Unknown);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));

        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(connector, settings(true), tx);
        session
            .handle_command(SessionCommand::Connect {
                host: "10.0.0.1".to_string(),
                port: 1,
            })
            .await;

        match events.try_recv().unwrap() {
            SessionEvent::ConnectionError(text) => assert!(text.contains("refused"), "{}", text),
            other => panic!("Expected ConnectionError, got {:?}", other),
        }
        assert!(!session.is_connected());
    }

    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self, _host: &str, _port: u16) -> io::Result<Box<dyn LinkStream>> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(StalledConnector, settings(true), tx);
        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;

        match events.try_recv().unwrap() {
            SessionEvent::ConnectionError(text) => assert!(text.contains("timed out"), "{}", text),
            other => panic!("Expected ConnectionError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let (mut session, _server, mut events) = connected(false).await;
        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;
        assert!(rejected(&drain(&mut events)));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_banner_then_telemetry_in_one_read() {
        let (mut session, _server, mut events) = connected(true).await;

        let mut data = b"RST:BROWNOUT,BOOT:3,PEND:1\n".to_vec();
        data.extend_from_slice(&fast_frame_with(1, ADC_ON));
        session.ingest(&data, Instant::now());
        session.refresh_ui(Instant::now());

        let events = drain(&mut events);
        let report = events
            .iter()
            .find_map(|event| match event {
                SessionEvent::ResetBanner(report) => Some(report.clone()),
                _ => None,
            })
            .expect("reset banner event");
        assert_eq!(report.reason(), "BROWNOUT");
        assert_eq!(report.boot_count(), Some(3));

        assert!(events.contains(&SessionEvent::SwitchChanged {
            state: SwitchState::On,
            volts: fast_volts(ADC_ON),
        }));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Telemetry(TelemetryRecord::Fast(r)) if r.seq == 1)));
        assert!(events.iter().any(|event| matches!(event, SessionEvent::Battery(_))));
    }

    fn fast_volts(adc: u16) -> f32 {
        crate::protocol::packets::adc_to_volts(adc)
    }

    #[tokio::test]
    async fn test_banner_split_across_reads() {
        let (mut session, _server, mut events) = connected(true).await;

        session.ingest(b"RST:OK,BOOT:", Instant::now());
        assert!(drain(&mut events).is_empty());

        session.ingest(b"NA,PEND:0\n", Instant::now());
        let events = drain(&mut events);
        assert!(matches!(&events[..], [SessionEvent::ResetBanner(report)] if !report.is_new_reset()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_banner_timeout_flushes_into_telemetry() {
        let (mut session, _server, mut events) = connected(true).await;

        // Half a frame arrives while still waiting for the banner
        let frame = fast_frame_with(7, ADC_ON);
        session.ingest(&frame[..10], Instant::now());

        tokio::time::advance(Duration::from_millis(1001)).await;
        session.ingest(&frame[10..], Instant::now());
        session.refresh_ui(Instant::now());

        let events = drain(&mut events);
        assert!(!events.iter().any(|event| matches!(event, SessionEvent::ResetBanner(_))));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Telemetry(TelemetryRecord::Fast(r)) if r.seq == 7)));
    }

    #[tokio::test]
    async fn test_banner_overflow_is_not_fatal() {
        let (mut session, _server, mut events) = connected(true).await;

        session.ingest(&[0x55; 200], Instant::now());
        feed_fast(&mut session, 2, ADC_OFF);
        session.refresh_ui(Instant::now());

        let events = drain(&mut events);
        assert!(!events.iter().any(|event| matches!(event, SessionEvent::ResetBanner(_))));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::Telemetry(TelemetryRecord::Fast(r)) if r.seq == 2)));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_banner_is_suppressed() {
        let (mut session, _server, mut events) = connected(true).await;
        session.ingest(b"garbage\n", Instant::now());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_second_banner_request_rejected() {
        let (mut session, _server, mut events) = connected(true).await;
        session.handle_command(SessionCommand::RequestBanner).await;
        assert!(rejected(&drain(&mut events)));
    }

    #[tokio::test]
    async fn test_manual_banner_request() {
        let (mut session, mut server, mut events) = connected(false).await;
        session.handle_command(SessionCommand::RequestBanner).await;
        assert!(drain(&mut events).is_empty());

        let mut hello = [0u8; 6];
        server.read_exact(&mut hello).await.unwrap();
        assert_eq!(&hello, HANDSHAKE_TOKEN);
    }

    #[tokio::test]
    async fn test_ui_refresh_coalesces_to_latest_record() {
        let (mut session, _server, mut events) = connected(false).await;

        for seq in 1..=3 {
            feed_fast(&mut session, seq, ADC_ON);
        }
        session.ingest(&debug_frame(10, 1000, 0, 0, 0, 0), Instant::now());
        drain(&mut events);

        session.refresh_ui(Instant::now());
        let telemetry: Vec<u16> = drain(&mut events)
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Telemetry(record) => Some(record.seq()),
                _ => None,
            })
            .collect();
        assert_eq!(telemetry, vec![3, 10]);

        // Nothing new since the last refresh
        session.refresh_ui(Instant::now());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_frames_are_dropped() {
        let (mut session, _server, mut events) = connected(false).await;
        let mut frame = fast_frame_with(1, ADC_ON);
        frame[19] ^= 0xFF;
        session.ingest(&frame, Instant::now());
        session.refresh_ui(Instant::now());

        assert!(drain(&mut events).is_empty());
        assert_eq!(session.switch_state(), SwitchState::Unknown);
    }

    #[tokio::test]
    async fn test_enable_requires_switch_on() {
        let (mut session, _server, mut events) = connected(false).await;

        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        assert!(!session.motors_enabled());
        assert!(rejected(&drain(&mut events)));

        feed_fast(&mut session, 1, ADC_OFF);
        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        assert!(!session.motors_enabled());

        feed_fast(&mut session, 2, ADC_ON);
        drain(&mut events);
        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        assert!(session.motors_enabled());
        assert_eq!(drain(&mut events), vec![SessionEvent::MotorsEnabled(true)]);
    }

    #[tokio::test]
    async fn test_powers_rejected_while_disabled() {
        let (mut session, _server, mut events) = connected(false).await;
        feed_fast(&mut session, 1, ADC_ON);
        drain(&mut events);

        session
            .handle_command(SessionCommand::SetDesiredPowers(MotorPowers::uniform(50)))
            .await;
        session.handle_command(SessionCommand::Ramp(10)).await;

        assert!(session.powers().is_zero());
        assert_eq!(drain(&mut events).len(), 2);
    }

    #[tokio::test]
    async fn test_desired_powers_capped_at_full_power() {
        let (mut session, _server, _events) = armed().await;

        session
            .handle_command(SessionCommand::SetDesiredPowers(MotorPowers::new(10, 200, 255, 40)))
            .await;
        assert_eq!(session.powers(), MotorPowers::new(10, 180, 180, 40));
    }

    #[tokio::test]
    async fn test_ramp_clamps_both_ends() {
        let (mut session, _server, _events) = armed().await;

        session.handle_command(SessionCommand::Ramp(-5)).await;
        assert!(session.powers().is_zero());

        session.handle_command(SessionCommand::Ramp(170)).await;
        session.handle_command(SessionCommand::Ramp(20)).await;
        assert_eq!(session.powers(), MotorPowers::uniform(180));
    }

    #[tokio::test]
    async fn test_switch_off_stops_motors() {
        let (mut session, _server, mut events) = armed().await;
        session
            .handle_command(SessionCommand::SetDesiredPowers(MotorPowers::uniform(120)))
            .await;

        feed_fast(&mut session, 2, ADC_OFF);

        assert!(session.powers().is_zero());
        assert!(!session.motors_enabled());
        let events = drain(&mut events);
        assert!(events.contains(&SessionEvent::MotorsEnabled(false)));
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::SwitchChanged { state: SwitchState::Off, .. })));
    }

    #[tokio::test]
    async fn test_disable_zeroes_powers() {
        let (mut session, _server, _events) = armed().await;
        session.handle_command(SessionCommand::Ramp(40)).await;
        session.handle_command(SessionCommand::SetMotorsEnabled(false)).await;

        assert!(session.powers().is_zero());
        assert!(!session.motors_enabled());
    }

    #[tokio::test]
    async fn test_esc_reset_requires_connection() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(MockConnector::new(), settings(false), tx);
        session.handle_command(SessionCommand::StartEscReset).await;

        assert!(rejected(&drain(&mut events)));
        assert_eq!(session.esc_state(), EscResetState::Idle);
    }

    #[tokio::test]
    async fn test_esc_reset_requires_switch_off() {
        let (mut session, _server, mut events) = armed().await;
        session.handle_command(SessionCommand::StartEscReset).await;

        assert!(rejected(&drain(&mut events)));
        assert_eq!(session.esc_state(), EscResetState::Idle);
        assert!(session.motors_enabled());
    }

    #[tokio::test]
    async fn test_esc_reset_flow_and_switch_off_abort() {
        let (mut session, _server, mut events) = connected(false).await;
        feed_fast(&mut session, 1, ADC_OFF);

        session.handle_command(SessionCommand::StartEscReset).await;
        session.handle_command(SessionCommand::Confirm(true)).await;
        assert_eq!(session.esc_state(), EscResetState::AwaitingSwitchOn);

        // Switch on: the sequencer moves to full power without waiting for its tick
        feed_fast(&mut session, 2, ADC_ON);
        assert_eq!(session.esc_state(), EscResetState::HoldFullPower);
        assert_eq!(session.powers(), MotorPowers::uniform(180));

        // Manual control stays locked out
        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        session
            .handle_command(SessionCommand::SetDesiredPowers(MotorPowers::uniform(1)))
            .await;
        assert_eq!(session.powers(), MotorPowers::uniform(180));

        feed_fast(&mut session, 3, ADC_OFF);
        assert_eq!(
            session.esc_state(),
            EscResetState::Failed(EscResetFailure::SwitchTurnedOff)
        );
        assert!(session.powers().is_zero());

        let states = esc_states(&drain(&mut events));
        assert_eq!(
            states,
            vec![
                EscResetState::AwaitingSwitchOff,
                EscResetState::AwaitingSwitchOn,
                EscResetState::HoldFullPower,
                EscResetState::Failed(EscResetFailure::SwitchTurnedOff),
            ]
        );
    }

    #[tokio::test]
    async fn test_confirm_with_switch_on_returns_to_idle() {
        let (mut session, _server, mut events) = connected(false).await;
        feed_fast(&mut session, 1, ADC_OFF);
        session.handle_command(SessionCommand::StartEscReset).await;

        feed_fast(&mut session, 2, ADC_ON);
        drain(&mut events);
        session.handle_command(SessionCommand::Confirm(true)).await;

        let events = drain(&mut events);
        assert!(rejected(&events));
        assert_eq!(esc_states(&events), vec![EscResetState::Idle]);
        assert!(session.powers().is_zero());
    }

    #[tokio::test]
    async fn test_cancel_without_sequence_rejected() {
        let (mut session, _server, mut events) = connected(false).await;
        session.handle_command(SessionCommand::CancelEscReset).await;
        assert!(rejected(&drain(&mut events)));
    }

    #[tokio::test]
    async fn test_disconnect_sends_final_zero() {
        let (mut session, mut server, mut events) = armed().await;
        session.handle_command(SessionCommand::Ramp(60)).await;

        session.handle_command(SessionCommand::Disconnect).await;

        assert!(!session.is_connected());
        assert!(session.powers().is_zero());
        let events = drain(&mut events);
        assert!(events.contains(&SessionEvent::MotorsEnabled(false)));
        assert_eq!(events.last(), Some(&SessionEvent::Disconnected));

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert_eq!(sent, vec![0, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_bounded_when_vehicle_not_reading() {
        // Room for two bytes; the final zero command can never complete
        let (client, _server) = tokio::io::duplex(2);
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(connector_for(client), settings(false), tx);
        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;

        timeout(Duration::from_secs(5), session.handle_command(SessionCommand::Disconnect))
            .await
            .expect("disconnect blocked on a stalled link");

        assert!(!session.is_connected());
        assert_eq!(drain(&mut events).last(), Some(&SessionEvent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_stall_drops_link() {
        let (client, _server) = tokio::io::duplex(2);
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(connector_for(client), settings(false), tx);
        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;
        drain(&mut events);

        timeout(Duration::from_secs(5), session.transmit())
            .await
            .expect("transmit blocked on a stalled link");

        assert!(!session.is_connected());
        match drain(&mut events).last() {
            Some(SessionEvent::ConnectionError(text)) => assert!(text.contains("stalled"), "{}", text),
            other => panic!("Expected ConnectionError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_vehicle_sees_handshake_powers_and_final_zero() {
        let vehicle = tokio_test::io::Builder::new()
            .write(HANDSHAKE_TOKEN)
            .write(&[0, 0, 0, 0])
            .write(&[10, 20, 30, 40])
            .write(&[0, 0, 0, 0])
            .build();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(vehicle) as Box<dyn LinkStream>));

        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(connector, settings(true), tx);
        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;

        // Disarmed: zero goes out
        session.transmit().await;

        session.ingest(b"RST:OK,BOOT:NA,PEND:0\n", Instant::now());
        feed_fast(&mut session, 1, ADC_ON);
        session.handle_command(SessionCommand::SetMotorsEnabled(true)).await;
        session
            .handle_command(SessionCommand::SetDesiredPowers(MotorPowers::new(10, 20, 30, 40)))
            .await;
        session.transmit().await;

        session.handle_command(SessionCommand::Disconnect).await;

        let events = drain(&mut events);
        assert!(!rejected(&events));
        assert_eq!(events.last(), Some(&SessionEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_disconnect_aborts_sequence() {
        let (mut session, _server, mut events) = connected(false).await;
        feed_fast(&mut session, 1, ADC_OFF);
        session.handle_command(SessionCommand::StartEscReset).await;
        drain(&mut events);

        session.handle_command(SessionCommand::Disconnect).await;
        assert_eq!(
            session.esc_state(),
            EscResetState::Failed(EscResetFailure::ConnectionLost)
        );
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(MockConnector::new(), settings(false), tx);
        session.handle_command(SessionCommand::Disconnect).await;
        assert!(rejected(&drain(&mut events)));
    }

    #[tokio::test]
    async fn test_recorder_captures_records() {
        let temp = tempfile::TempDir::new().unwrap();
        let (client, _server) = tokio::io::duplex(4096);
        let (tx, _events) = mpsc::unbounded_channel();
        let recorder = TelemetryRecorder::new(temp.path(), 100, 2).unwrap();
        let mut session =
            ConnectionSession::new(connector_for(client), settings(false), tx).with_recorder(recorder);

        session
            .handle_command(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await;
        feed_fast(&mut session, 1, ADC_ON);
        session.ingest(&debug_frame(2, 1000, 0, 0, 0, 0), Instant::now());
        session.handle_command(SessionCommand::Disconnect).await;

        let files: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    // Full event loop over an in-memory link

    async fn next_event(events: &mut Events) -> SessionEvent {
        timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_for(events: &mut Events, wanted: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = next_event(events).await;
            if wanted(&event) {
                return event;
            }
        }
    }

    /// Read motor commands until one equals `expected`
    async fn wait_for_command(server: &mut DuplexStream, expected: [u8; 4]) {
        let search = async {
            let mut command = [0u8; 4];
            loop {
                server.read_exact(&mut command).await.unwrap();
                if command == expected {
                    return;
                }
            }
        };
        timeout(Duration::from_secs(2), search)
            .await
            .expect("timed out waiting for motor command");
    }

    fn spawn_session(
        stream: DuplexStream,
        settings: SessionSettings,
    ) -> (mpsc::Sender<SessionCommand>, Events, JoinHandle<Result<()>>) {
        let (tx, events) = mpsc::unbounded_channel();
        let (commands, rx) = mpsc::channel(16);
        let session = ConnectionSession::new(connector_for(stream), settings, tx);
        let handle = tokio::spawn(session.run(rx));
        (commands, events, handle)
    }

    #[tokio::test]
    async fn test_event_loop_end_to_end() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (commands, mut events, handle) = spawn_session(client, settings(true));

        commands
            .send(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await
            .unwrap();
        assert!(matches!(next_event(&mut events).await, SessionEvent::Connected { .. }));

        let mut hello = [0u8; 6];
        server.read_exact(&mut hello).await.unwrap();
        assert_eq!(&hello, HANDSHAKE_TOKEN);

        let mut reply = b"RST:OK,BOOT:NA,PEND:0\n".to_vec();
        reply.extend_from_slice(&fast_frame_with(1, ADC_ON));
        server.write_all(&reply).await.unwrap();

        wait_for(&mut events, |event| matches!(event, SessionEvent::ResetBanner(_))).await;
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::SwitchChanged { state: SwitchState::On, .. })
        })
        .await;
        wait_for(&mut events, |event| matches!(event, SessionEvent::Telemetry(_))).await;

        // Zero powers go out continuously before anything is enabled
        wait_for_command(&mut server, [0, 0, 0, 0]).await;

        commands.send(SessionCommand::SetMotorsEnabled(true)).await.unwrap();
        wait_for(&mut events, |event| *event == SessionEvent::MotorsEnabled(true)).await;

        commands
            .send(SessionCommand::SetDesiredPowers(MotorPowers::new(10, 20, 30, 40)))
            .await
            .unwrap();
        wait_for_command(&mut server, [10, 20, 30, 40]).await;

        // Vehicle goes away
        drop(server);
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::Disconnected | SessionEvent::ConnectionError(_))
        })
        .await;

        commands.send(SessionCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("session did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_survives_vehicle_that_stops_reading() {
        // The handshake fits, the motor commands that follow do not
        let (client, _server) = tokio::io::duplex(8);
        let (commands, mut events, handle) = spawn_session(client, settings(true));

        commands
            .send(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await
            .unwrap();
        wait_for(&mut events, |event| matches!(event, SessionEvent::Connected { .. })).await;

        match wait_for(&mut events, |event| matches!(event, SessionEvent::ConnectionError(_))).await {
            SessionEvent::ConnectionError(text) => assert!(text.contains("stalled"), "{}", text),
            _ => unreachable!(),
        }

        commands.send(SessionCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(3), handle)
            .await
            .expect("session did not stop after Shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_drives_esc_reset_holds() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let (commands, mut events, handle) = spawn_session(client, settings(true));

        commands
            .send(SessionCommand::Connect {
                host: "192.168.4.1".to_string(),
                port: 2323,
            })
            .await
            .unwrap();
        wait_for(&mut events, |event| matches!(event, SessionEvent::Connected { .. })).await;

        let mut hello = [0u8; 6];
        server.read_exact(&mut hello).await.unwrap();

        server.write_all(b"RST:OK,BOOT:NA,PEND:0\n").await.unwrap();
        server.write_all(&fast_frame_with(1, ADC_OFF)).await.unwrap();
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::SwitchChanged { state: SwitchState::Off, .. })
        })
        .await;

        commands.send(SessionCommand::StartEscReset).await.unwrap();
        commands.send(SessionCommand::Confirm(true)).await.unwrap();
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::EscReset { state: EscResetState::AwaitingSwitchOn, .. })
        })
        .await;

        server.write_all(&fast_frame_with(2, ADC_ON)).await.unwrap();
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::EscReset { state: EscResetState::HoldFullPower, .. })
        })
        .await;
        wait_for_command(&mut server, [180; 4]).await;

        // The loop's own tick advances the holds
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::EscReset { state: EscResetState::HoldZeroPower, .. })
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::EscReset { state: EscResetState::LowPowerCheck, .. })
        })
        .await;
        wait_for_command(&mut server, [5; 4]).await;

        commands.send(SessionCommand::Confirm(true)).await.unwrap();
        wait_for(&mut events, |event| {
            matches!(event, SessionEvent::EscReset { state: EscResetState::Completed, .. })
        })
        .await;
        wait_for_command(&mut server, [0; 4]).await;

        commands.send(SessionCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
