//! Session orchestrator: the single thread that owns the publish session.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use livestream_capture::{attach_all, detach_all, CaptureDevices, SESSION_DEVICES};
use livestream_encoder::{EncoderEvent, VideoEncoder, VideoEncoderConfig};
use livestream_ipc::{
    Destination, DeviceKind, NetworkHealth, Preset, SessionCommand, SessionEvent, SessionState,
};
use livestream_transport::{Transport, TransportError, TransportEvent};
use tracing::{debug, info, instrument, warn};

use crate::bitrate::BitrateController;
use crate::config::{DestinationProvider, EngineConfig};
use crate::connection::{Action, ConnectionStateMachine, Outcome, Trigger};
use crate::error::SessionError;
use crate::health;
use crate::metrics::TelemetryAggregator;
use crate::timer::{OneShotTimer, Ticker};
use crate::SessionResult;

/// Connectivity signal from the platform's reachability monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Creates the channel a reachability monitor reports on.
pub fn reachability_channel() -> (Sender<Reachability>, Receiver<Reachability>) {
    crossbeam_channel::unbounded()
}

/// Everything the orchestrator drives, injected at construction.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub transport_events: Receiver<TransportEvent>,
    pub encoder: Box<dyn VideoEncoder>,
    pub encoder_events: Receiver<EncoderEvent>,
    pub capture: Option<Box<dyn CaptureDevices>>,
    pub destinations: Box<dyn DestinationProvider>,
    pub reachability: Receiver<Reachability>,
}

/// One publish session. Created on start, kept after it ends so the final
/// state can still be reported.
struct Session {
    machine: ConnectionStateMachine,
    preset: Preset,
    destination: Destination,
    bitrate: BitrateController,
    health: Option<NetworkHealth>,
    attached: Vec<DeviceKind>,
    last_bytes_sent: u64,
    last_sample_at: Instant,
}

impl Session {
    fn state(&self) -> &SessionState {
        self.machine.state()
    }

    /// Start a fresh measurement window. Health is unknown until the next
    /// sample.
    fn restart_sampling(&mut self, bytes_sent: u64) {
        self.health = None;
        self.last_bytes_sent = bytes_sent;
        self.last_sample_at = Instant::now();
    }
}

enum Input {
    Command(SessionCommand),
    CommandsClosed,
    Transport(TransportEvent),
    Encoder(EncoderEvent),
    Reachability(Reachability),
    SourceClosed(&'static str),
    TelemetryTick,
    AdaptationTick,
    ReconnectDue,
    PublishDue,
    PublishGraceExpired,
}

/// Runs publish sessions on behalf of a driver.
///
/// All session state is confined to the thread calling [`run`](Self::run);
/// timers and collaborator callbacks arrive as channel messages.
pub struct SessionOrchestrator {
    config: EngineConfig,
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    transport: Box<dyn Transport>,
    transport_events: Receiver<TransportEvent>,
    encoder: Box<dyn VideoEncoder>,
    encoder_events: Receiver<EncoderEvent>,
    capture: Option<Box<dyn CaptureDevices>>,
    destinations: Box<dyn DestinationProvider>,
    reachability: Receiver<Reachability>,
    session: Option<Session>,
    telemetry: TelemetryAggregator,
    telemetry_ticker: Ticker,
    adaptation_ticker: Ticker,
    reconnect_timer: OneShotTimer,
    publish_timer: OneShotTimer,
    grace_timer: OneShotTimer,
}

impl SessionOrchestrator {
    pub fn new(
        config: EngineConfig,
        command_rx: Receiver<SessionCommand>,
        event_tx: Sender<SessionEvent>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            command_rx,
            event_tx,
            transport: collaborators.transport,
            transport_events: collaborators.transport_events,
            encoder: collaborators.encoder,
            encoder_events: collaborators.encoder_events,
            capture: collaborators.capture,
            destinations: collaborators.destinations,
            reachability: collaborators.reachability,
            session: None,
            telemetry: TelemetryAggregator::new(),
            telemetry_ticker: Ticker::new(),
            adaptation_ticker: Ticker::new(),
            reconnect_timer: OneShotTimer::new(),
            publish_timer: OneShotTimer::new(),
            grace_timer: OneShotTimer::new(),
        }
    }

    /// Current session state, `Idle` before the first start.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state().clone())
            .unwrap_or_default()
    }

    /// Run the controller (blocking) until shutdown or the command channel
    /// closes.
    #[instrument(name = "session_run", skip(self))]
    pub fn run(&mut self) {
        info!("Session controller starting");
        self.send_event(SessionEvent::Ready);

        loop {
            let keep_running = match self.next_input() {
                Input::Command(command) => self.handle_command(command),
                Input::CommandsClosed => {
                    info!("Command channel disconnected, shutting down");
                    self.stop_session();
                    false
                }
                Input::Transport(event) => {
                    self.dispatch(Trigger::Transport(event));
                    true
                }
                Input::Encoder(event) => {
                    self.handle_encoder_event(event);
                    true
                }
                Input::Reachability(signal) => {
                    self.handle_reachability(signal);
                    true
                }
                Input::SourceClosed(source) => {
                    warn!(source, "Event source disconnected");
                    true
                }
                Input::TelemetryTick => {
                    self.sample_telemetry();
                    true
                }
                Input::AdaptationTick => {
                    self.adapt_bitrate();
                    true
                }
                Input::ReconnectDue => {
                    self.reconnect_timer.cancel();
                    self.dispatch(Trigger::ReconnectDue);
                    true
                }
                Input::PublishDue => {
                    self.publish_timer.cancel();
                    self.dispatch(Trigger::PublishDue);
                    true
                }
                Input::PublishGraceExpired => {
                    self.grace_timer.cancel();
                    self.dispatch(Trigger::PublishGraceExpired);
                    true
                }
            };

            if !keep_running {
                break;
            }
        }

        info!("Session controller stopped");
    }

    fn next_input(&mut self) -> Input {
        let commands = self.command_rx.clone();
        let transport_events = self.transport_events.clone();
        let encoder_events = self.encoder_events.clone();
        let reachability = self.reachability.clone();
        let telemetry_tick = self.telemetry_ticker.receiver();
        let adaptation_tick = self.adaptation_ticker.receiver();
        let reconnect = self.reconnect_timer.receiver();
        let publish = self.publish_timer.receiver();
        let grace = self.grace_timer.receiver();

        let input = select! {
            recv(commands) -> msg => msg.map_or(Input::CommandsClosed, Input::Command),
            recv(transport_events) -> msg => msg.map_or(Input::SourceClosed("transport"), Input::Transport),
            recv(encoder_events) -> msg => msg.map_or(Input::SourceClosed("encoder"), Input::Encoder),
            recv(reachability) -> msg => msg.map_or(Input::SourceClosed("reachability"), Input::Reachability),
            recv(telemetry_tick) -> _ => Input::TelemetryTick,
            recv(adaptation_tick) -> _ => Input::AdaptationTick,
            recv(reconnect) -> _ => Input::ReconnectDue,
            recv(publish) -> _ => Input::PublishDue,
            recv(grace) -> _ => Input::PublishGraceExpired,
        };

        // A disconnected source would be ready forever; stop selecting on it.
        if let Input::SourceClosed(source) = input {
            match source {
                "transport" => self.transport_events = crossbeam_channel::never(),
                "encoder" => self.encoder_events = crossbeam_channel::never(),
                _ => self.reachability = crossbeam_channel::never(),
            }
        }
        input
    }

    /// Handle a command. Returns false if the controller should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            SessionCommand::Start {
                preset,
                destination,
            } => self.start_session(preset, destination),
            SessionCommand::Stop => self.stop_session(),
            SessionCommand::GetState => self.send_state(),
            SessionCommand::Shutdown => {
                self.stop_session();
                self.send_event(SessionEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "session_start", skip(self, preset, destination), fields(preset = %preset.name))]
    fn start_session(&mut self, preset: Preset, destination: Option<Destination>) {
        if self.session.as_ref().is_some_and(|s| s.state().is_active()) {
            debug!("Session already active, ignoring start command");
            return;
        }

        let destination = destination
            .or_else(|| self.destinations.destination())
            .unwrap_or_default();
        info!(server = %destination.server_url, "Starting session");

        self.cancel_timers();
        self.telemetry.reset();
        self.session = Some(Session {
            machine: ConnectionStateMachine::new(
                self.config.reconnect.clone(),
                self.config.publish_timeout,
            ),
            bitrate: BitrateController::new(&preset, &self.config.bitrate),
            preset,
            destination,
            health: None,
            attached: Vec::new(),
            last_bytes_sent: self.transport.statistics().bytes_sent,
            last_sample_at: Instant::now(),
        });

        let check = self.prepare_session();
        self.dispatch(Trigger::Start { check });

        if self.session.as_ref().is_some_and(|s| s.state().is_active()) {
            self.telemetry_ticker
                .start(self.config.timings.telemetry_interval);
            self.adaptation_ticker
                .start(self.config.timings.adaptation_interval);
        }
    }

    /// Validate the session inputs, configure the encoder and attach devices.
    fn prepare_session(&mut self) -> SessionResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        session
            .preset
            .validate()
            .map_err(SessionError::Configuration)?;
        session
            .destination
            .validate()
            .map_err(SessionError::Configuration)?;

        let encoder_config = VideoEncoderConfig::from_preset(&session.preset);
        if let Err(e) = self.encoder.configure(&encoder_config) {
            let message = e.to_string();
            send_event(
                &self.event_tx,
                SessionEvent::DeviceError {
                    device: DeviceKind::Encoder,
                    message: message.clone(),
                },
            );
            return Err(SessionError::Device(message));
        }

        if let Some(capture) = self.capture.as_deref_mut() {
            let report = attach_all(capture, &SESSION_DEVICES);
            for (device, error) in &report.failed {
                send_event(
                    &self.event_tx,
                    SessionEvent::DeviceError {
                        device: *device,
                        message: error.to_string(),
                    },
                );
            }
            session.attached = report.attached.clone();
            if report.is_total_failure() {
                return Err(SessionError::Device(
                    "no capture device could be attached".to_string(),
                ));
            }
        }

        Ok(())
    }

    #[instrument(name = "session_stop", skip(self))]
    fn stop_session(&mut self) {
        let Some(session) = self.session.as_ref() else {
            debug!("No session, ignoring stop command");
            return;
        };
        if !session.state().is_active() {
            debug!(state = session.state().name(), "Session not active, ignoring stop command");
            return;
        }

        let elapsed = self.telemetry.duration_at(Instant::now());
        self.dispatch(Trigger::Stop { elapsed });
    }

    /// Feed a trigger through the state machine and carry out the outcome.
    /// Failures raised while acting are fed back in order.
    fn dispatch(&mut self, trigger: Trigger) {
        let mut pending = VecDeque::from([trigger]);

        while let Some(trigger) = pending.pop_front() {
            let Some(session) = self.session.as_mut() else {
                debug!(trigger = trigger.name(), "No session, discarding trigger");
                return;
            };

            let Outcome {
                transition,
                actions,
            } = session.machine.handle(trigger);

            if let Some(transition) = transition {
                debug!(
                    previous = %transition.previous.name(),
                    current = %transition.current.name(),
                    "State transition"
                );
                send_state_change(&self.event_tx, transition.previous, transition.current);
            }

            for action in actions {
                if let Some(follow_up) = self.perform(action) {
                    pending.push_back(follow_up);
                }
            }

            if self.session.as_ref().is_some_and(|s| s.state().is_terminal()) {
                self.end_session();
            }
        }
    }

    fn perform(&mut self, action: Action) -> Option<Trigger> {
        let session = self.session.as_ref()?;
        let timings = &self.config.timings;

        match action {
            Action::Connect => match self.transport.connect(&session.destination.server_url) {
                Ok(()) => {}
                Err(e @ TransportError::InvalidUrl(_)) => {
                    return Some(Trigger::Rejected(SessionError::Configuration(e.to_string())));
                }
                Err(e) => {
                    warn!("Connect failed: {}", e);
                    return Some(Trigger::Transport(TransportEvent::ConnectFailed {
                        reason: e.to_string(),
                    }));
                }
            },
            Action::SchedulePublish => self.publish_timer.arm(timings.publish_delay),
            Action::RequestPublish => {
                if let Err(e) = self.transport.publish(&session.destination.stream_key) {
                    warn!("Publish request failed: {}", e);
                    return Some(Trigger::Transport(TransportEvent::IoError {
                        message: e.to_string(),
                    }));
                }
            }
            Action::ArmPublishGrace => self.grace_timer.arm(timings.publish_grace),
            Action::ScheduleReconnect(delay) => self.reconnect_timer.arm(delay),
            Action::CancelTimers => self.cancel_timers(),
            Action::ReleaseTransport => self.transport.close(),
            Action::PublishingStarted => {
                info!(bitrate_kbps = session.bitrate.current(), "Publishing");
                self.telemetry.start_at(Instant::now());
                let bytes_sent = self.transport.statistics().bytes_sent;
                if let Some(session) = self.session.as_mut() {
                    session.restart_sampling(bytes_sent);
                }
            }
        }
        None
    }

    /// Tear down everything a terminal session held.
    fn end_session(&mut self) {
        self.cancel_timers();
        self.telemetry_ticker.stop();
        self.adaptation_ticker.stop();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(capture) = self.capture.as_deref_mut() {
            detach_all(capture, &session.attached);
        }
        session.attached.clear();
        info!(state = %session.state().message(), "Session ended");
    }

    fn cancel_timers(&mut self) {
        self.reconnect_timer.cancel();
        self.publish_timer.cancel();
        self.grace_timer.cancel();
    }

    fn handle_encoder_event(&mut self, event: EncoderEvent) {
        match event {
            EncoderEvent::FramesDropped { count } => {
                if self.session.as_ref().is_some_and(|s| s.state().is_active()) {
                    self.telemetry.record_frame_drops(count);
                }
            }
        }
    }

    fn handle_reachability(&mut self, signal: Reachability) {
        match signal {
            Reachability::Unreachable => {
                if self.session.is_some() {
                    self.dispatch(Trigger::ReachabilityLost);
                }
            }
            Reachability::Reachable => debug!("Network reachable"),
        }
    }

    /// Sample transport counters, then report telemetry and health.
    fn sample_telemetry(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.state().is_active() {
            return;
        }

        let now = Instant::now();
        let stats = self.transport.statistics();
        let sent = stats.bytes_sent.saturating_sub(session.last_bytes_sent);
        let elapsed = now.saturating_duration_since(session.last_sample_at);
        session.last_bytes_sent = stats.bytes_sent;
        session.last_sample_at = now;

        self.telemetry.record_bytes_sent(sent);
        self.telemetry.record_bitrate(achieved_kbps(sent, elapsed));
        self.telemetry.record_queue_depth(stats.queue_depth);
        if let Some(rtt_ms) = stats.rtt_ms {
            self.telemetry.record_rtt(rtt_ms);
        }

        let snapshot = self.telemetry.snapshot_at(now);
        let health = health::estimate(&snapshot, &session.preset);
        if session.health != Some(health) {
            debug!(health = health.name(), "Network health changed");
        }
        session.health = Some(health);

        send_event(&self.event_tx, SessionEvent::Telemetry(snapshot));
        send_event(&self.event_tx, SessionEvent::Health(health));
    }

    /// Move the encoder target according to the latest health, while
    /// publishing. Health sampled before publishing began does not count.
    fn adapt_bitrate(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.state().is_publishing() {
            return;
        }

        let adjusted = match session.health {
            Some(NetworkHealth::Poor) => session.bitrate.adjust_down(),
            Some(NetworkHealth::Excellent | NetworkHealth::Good)
                if self.config.bitrate.allow_upscale =>
            {
                session.bitrate.adjust_up()
            }
            _ => None,
        };

        let Some(kbps) = adjusted else {
            return;
        };
        info!(kbps, "Adjusting bitrate");
        if let Err(e) = self.encoder.set_bitrate(kbps) {
            warn!("Encoder rejected bitrate: {}", e);
            send_event(
                &self.event_tx,
                SessionEvent::DeviceError {
                    device: DeviceKind::Encoder,
                    message: e.to_string(),
                },
            );
        }
        send_event(&self.event_tx, SessionEvent::BitrateChanged { kbps });
    }

    fn send_state(&self) {
        let state = self.state();
        send_state_change(&self.event_tx, state.clone(), state);
    }

    fn send_event(&self, event: SessionEvent) {
        send_event(&self.event_tx, event);
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if self.session.as_ref().is_some_and(|s| s.state().is_active()) {
            self.transport.close();
        }
    }
}

fn send_event(event_tx: &Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = event_tx.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}

/// State changes are never dropped; a full channel blocks the controller
/// until the observer catches up.
fn send_state_change(
    event_tx: &Sender<SessionEvent>,
    previous: SessionState,
    current: SessionState,
) {
    if event_tx
        .send(SessionEvent::StateChanged { previous, current })
        .is_err()
    {
        warn!("Event receiver gone, state change not delivered");
    }
}

/// Bitrate achieved by `bytes` over `elapsed`, in kbps.
fn achieved_kbps(bytes: u64, elapsed: Duration) -> u32 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        ((bytes * 8) as f64 / secs / 1000.0) as u32
    } else {
        0
    }
}
