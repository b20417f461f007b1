//! Session controller behaviour against scripted collaborators.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use livestream_capture::{CaptureDevices, CaptureError, CaptureResult};
use livestream_encoder::{
    encoder_event_channel, EncoderEvent, EncoderResult, VideoEncoder, VideoEncoderConfig,
};
use livestream_engine::{
    reachability_channel, spawn_controller, Collaborators, DestinationProvider, EngineConfig,
    NoDestination, PublishTimeoutPolicy, Reachability, ReconnectPolicy, SessionTimings,
};
use livestream_ipc::{
    command_channel, event_channel, Destination, DeviceKind, Preset, SessionCommand,
    SessionEvent, SessionState,
};
use livestream_transport::{
    transport_event_channel, Transport, TransportError, TransportEvent, TransportResult,
    TransportStatistics,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

/// How the fake server answers.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Script {
    /// Accepts the connection and the publish.
    Accept,
    /// Accepts the connection, never acknowledges the publish.
    SilentPublish,
    /// Accepts the connection, rejects the stream key.
    RejectKey,
    /// Refuses every connection.
    Refuse,
    /// Accepts the first connection and publish, refuses every later one.
    AcceptOnce,
    /// Rejects the server URL before connecting.
    InvalidUrl,
}

/// Uplink behind the scripted transport. Bytes flow at `rate_kbps` while a
/// publish is accepted and stop when the connection is closed.
#[derive(Debug, Default)]
struct Link {
    rate_kbps: u64,
    rtt_ms: Option<f64>,
    sent_before: u64,
    streaming_since: Option<Instant>,
}

impl Link {
    fn new(rate_kbps: u64, rtt_ms: f64) -> Self {
        Self {
            rate_kbps,
            rtt_ms: Some(rtt_ms),
            ..Default::default()
        }
    }

    fn bytes_sent(&self) -> u64 {
        let streamed = self.streaming_since.map_or(0.0, |since| {
            since.elapsed().as_secs_f64() * self.rate_kbps as f64 * 1000.0 / 8.0
        });
        self.sent_before + streamed as u64
    }
}

#[derive(Debug, Default)]
struct Calls {
    connects: u32,
    closes: u32,
    urls: Vec<String>,
    keys: Vec<String>,
}

struct ScriptedTransport {
    script: Script,
    events: Sender<TransportEvent>,
    calls: Arc<Mutex<Calls>>,
    link: Mutex<Link>,
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, url: &str) -> TransportResult<()> {
        let mut calls = self.calls.lock();
        calls.connects += 1;
        calls.urls.push(url.to_string());

        let event = match self.script {
            Script::InvalidUrl => {
                return Err(TransportError::InvalidUrl(
                    "Missing application name in URL path".to_string(),
                ))
            }
            Script::Refuse => TransportEvent::ConnectFailed {
                reason: "connection refused".to_string(),
            },
            Script::AcceptOnce if calls.connects > 1 => TransportEvent::ConnectFailed {
                reason: "connection refused".to_string(),
            },
            _ => TransportEvent::ConnectSuccess,
        };
        let _ = self.events.send(event);
        Ok(())
    }

    fn publish(&mut self, stream_key: &str) -> TransportResult<()> {
        self.calls.lock().keys.push(stream_key.to_string());
        match self.script {
            Script::Accept | Script::AcceptOnce => {
                self.link.lock().streaming_since.get_or_insert_with(Instant::now);
                let _ = self.events.send(TransportEvent::PublishStart);
            }
            Script::RejectKey => {
                let _ = self.events.send(TransportEvent::PublishBadName);
            }
            Script::SilentPublish | Script::Refuse | Script::InvalidUrl => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        self.calls.lock().closes += 1;
        let mut link = self.link.lock();
        link.sent_before = link.bytes_sent();
        link.streaming_since = None;
    }

    fn statistics(&self) -> TransportStatistics {
        let link = self.link.lock();
        TransportStatistics {
            bytes_sent: link.bytes_sent(),
            rtt_ms: link.rtt_ms,
            ..Default::default()
        }
    }
}

struct RecordingEncoder {
    bitrates: Arc<Mutex<Vec<u32>>>,
}

impl VideoEncoder for RecordingEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> EncoderResult<()> {
        self.bitrates.lock().push(config.bitrate_kbps);
        Ok(())
    }

    fn set_bitrate(&mut self, kbps: u32) -> EncoderResult<()> {
        self.bitrates.lock().push(kbps);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct FakeCapture {
    unavailable: Vec<DeviceKind>,
    log: Arc<Mutex<Vec<String>>>,
}

impl CaptureDevices for FakeCapture {
    fn attach(&mut self, kind: DeviceKind) -> CaptureResult<()> {
        if self.unavailable.contains(&kind) {
            return Err(CaptureError::PermissionDenied(kind.name().to_string()));
        }
        self.log.lock().push(format!("attach {}", kind.name()));
        Ok(())
    }

    fn detach(&mut self, kind: DeviceKind) {
        self.log.lock().push(format!("detach {}", kind.name()));
    }
}

struct Harness {
    commands: Sender<SessionCommand>,
    events: Receiver<SessionEvent>,
    transport_events: Sender<TransportEvent>,
    encoder_events: Sender<EncoderEvent>,
    reachability: Sender<Reachability>,
    calls: Arc<Mutex<Calls>>,
    bitrates: Arc<Mutex<Vec<u32>>>,
    capture_log: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

struct Setup {
    script: Script,
    link: Link,
    config: EngineConfig,
    unavailable_devices: Option<Vec<DeviceKind>>,
    destinations: Box<dyn DestinationProvider>,
}

impl Setup {
    fn new(script: Script) -> Self {
        Self {
            script,
            link: Link::default(),
            config: fast_config(),
            unavailable_devices: None,
            destinations: Box::new(NoDestination),
        }
    }

    fn spawn(self) -> Harness {
        let (command_tx, command_rx) = command_channel();
        let (event_tx, event_rx) = event_channel();
        let (transport_tx, transport_rx) = transport_event_channel();
        let (encoder_tx, encoder_rx) = encoder_event_channel();
        let (reachability_tx, reachability_rx) = reachability_channel();

        let calls = Arc::new(Mutex::new(Calls::default()));
        let bitrates = Arc::new(Mutex::new(Vec::new()));
        let capture_log = Arc::new(Mutex::new(Vec::new()));

        let capture = self.unavailable_devices.map(|unavailable| {
            Box::new(FakeCapture {
                unavailable,
                log: Arc::clone(&capture_log),
            }) as Box<dyn CaptureDevices>
        });

        let collaborators = Collaborators {
            transport: Box::new(ScriptedTransport {
                script: self.script,
                events: transport_tx.clone(),
                calls: Arc::clone(&calls),
                link: Mutex::new(self.link),
            }),
            transport_events: transport_rx,
            encoder: Box::new(RecordingEncoder {
                bitrates: Arc::clone(&bitrates),
            }),
            encoder_events: encoder_rx,
            capture,
            destinations: self.destinations,
            reachability: reachability_rx,
        };

        let handle = spawn_controller(self.config, command_rx, event_tx, collaborators).unwrap();

        let harness = Harness {
            commands: command_tx,
            events: event_rx,
            transport_events: transport_tx,
            encoder_events: encoder_tx,
            reachability: reachability_tx,
            calls,
            bitrates,
            capture_log,
            handle: Some(handle),
        };
        harness.wait_for(|e| matches!(e, SessionEvent::Ready));
        harness
    }
}

impl Harness {
    fn send(&self, command: SessionCommand) {
        self.commands.send(command).unwrap();
    }

    fn start(&self, destination: Option<Destination>) {
        self.send(SessionCommand::Start {
            preset: Preset::street(),
            destination,
        });
    }

    fn start_default(&self) {
        self.start(Some(destination()));
    }

    fn wait_for(&self, mut wanted: impl FnMut(&SessionEvent) -> bool) -> SessionEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) if wanted(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for event"),
            }
        }
    }

    fn wait_for_state(&self, wanted: impl Fn(&SessionState) -> bool) -> SessionState {
        match self.wait_for(|e| matches!(e, SessionEvent::StateChanged { current, .. } if wanted(current)))
        {
            SessionEvent::StateChanged { current, .. } => current,
            _ => unreachable!(),
        }
    }

    /// States entered until one matches `last`, inclusive.
    fn states_until(&self, last: impl Fn(&SessionState) -> bool) -> Vec<SessionState> {
        let mut states = Vec::new();
        self.wait_for(|e| match e {
            SessionEvent::StateChanged { current, .. } => {
                states.push(current.clone());
                last(current)
            }
            _ => false,
        });
        states
    }

    /// Ask the controller for its state and return the reply.
    fn query_state(&self) -> SessionState {
        self.send(SessionCommand::GetState);
        match self.wait_for(|e| {
            matches!(e, SessionEvent::StateChanged { previous, current } if previous == current)
        }) {
            SessionEvent::StateChanged { current, .. } => current,
            _ => unreachable!(),
        }
    }

    /// Every event received during `window`.
    fn events_for(&self, window: Duration) -> Vec<SessionEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(event) = self.events.recv_deadline(deadline) {
            events.push(event);
        }
        events
    }

    fn connects(&self) -> u32 {
        self.calls.lock().connects
    }
}

fn bitrate_changes(events: &[SessionEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::BitrateChanged { kbps } => Some(*kbps),
            _ => None,
        })
        .collect()
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
        // State changes block on a full channel; drain until the thread exits.
        let deadline = Instant::now() + WAIT;
        while let Ok(event) = self.events.recv_deadline(deadline) {
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 10,
            floor: ms(5),
            cap: ms(20),
        },
        timings: SessionTimings {
            telemetry_interval: ms(10),
            adaptation_interval: ms(30),
            publish_delay: ms(5),
            publish_grace: ms(60),
        },
        ..Default::default()
    }
}

fn destination() -> Destination {
    Destination::new("rtmp://ingest.test/live", "abc123")
}

#[test]
fn empty_stream_key_fails_without_connecting() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start(Some(Destination::new("rtmp://ingest.test/live", "")));

    let state = harness.wait_for_state(SessionState::is_terminal);
    assert_eq!(
        state,
        SessionState::Failed {
            reason: "Invalid configuration: stream key is empty".to_string()
        }
    );
    assert_eq!(harness.connects(), 0);
}

#[test]
fn publishes_and_lowers_bitrate_on_poor_health() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();

    let states = harness.states_until(SessionState::is_publishing);
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Publishing
        ]
    );

    // No bytes leave the scripted transport, so health reads poor.
    harness.wait_for(|e| matches!(e, SessionEvent::Health(h) if h.name() == "Poor"));
    harness.wait_for(|e| matches!(e, SessionEvent::BitrateChanged { kbps: 2125 }));

    assert_eq!(harness.bitrates.lock()[..2], [2500, 2125]);
    let calls = harness.calls.lock();
    assert_eq!(calls.urls, vec!["rtmp://ingest.test/live".to_string()]);
    assert_eq!(calls.keys, vec!["abc123".to_string()]);
}

#[test]
fn refused_connections_exhaust_reconnect_budget() {
    let harness = Setup::new(Script::Refuse).spawn();
    harness.start_default();

    let states = harness.states_until(SessionState::is_terminal);
    let attempts: Vec<u32> = states.iter().filter_map(SessionState::attempt).collect();
    assert_eq!(attempts, (1..=10).collect::<Vec<_>>());
    assert_eq!(harness.connects(), 11);
}

#[test]
fn failures_after_publishing_exhaust_reconnect_budget() {
    let harness = Setup::new(Script::AcceptOnce).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    harness
        .transport_events
        .send(TransportEvent::ConnectClosed)
        .unwrap();

    let states = harness.states_until(SessionState::is_terminal);
    let attempts: Vec<u32> = states.iter().filter_map(SessionState::attempt).collect();
    assert_eq!(attempts, (1..=10).collect::<Vec<_>>());
    assert_eq!(
        states.last(),
        Some(&SessionState::Failed {
            reason: "Reconnection failed after 10 attempts".to_string()
        })
    );
    assert_eq!(harness.connects(), 11);
}

#[test]
fn stop_while_reconnecting_cancels_pending_connect() {
    let mut setup = Setup::new(Script::Refuse);
    setup.config.reconnect.floor = ms(300);
    let harness = setup.spawn();
    harness.start_default();

    harness.wait_for_state(|s| s.attempt() == Some(1));
    harness.send(SessionCommand::Stop);
    assert_eq!(
        harness.wait_for_state(SessionState::is_terminal),
        SessionState::Ended {
            duration: Duration::ZERO
        }
    );

    thread::sleep(ms(500));
    assert_eq!(harness.connects(), 1);
    assert!(harness.events.try_iter().all(|e| !matches!(
        e,
        SessionEvent::StateChanged {
            current: SessionState::Connecting,
            ..
        }
    )));
}

#[test]
fn reachability_loss_reconnects_and_recovers() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    harness.reachability.send(Reachability::Unreachable).unwrap();
    harness.wait_for_state(|s| s.attempt() == Some(1));
    assert!(harness.calls.lock().closes >= 1);

    harness.wait_for_state(SessionState::is_publishing);
    assert_eq!(harness.connects(), 2);
}

#[test]
fn events_after_stop_are_discarded() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    harness.send(SessionCommand::Stop);
    let ended = harness.wait_for_state(SessionState::is_terminal);
    assert!(matches!(ended, SessionState::Ended { .. }));

    harness
        .transport_events
        .send(TransportEvent::ConnectClosed)
        .unwrap();
    harness
        .transport_events
        .send(TransportEvent::ConnectSuccess)
        .unwrap();
    harness.reachability.send(Reachability::Unreachable).unwrap();

    assert_eq!(harness.query_state(), ended);
    assert_eq!(harness.connects(), 1);
}

#[test]
fn unacknowledged_publish_reconnects_by_default() {
    let harness = Setup::new(Script::SilentPublish).spawn();
    harness.start_default();

    harness.wait_for_state(|s| *s == SessionState::Connected);
    harness.wait_for_state(|s| s.attempt() == Some(1));
}

#[test]
fn unacknowledged_publish_can_be_assumed() {
    let mut setup = Setup::new(Script::SilentPublish);
    setup.config.publish_timeout = PublishTimeoutPolicy::AssumePublishing;
    let harness = setup.spawn();
    harness.start_default();

    let states = harness.states_until(|s| s.is_publishing() || s.attempt().is_some());
    assert_eq!(states.last(), Some(&SessionState::Publishing));
}

#[test]
fn rejected_stream_key_fails_without_retry() {
    let harness = Setup::new(Script::RejectKey).spawn();
    harness.start_default();

    let state = harness.wait_for_state(SessionState::is_terminal);
    assert_eq!(
        state,
        SessionState::Failed {
            reason: "Invalid configuration: stream key rejected by server".to_string()
        }
    );
    thread::sleep(ms(50));
    assert_eq!(harness.connects(), 1);
}

#[test]
fn duplicate_start_is_ignored() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    harness.start_default();
    assert_eq!(harness.query_state(), SessionState::Publishing);
    assert_eq!(harness.connects(), 1);
}

#[test]
fn new_start_after_end_runs_fresh_session() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);
    harness.send(SessionCommand::Stop);
    harness.wait_for_state(SessionState::is_terminal);

    harness.start_default();
    let states = harness.states_until(SessionState::is_publishing);
    assert_eq!(states.first(), Some(&SessionState::Connecting));
    assert_eq!(harness.connects(), 2);
}

#[test]
fn destination_comes_from_provider() {
    let mut setup = Setup::new(Script::Accept);
    setup.destinations = Box::new(destination());
    let harness = setup.spawn();

    harness.start(None);
    harness.wait_for_state(SessionState::is_publishing);
    assert_eq!(harness.calls.lock().keys, vec!["abc123".to_string()]);
}

#[test]
fn missing_destination_fails() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start(None);

    let state = harness.wait_for_state(SessionState::is_terminal);
    assert_eq!(
        state,
        SessionState::Failed {
            reason: "Invalid configuration: server URL is empty".to_string()
        }
    );
}

#[test]
fn devices_attach_on_start_and_detach_on_stop() {
    let mut setup = Setup::new(Script::Accept);
    setup.unavailable_devices = Some(vec![DeviceKind::Microphone]);
    let harness = setup.spawn();
    harness.start_default();

    harness.wait_for(|e| {
        matches!(
            e,
            SessionEvent::DeviceError {
                device: DeviceKind::Microphone,
                ..
            }
        )
    });
    harness.wait_for_state(SessionState::is_publishing);
    harness.send(SessionCommand::Stop);
    harness.wait_for_state(SessionState::is_terminal);

    harness.query_state();
    assert_eq!(
        *harness.capture_log.lock(),
        vec!["attach camera".to_string(), "detach camera".to_string()]
    );
}

#[test]
fn no_attachable_device_fails_session() {
    let mut setup = Setup::new(Script::Accept);
    setup.unavailable_devices = Some(vec![DeviceKind::Camera, DeviceKind::Microphone]);
    let harness = setup.spawn();
    harness.start_default();

    let state = harness.wait_for_state(SessionState::is_terminal);
    assert_eq!(
        state,
        SessionState::Failed {
            reason: "Device error: no capture device could be attached".to_string()
        }
    );
    assert_eq!(harness.connects(), 0);
}

#[test]
fn encoder_drops_show_in_telemetry() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    harness
        .encoder_events
        .send(EncoderEvent::FramesDropped { count: 3 })
        .unwrap();
    harness.wait_for(|e| matches!(e, SessionEvent::Telemetry(t) if t.dropped_frames == 3));
}

#[test]
fn destination_without_application_fails_without_connecting() {
    let harness = Setup::new(Script::Accept).spawn();
    harness.start(Some(Destination::from_full_url("rtmp://127.0.0.1/abc123")));

    let state = harness.wait_for_state(SessionState::is_terminal);
    assert_eq!(
        state,
        SessionState::Failed {
            reason: "Invalid configuration: server URL has no application path".to_string()
        }
    );
    assert_eq!(harness.connects(), 0);
}

#[test]
fn url_rejected_by_transport_is_not_retried() {
    let harness = Setup::new(Script::InvalidUrl).spawn();
    harness.start_default();

    let states = harness.states_until(SessionState::is_terminal);
    assert_eq!(
        states,
        vec![
            SessionState::Connecting,
            SessionState::Failed {
                reason: concat!(
                    "Invalid configuration: Invalid RTMP URL: ",
                    "Missing application name in URL path"
                )
                .to_string()
            }
        ]
    );
    thread::sleep(ms(50));
    assert_eq!(harness.connects(), 1);
}

#[test]
fn healthy_link_raises_bitrate() {
    let mut setup = Setup::new(Script::Accept);
    setup.link = Link::new(3000, 50.0);
    let harness = setup.spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);

    let raised =
        harness.wait_for(|e| matches!(e, SessionEvent::BitrateChanged { kbps } if *kbps > 2500));
    assert!(matches!(raised, SessionEvent::BitrateChanged { kbps: 2875 | 3000 }));
    assert!(harness.bitrates.lock().contains(&2875));
}

#[test]
fn fair_link_holds_bitrate() {
    let mut setup = Setup::new(Script::Accept);
    setup.link = Link::new(3000, 350.0);
    let harness = setup.spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);
    harness.wait_for(|e| matches!(e, SessionEvent::Health(h) if h.name() == "Fair"));

    let events = harness.events_for(ms(200));
    assert!(bitrate_changes(&events).is_empty());
    assert_eq!(*harness.bitrates.lock(), vec![2500]);
}

#[test]
fn upscale_can_be_disabled() {
    let mut setup = Setup::new(Script::Accept);
    setup.link = Link::new(3000, 50.0);
    setup.config.bitrate.allow_upscale = false;
    let harness = setup.spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);
    harness.wait_for(|e| matches!(e, SessionEvent::Health(h) if h.name() == "Excellent"));

    let events = harness.events_for(ms(200));
    assert!(bitrate_changes(&events).is_empty());
    assert_eq!(*harness.bitrates.lock(), vec![2500]);
}

#[test]
fn outage_health_does_not_lower_bitrate_after_republish() {
    let mut setup = Setup::new(Script::Accept);
    setup.link = Link::new(3000, 50.0);
    // Adaptation runs several times between telemetry samples.
    setup.config.timings.telemetry_interval = ms(40);
    setup.config.timings.adaptation_interval = ms(10);
    setup.config.reconnect.floor = ms(200);
    setup.config.reconnect.cap = ms(200);
    let harness = setup.spawn();
    harness.start_default();
    harness.wait_for_state(SessionState::is_publishing);
    harness.wait_for(|e| matches!(e, SessionEvent::BitrateChanged { kbps: 3000 }));

    harness.reachability.send(Reachability::Unreachable).unwrap();
    harness.wait_for_state(|s| s.attempt() == Some(1));
    harness.wait_for(|e| matches!(e, SessionEvent::Health(h) if h.name() == "Poor"));

    harness.wait_for_state(SessionState::is_publishing);
    let events = harness.events_for(ms(100));
    assert!(bitrate_changes(&events).iter().all(|kbps| *kbps >= 3000));
    assert!(!harness.bitrates.lock().contains(&2550));
}
