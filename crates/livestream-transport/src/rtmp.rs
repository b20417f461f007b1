//! RTMP client adapter built on `rml_rtmp` and tokio.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::event::{Transport, TransportEvent, TransportStatistics};
use crate::{TransportResult, DEFAULT_RTMP_PORT, PACKET_CHANNEL_CAPACITY};

/// How long the server gets to accept the handshake and connect request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const READ_BUFFER_SIZE: usize = 4096;

/// A media packet to send over RTMP.
#[derive(Debug, Clone)]
pub struct RtmpPacket {
    /// FLV tag body.
    pub data: Bytes,

    /// Presentation timestamp in milliseconds.
    pub timestamp_ms: u32,

    /// Whether this is a video packet.
    pub is_video: bool,

    /// Whether this is a keyframe (for video).
    pub is_keyframe: bool,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    rtt_micros: AtomicU64,
}

enum Control {
    Publish(String),
}

/// Forwards status events while the owning connection is current.
#[derive(Clone)]
struct EventEmitter {
    tx: Sender<TransportEvent>,
    live: Arc<AtomicBool>,
}

impl EventEmitter {
    fn emit(&self, event: TransportEvent) {
        if !self.live.load(Ordering::SeqCst) {
            trace!(event = event.name(), "Dropping event from a released connection");
            return;
        }
        debug!(event = event.name(), "Transport event");
        let _ = self.tx.send(event);
    }
}

/// Host, port and application parsed from an ingest URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectTarget {
    host: String,
    port: u16,
    app: String,
}

impl ConnectTarget {
    fn parse(url: &str) -> TransportResult<Self> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "rtmp" && parsed.scheme() != "rtmps" {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp:// or rtmps://".to_string(),
            ));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_RTMP_PORT);
        let app = parsed.path().trim_matches('/').to_string();
        if app.is_empty() {
            return Err(TransportError::InvalidUrl(
                "Missing application name in URL path".to_string(),
            ));
        }

        Ok(Self { host, port, app })
    }
}

/// RTMP publish client.
///
/// Each `connect` spawns one connection task on an owned runtime. The media
/// packet queue outlives individual connections so producers keep a single
/// sender across reconnects.
pub struct RtmpTransport {
    events: Sender<TransportEvent>,
    runtime: Runtime,
    packet_tx: mpsc::Sender<RtmpPacket>,
    packet_rx: Arc<Mutex<mpsc::Receiver<RtmpPacket>>>,
    counters: Arc<Counters>,
    control: Option<mpsc::UnboundedSender<Control>>,
    live: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<()>>,
}

impl RtmpTransport {
    /// Create a transport that reports on `events`.
    pub fn new(events: Sender<TransportEvent>) -> TransportResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rtmp-transport")
            .enable_all()
            .build()?;
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);

        Ok(Self {
            events,
            runtime,
            packet_tx,
            packet_rx: Arc::new(Mutex::new(packet_rx)),
            counters: Arc::new(Counters::default()),
            control: None,
            live: None,
            task: None,
        })
    }

    /// Sender for encoded media. Packets queue until publishing starts.
    pub fn packet_sender(&self) -> mpsc::Sender<RtmpPacket> {
        self.packet_tx.clone()
    }
}

impl Transport for RtmpTransport {
    #[instrument(name = "rtmp_connect", skip(self))]
    fn connect(&mut self, url: &str) -> TransportResult<()> {
        ConnectTarget::parse(url)?;
        self.close();

        info!("Connecting to RTMP server");
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let live = Arc::new(AtomicBool::new(true));
        let emitter = EventEmitter {
            tx: self.events.clone(),
            live: Arc::clone(&live),
        };

        let task = self.runtime.spawn(run_connection(
            url.to_string(),
            emitter,
            control_rx,
            Arc::clone(&self.packet_rx),
            Arc::clone(&self.counters),
        ));

        self.control = Some(control_tx);
        self.live = Some(live);
        self.task = Some(task);
        Ok(())
    }

    fn publish(&mut self, stream_key: &str) -> TransportResult<()> {
        let control = self.control.as_ref().ok_or(TransportError::NotConnected)?;
        control
            .send(Control::Publish(stream_key.to_string()))
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self) {
        if let Some(live) = self.live.take() {
            live.store(false, Ordering::SeqCst);
        }
        self.control = None;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("RTMP connection released");
        }
    }

    fn statistics(&self) -> TransportStatistics {
        let rtt_micros = self.counters.rtt_micros.load(Ordering::Relaxed);
        TransportStatistics {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
            queue_depth: (PACKET_CHANNEL_CAPACITY - self.packet_tx.capacity()) as u64,
            rtt_ms: (rtt_micros > 0).then(|| rtt_micros as f64 / 1000.0),
        }
    }
}

impl Drop for RtmpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

enum Step {
    Control(Option<Control>),
    Read(std::io::Result<usize>),
    Packet(RtmpPacket),
}

async fn run_connection(
    url: String,
    events: EventEmitter,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    packets: Arc<Mutex<mpsc::Receiver<RtmpPacket>>>,
    counters: Arc<Counters>,
) {
    let mut connection = match RtmpConnection::open(&url, &counters).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!("RTMP connection attempt failed: {}", e);
            events.emit(TransportEvent::ConnectFailed {
                reason: e.to_string(),
            });
            return;
        }
    };

    info!("RTMP connection established");
    events.emit(TransportEvent::ConnectSuccess);

    let mut packets = packets.lock().await;
    let mut publishing = false;
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    let terminal = 'conn: loop {
        let step = tokio::select! {
            control = control_rx.recv() => Step::Control(control),
            read = connection.stream.read(&mut read_buf) => Step::Read(read),
            Some(packet) = packets.recv(), if publishing => Step::Packet(packet),
        };

        match step {
            Step::Control(None) => break 'conn None,
            Step::Control(Some(Control::Publish(key))) => {
                debug!("Requesting publish");
                if let Err(e) = connection.request_publish(&key).await {
                    break 'conn Some(io_error(e));
                }
            }
            Step::Read(Ok(0)) => break 'conn Some(TransportEvent::ConnectClosed),
            Step::Read(Err(e)) => break 'conn Some(io_error(e.into())),
            Step::Read(Ok(n)) => {
                let raised = match connection.process_input(&read_buf[..n]).await {
                    Ok(raised) => raised,
                    Err(e) => break 'conn Some(io_error(e)),
                };
                for status in raised.into_iter().filter_map(status_event) {
                    if status.is_connection_loss() {
                        break 'conn Some(status);
                    }
                    if status == TransportEvent::PublishStart {
                        info!("Publishing started");
                        publishing = true;
                    }
                    events.emit(status);
                }
            }
            Step::Packet(packet) => match connection.send_packet(&packet).await {
                Ok(()) => {
                    counters
                        .bytes_sent
                        .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
                    counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                    break 'conn Some(io_error(e));
                }
            },
        }
    };

    match terminal {
        Some(event) => events.emit(event),
        None => debug!("Connection task stopped by close"),
    }
}

fn io_error(error: TransportError) -> TransportEvent {
    warn!("RTMP connection error: {}", error);
    TransportEvent::IoError {
        message: error.to_string(),
    }
}

/// Maps server notifications onto the typed status contract.
fn status_event(event: ClientSessionEvent) -> Option<TransportEvent> {
    match event {
        ClientSessionEvent::PublishRequestAccepted => Some(TransportEvent::PublishStart),
        ClientSessionEvent::UnhandleableOnStatusCode { code } => match code.as_str() {
            "NetStream.Publish.BadName" => Some(TransportEvent::PublishBadName),
            "NetStream.Unpublish.Success" => Some(TransportEvent::UnpublishSuccess),
            "NetConnection.Connect.Closed" => Some(TransportEvent::ConnectClosed),
            other => {
                debug!(code = other, "Unhandled status code");
                None
            }
        },
        other => {
            trace!("Ignoring session event: {:?}", other);
            None
        }
    }
}

/// Established connection: socket plus protocol session.
struct RtmpConnection {
    stream: TcpStream,
    session: ClientSession,
}

impl RtmpConnection {
    /// TCP connect, handshake, and wait for the server to accept the
    /// application connect request.
    async fn open(url: &str, counters: &Counters) -> TransportResult<Self> {
        let target = ConnectTarget::parse(url)?;
        debug!(host = %target.host, port = target.port, app = %target.app, "Opening TCP connection");

        let mut stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("TCP connect failed: {e}")))?;
        stream.set_nodelay(true)?;

        let leftover = tokio::time::timeout(CONNECT_TIMEOUT, perform_handshake(&mut stream))
            .await
            .map_err(|_| TransportError::Timeout("handshake"))??;

        let (session, initial_results) = ClientSession::new(ClientSessionConfig::new())
            .map_err(|e| TransportError::Protocol(format!("Session creation failed: {e:?}")))?;
        let mut connection = Self { stream, session };
        connection.write_results(initial_results).await?;
        if !leftover.is_empty() {
            connection.process_input(&leftover).await?;
        }

        let request = connection
            .session
            .request_connection(target.app.clone())
            .map_err(|e| TransportError::Protocol(format!("Connection request failed: {e:?}")))?;
        connection.write_results(vec![request]).await?;

        let requested_at = Instant::now();
        tokio::time::timeout(CONNECT_TIMEOUT, connection.await_accept())
            .await
            .map_err(|_| TransportError::Timeout("connection acceptance"))??;
        counters
            .rtt_micros
            .store(requested_at.elapsed().as_micros() as u64, Ordering::Relaxed);

        Ok(connection)
    }

    async fn await_accept(&mut self) -> TransportResult<()> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::ConnectionFailed(
                    "Connection closed before connect was accepted".to_string(),
                ));
            }

            for event in self.process_input(&buf[..n]).await? {
                match event {
                    ClientSessionEvent::ConnectionRequestAccepted => {
                        debug!("Connection accepted by server");
                        return Ok(());
                    }
                    ClientSessionEvent::ConnectionRequestRejected { description } => {
                        return Err(TransportError::Rejected(description));
                    }
                    other => trace!("Received event during connect: {:?}", other),
                }
            }
        }
    }

    async fn request_publish(&mut self, stream_key: &str) -> TransportResult<()> {
        let request = self
            .session
            .request_publishing(stream_key.to_string(), PublishRequestType::Live)
            .map_err(|e| TransportError::Protocol(format!("Publish request failed: {e:?}")))?;
        self.write_results(vec![request]).await?;
        Ok(())
    }

    async fn process_input(&mut self, bytes: &[u8]) -> TransportResult<Vec<ClientSessionEvent>> {
        let results = self
            .session
            .handle_input(bytes)
            .map_err(|e| TransportError::Protocol(format!("Session input error: {e:?}")))?;
        self.write_results(results).await
    }

    async fn send_packet(&mut self, packet: &RtmpPacket) -> TransportResult<()> {
        let timestamp = RtmpTimestamp::new(packet.timestamp_ms);
        let result = if packet.is_video {
            // Inter frames may be dropped by the session under backpressure.
            self.session
                .publish_video_data(packet.data.clone(), timestamp, !packet.is_keyframe)
        } else {
            self.session
                .publish_audio_data(packet.data.clone(), timestamp, false)
        }
        .map_err(|e| TransportError::Protocol(format!("Failed to publish data: {e:?}")))?;

        self.write_results(vec![result]).await?;
        Ok(())
    }

    /// Writes outbound packets, returning any raised events.
    async fn write_results(
        &mut self,
        results: Vec<ClientSessionResult>,
    ) -> TransportResult<Vec<ClientSessionEvent>> {
        let mut raised = Vec::new();
        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    self.stream.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(event) => raised.push(event),
                _ => {}
            }
        }
        Ok(raised)
    }
}

/// Runs the client handshake, returning bytes received past its end.
async fn perform_handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);
    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Handshake(format!("{e:?}")))?;
    stream.write_all(&p0_p1).await?;

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Handshake(
                "Connection closed during handshake".to_string(),
            ));
        }

        match handshake
            .process_bytes(&buf[..n])
            .map_err(|e| TransportError::Handshake(format!("{e:?}")))?
        {
            HandshakeProcessResult::InProgress { response_bytes } => {
                stream.write_all(&response_bytes).await?;
            }
            HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            } => {
                stream.write_all(&response_bytes).await?;
                debug!("Handshake complete");
                return Ok(remaining_bytes);
            }
        }
    }
}
