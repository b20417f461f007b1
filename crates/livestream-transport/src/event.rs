//! Transport contract: typed status events and the client-side operations.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::TransportResult;

/// Status events a transport reports asynchronously.
///
/// A transport emits at most one terminal event (`ConnectClosed`,
/// `ConnectFailed` or `IoError`) per `connect` call, and nothing after
/// `close`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// Connection handshake accepted by the server.
    ConnectSuccess,

    /// Server or network closed an established connection.
    ConnectClosed,

    /// Connection attempt failed.
    ConnectFailed { reason: String },

    /// Server acknowledged the publish request.
    PublishStart,

    /// Server rejected the stream key.
    PublishBadName,

    /// Server ended the publish.
    UnpublishSuccess,

    /// Socket-level failure on an established connection.
    IoError { message: String },
}

impl TransportEvent {
    /// Returns true for events that end the current connection.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ConnectClosed
                | Self::ConnectFailed { .. }
                | Self::IoError { .. }
                | Self::UnpublishSuccess
        )
    }

    /// Returns a simple string representation of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectSuccess => "ConnectSuccess",
            Self::ConnectClosed => "ConnectClosed",
            Self::ConnectFailed { .. } => "ConnectFailed",
            Self::PublishStart => "PublishStart",
            Self::PublishBadName => "PublishBadName",
            Self::UnpublishSuccess => "UnpublishSuccess",
            Self::IoError { .. } => "IoError",
        }
    }
}

/// Transport counters sampled by the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStatistics {
    /// Payload bytes written since the transport was created.
    pub bytes_sent: u64,

    /// Media packets written.
    pub packets_sent: u64,

    /// Media packets discarded because the connection failed mid-write.
    pub packets_dropped: u64,

    /// Packets waiting in the outbound queue.
    pub queue_depth: u64,

    /// Last round-trip estimate in milliseconds, if one was measured.
    pub rtt_ms: Option<f64>,
}

/// Client side of an RTMP publish connection.
///
/// Calls return quickly; progress is reported through the event channel
/// handed to the implementation at construction.
pub trait Transport: Send {
    /// Begin connecting to `url`, replacing any existing connection.
    fn connect(&mut self, url: &str) -> TransportResult<()>;

    /// Request publishing on the current connection.
    fn publish(&mut self, stream_key: &str) -> TransportResult<()>;

    /// Release the connection. No events are emitted afterwards.
    fn close(&mut self);

    /// Current counters.
    fn statistics(&self) -> TransportStatistics;
}

/// Creates the channel a transport reports on.
///
/// Unbounded: status events must never be dropped or coalesced.
pub fn transport_event_channel() -> (Sender<TransportEvent>, Receiver<TransportEvent>) {
    crossbeam_channel::unbounded()
}
