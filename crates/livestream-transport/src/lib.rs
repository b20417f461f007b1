//! RTMP transport contract and client adapter.
//!
//! The session controller never touches sockets. It drives a [`Transport`]
//! (`connect`, `publish`, `close`) and consumes the closed set of
//! [`TransportEvent`]s the transport emits on its event channel.

mod error;
mod event;
mod rtmp;

pub use error::TransportError;
pub use event::{transport_event_channel, Transport, TransportEvent, TransportStatistics};
pub use rtmp::{RtmpPacket, RtmpTransport};

/// Channel capacity for outgoing media packets.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// Default RTMP port when the URL carries none.
pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
