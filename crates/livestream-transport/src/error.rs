//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server refused the connection request.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// RTMP handshake did not complete.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Invalid RTMP URL.
    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// Timed out waiting for the server.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RTMP protocol error.
    #[error("RTMP protocol error: {0}")]
    Protocol(String),
}
