//! Error types for the session controller.

use livestream_transport::TransportError;
use thiserror::Error;

/// Errors that end or interrupt a publish session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Destination or preset unusable, or the server rejected the stream key.
    /// Never retried.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Transport-level failure. Retried with backoff.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reconnection gave up.
    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// No media source could be attached, or the encoder refused its setup.
    #[error("Device error: {0}")]
    Device(String),
}
