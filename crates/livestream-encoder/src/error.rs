//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoder operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Encoder initialization failed.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Configuration the encoder cannot apply.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoder not configured.
    #[error("Encoder not configured")]
    NotConfigured,
}
