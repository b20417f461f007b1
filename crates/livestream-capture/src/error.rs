//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur while attaching capture devices.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No device of the requested kind exists.
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    /// The user or platform denied access.
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    /// Device is held by another client.
    #[error("Device busy: {0}")]
    Busy(String),

    /// Device disappeared while attached.
    #[error("Capture device lost")]
    DeviceLost,
}
