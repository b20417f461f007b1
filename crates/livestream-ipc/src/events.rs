//! Events sent from the session controller to observers.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{DeviceKind, NetworkHealth, TelemetrySnapshot};

/// Events that the controller emits. Observers are pure sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// Periodic telemetry sample.
    Telemetry(TelemetrySnapshot),

    /// Advisory network health, recomputed on every sampling tick.
    Health(NetworkHealth),

    /// The target bitrate pushed to the encoder changed.
    BitrateChanged {
        /// New target in kbps.
        kbps: u32,
    },

    /// A capture device or the encoder reported a failure.
    DeviceError {
        /// Device concerned.
        device: DeviceKind,

        /// Error message.
        message: String,
    },

    /// Controller is ready to accept commands.
    Ready,

    /// Controller has shut down.
    Shutdown,
}
