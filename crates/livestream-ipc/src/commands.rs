//! Commands sent to the session controller.

use serde::{Deserialize, Serialize};

use crate::types::{Destination, Preset};

/// Commands that a driver can send to the session controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Start a publish session with the given preset.
    ///
    /// When `destination` is `None` the controller asks its injected
    /// destination provider.
    Start {
        preset: Preset,
        destination: Option<Destination>,
    },

    /// Stop the current session.
    Stop,

    /// Request the current session state.
    GetState,

    /// Stop any session and shut the controller down.
    Shutdown,
}
