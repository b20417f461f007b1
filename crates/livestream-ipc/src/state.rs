//! Publish session state machine types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The lifecycle state of one publish session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session started yet.
    #[default]
    Idle,

    /// Waiting for the transport to accept the connection.
    Connecting,

    /// Connected, publish requested but not yet acknowledged.
    Connected,

    /// Media is being published.
    Publishing,

    /// Waiting for the backoff timer before the next connect.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },

    /// Terminal failure.
    Failed {
        /// Human-readable reason.
        reason: String,
    },

    /// Terminal, stopped by the user.
    Ended {
        /// Time elapsed since publishing first began.
        duration: Duration,
    },
}

impl SessionState {
    /// Returns true if no session has been started.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while the session owns a transport (or is about to).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Publishing | Self::Reconnecting { .. }
        )
    }

    /// Returns true for `Failed` and `Ended`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Ended { .. })
    }

    /// Returns true while media is being published.
    pub fn is_publishing(&self) -> bool {
        matches!(self, Self::Publishing)
    }

    /// Returns the reconnect attempt number, if reconnecting.
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::Reconnecting { attempt } => Some(*attempt),
            _ => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Publishing => "Publishing",
            Self::Reconnecting { .. } => "Reconnecting",
            Self::Failed { .. } => "Failed",
            Self::Ended { .. } => "Ended",
        }
    }

    /// Returns a status message for display.
    pub fn message(&self) -> String {
        match self {
            Self::Idle => "Ready".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected => "Connected, starting stream...".to_string(),
            Self::Publishing => "Live".to_string(),
            Self::Reconnecting { attempt } => format!("Reconnecting... (attempt {attempt})"),
            Self::Failed { reason } => format!("Error: {reason}"),
            Self::Ended { duration } => format!("Ended ({})", format_duration(*duration)),
        }
    }
}

/// Formats as `m:ss`, or `h:mm:ss` past the hour.
fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = total / 60 % 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
