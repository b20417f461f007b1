//! Typed controller<->observer messages for the live publisher.
//!
//! This crate defines the values exchanged between the session controller
//! and whatever drives or observes it: commands in, events out, plus the
//! shared model types (presets, destinations, telemetry snapshots).

mod commands;
mod events;
mod state;
mod types;

pub use commands::SessionCommand;
pub use events::SessionEvent;
pub use state::SessionState;
pub use types::{Destination, DeviceKind, NetworkHealth, Preset, TelemetrySnapshot};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (driver → controller).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (controller → observer).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<SessionCommand>, Receiver<SessionCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
