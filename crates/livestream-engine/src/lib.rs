//! Publish session controller.
//!
//! This crate turns user intent (start, stop) and collaborator signals
//! (transport status, reachability, encoder drops) into a single ordered
//! stream of session state changes, reconnecting with backoff and adapting
//! the encoder bitrate to observed network health.

mod bitrate;
mod config;
mod connection;
mod error;
pub mod health;
mod metrics;
mod orchestrator;
mod reconnect;
mod timer;

pub use bitrate::BitrateController;
pub use config::{
    BitratePolicy, DestinationProvider, EngineConfig, NoDestination, PublishTimeoutPolicy,
    SessionTimings,
};
pub use connection::{Action, ConnectionStateMachine, Outcome, Transition, Trigger};
pub use error::SessionError;
pub use metrics::TelemetryAggregator;
pub use orchestrator::{reachability_channel, Collaborators, Reachability, SessionOrchestrator};
pub use reconnect::{ReconnectPolicy, ReconnectScheduler};
pub use timer::{OneShotTimer, Ticker};

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use livestream_ipc::{SessionCommand, SessionEvent};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Create a session controller wired to IPC channels.
pub fn create_controller(
    config: EngineConfig,
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    collaborators: Collaborators,
) -> SessionOrchestrator {
    SessionOrchestrator::new(config, command_rx, event_tx, collaborators)
}

/// Run a session controller on its own thread.
pub fn spawn_controller(
    config: EngineConfig,
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    collaborators: Collaborators,
) -> std::io::Result<JoinHandle<()>> {
    let mut controller = create_controller(config, command_rx, event_tx, collaborators);
    thread::Builder::new()
        .name("session".to_string())
        .spawn(move || controller.run())
}
