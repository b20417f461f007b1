//! Publish session state machine.
//!
//! Pure: the machine consumes [`Trigger`]s and answers with the state change
//! and the side effects to perform. The orchestrator owns the transport and
//! the timers and carries out the returned [`Action`]s in order.

use std::time::Duration;

use livestream_ipc::SessionState;
use livestream_transport::TransportEvent;
use tracing::{debug, error, info, warn};

use crate::config::PublishTimeoutPolicy;
use crate::error::SessionError;
use crate::reconnect::{ReconnectPolicy, ReconnectScheduler};

/// Inputs to the state machine.
#[derive(Debug)]
pub enum Trigger {
    /// User start. `check` carries the outcome of destination, preset and
    /// device validation.
    Start { check: Result<(), SessionError> },

    /// Status event from the transport.
    Transport(TransportEvent),

    /// Reachability monitor reported the network gone.
    ReachabilityLost,

    /// Reconnect backoff elapsed.
    ReconnectDue,

    /// Post-connect delay elapsed; time to request publishing.
    PublishDue,

    /// Publish request went unacknowledged for the grace window.
    PublishGraceExpired,

    /// User stop, with the time streamed so far.
    Stop { elapsed: Duration },

    /// A collaborator refused the session outright; retrying cannot help.
    Rejected(SessionError),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "Start",
            Self::Transport(event) => event.name(),
            Self::ReachabilityLost => "ReachabilityLost",
            Self::ReconnectDue => "ReconnectDue",
            Self::PublishDue => "PublishDue",
            Self::PublishGraceExpired => "PublishGraceExpired",
            Self::Stop { .. } => "Stop",
            Self::Rejected(_) => "Rejected",
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Issue `connect` on the transport.
    Connect,

    /// Arm the post-connect publish delay.
    SchedulePublish,

    /// Issue `publish` on the transport.
    RequestPublish,

    /// Arm the publish acknowledgement window.
    ArmPublishGrace,

    /// Arm the reconnect timer, replacing any pending one.
    ScheduleReconnect(Duration),

    /// Disarm reconnect and publish timers.
    CancelTimers,

    /// Close the transport connection.
    ReleaseTransport,

    /// Streaming began; start the session clock if not yet running.
    PublishingStarted,
}

/// A state change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub previous: SessionState,
    pub current: SessionState,
}

/// Result of handling one trigger.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub transition: Option<Transition>,
    pub actions: Vec<Action>,
}

impl Outcome {
    /// True when the trigger changed nothing.
    pub fn is_ignored(&self) -> bool {
        self.transition.is_none() && self.actions.is_empty()
    }
}

/// State machine for one publish session.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: SessionState,
    reconnect: ReconnectScheduler,
    publish_timeout: PublishTimeoutPolicy,
}

impl ConnectionStateMachine {
    pub fn new(reconnect: ReconnectPolicy, publish_timeout: PublishTimeoutPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            reconnect: ReconnectScheduler::new(reconnect),
            publish_timeout,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Failures counted since the last publish start.
    pub fn attempts(&self) -> u32 {
        self.reconnect.attempts()
    }

    /// Delay the next reconnect would wait.
    pub fn current_backoff(&self) -> Duration {
        self.reconnect.current_delay()
    }

    /// Feed one trigger through the machine.
    pub fn handle(&mut self, trigger: Trigger) -> Outcome {
        let name = trigger.name();
        if self.state.is_terminal() {
            return self.ignore(name);
        }

        match trigger {
            Trigger::Start { check } => self.on_start(check),
            Trigger::Transport(event) => self.on_transport(event),
            Trigger::ReachabilityLost => self.on_connection_loss(name, "network unreachable"),
            Trigger::ReconnectDue => match self.state {
                SessionState::Reconnecting { attempt } => {
                    info!(attempt, "Reconnecting");
                    self.move_to(SessionState::Connecting, vec![Action::Connect])
                }
                _ => self.ignore(name),
            },
            Trigger::PublishDue => match self.state {
                SessionState::Connected => Outcome {
                    transition: None,
                    actions: vec![Action::RequestPublish, Action::ArmPublishGrace],
                },
                _ => self.ignore(name),
            },
            Trigger::PublishGraceExpired => match (&self.state, self.publish_timeout) {
                (SessionState::Connected, PublishTimeoutPolicy::Reconnect) => {
                    self.on_connection_loss(name, "publish not acknowledged")
                }
                (SessionState::Connected, PublishTimeoutPolicy::AssumePublishing) => {
                    warn!("Publish not acknowledged, assuming the server accepts media");
                    self.enter_publishing()
                }
                _ => self.ignore(name),
            },
            Trigger::Stop { elapsed } => {
                if !self.state.is_active() {
                    return self.ignore(name);
                }
                info!(?elapsed, "Session stopped");
                self.move_to(
                    SessionState::Ended { duration: elapsed },
                    vec![Action::CancelTimers, Action::ReleaseTransport],
                )
            }
            Trigger::Rejected(error) => {
                if !self.state.is_active() {
                    return self.ignore(name);
                }
                self.fail(error)
            }
        }
    }

    fn on_start(&mut self, check: Result<(), SessionError>) -> Outcome {
        if !self.state.is_idle() {
            debug!(state = self.state.name(), "Session already started, ignoring start");
            return Outcome::default();
        }

        match check {
            Ok(()) => self.move_to(SessionState::Connecting, vec![Action::Connect]),
            Err(e) => {
                error!("Session cannot start: {}", e);
                self.move_to(
                    SessionState::Failed {
                        reason: e.to_string(),
                    },
                    Vec::new(),
                )
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> Outcome {
        let name = event.name();
        match event {
            TransportEvent::ConnectSuccess => match self.state {
                SessionState::Connecting => {
                    self.move_to(SessionState::Connected, vec![Action::SchedulePublish])
                }
                _ => self.ignore(name),
            },
            TransportEvent::PublishStart => match self.state {
                SessionState::Connected => self.enter_publishing(),
                _ => self.ignore(name),
            },
            TransportEvent::PublishBadName => {
                if !self.is_connected_or_connecting() {
                    return self.ignore(name);
                }
                self.fail(SessionError::Configuration(
                    "stream key rejected by server".to_string(),
                ))
            }
            TransportEvent::ConnectClosed => self.on_connection_loss(name, "connection closed"),
            TransportEvent::UnpublishSuccess => {
                self.on_connection_loss(name, "server ended the publish")
            }
            TransportEvent::ConnectFailed { reason } | TransportEvent::IoError { message: reason } => {
                self.on_connection_loss(name, &reason)
            }
        }
    }

    fn on_connection_loss(&mut self, trigger: &'static str, reason: &str) -> Outcome {
        if !self.is_connected_or_connecting() {
            return self.ignore(trigger);
        }

        match self.reconnect.next_attempt() {
            Some((attempt, delay)) => {
                warn!(attempt, ?delay, "Connection lost: {}", reason);
                self.move_to(
                    SessionState::Reconnecting { attempt },
                    vec![
                        Action::CancelTimers,
                        Action::ReleaseTransport,
                        Action::ScheduleReconnect(delay),
                    ],
                )
            }
            None => self.fail(SessionError::ReconnectExhausted {
                attempts: self.reconnect.attempts(),
            }),
        }
    }

    fn enter_publishing(&mut self) -> Outcome {
        self.reconnect.reset();
        self.move_to(
            SessionState::Publishing,
            vec![Action::CancelTimers, Action::PublishingStarted],
        )
    }

    fn fail(&mut self, error: SessionError) -> Outcome {
        error!("Session failed: {}", error);
        self.move_to(
            SessionState::Failed {
                reason: error.to_string(),
            },
            vec![Action::CancelTimers, Action::ReleaseTransport],
        )
    }

    fn is_connected_or_connecting(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected | SessionState::Publishing
        )
    }

    fn move_to(&mut self, next: SessionState, actions: Vec<Action>) -> Outcome {
        let previous = std::mem::replace(&mut self.state, next.clone());
        Outcome {
            transition: Some(Transition {
                previous,
                current: next,
            }),
            actions,
        }
    }

    fn ignore(&self, trigger: &'static str) -> Outcome {
        debug!(state = self.state.name(), trigger, "Ignoring trigger");
        Outcome::default()
    }
}
