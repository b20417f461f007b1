//! Controller configuration and injected providers.

use std::time::Duration;

use livestream_ipc::Destination;
use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectPolicy;

/// Interval between telemetry and health samples.
pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between bitrate adaptation decisions.
pub const ADAPTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Wait between connect success and the publish request.
pub const PUBLISH_DELAY: Duration = Duration::from_millis(500);

/// How long a publish request may go unacknowledged.
pub const PUBLISH_GRACE: Duration = Duration::from_secs(2);

/// Everything the session controller is tuned by.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub reconnect: ReconnectPolicy,
    pub timings: SessionTimings,
    pub publish_timeout: PublishTimeoutPolicy,
    pub bitrate: BitratePolicy,
}

/// Loop and timer periods.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTimings {
    pub telemetry_interval: Duration,
    pub adaptation_interval: Duration,
    pub publish_delay: Duration,
    pub publish_grace: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            telemetry_interval: TELEMETRY_INTERVAL,
            adaptation_interval: ADAPTATION_INTERVAL,
            publish_delay: PUBLISH_DELAY,
            publish_grace: PUBLISH_GRACE,
        }
    }
}

/// What to do when the server never acknowledges a publish request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishTimeoutPolicy {
    /// Treat the silence as a transport failure and reconnect.
    #[default]
    Reconnect,

    /// Assume the server is accepting media and enter publishing.
    AssumePublishing,
}

/// Bitrate adaptation tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BitratePolicy {
    /// Fraction of the current bitrate moved per step.
    pub step_ratio: f64,

    /// Fraction of the preset minimum the target may drop to.
    pub floor_ratio: f64,

    /// Raise the bitrate on good or excellent health.
    pub allow_upscale: bool,
}

impl Default for BitratePolicy {
    fn default() -> Self {
        Self {
            step_ratio: 0.15,
            floor_ratio: 0.5,
            allow_upscale: true,
        }
    }
}

/// Supplies the publish destination when a start command carries none.
pub trait DestinationProvider: Send {
    fn destination(&self) -> Option<Destination>;
}

impl DestinationProvider for Destination {
    fn destination(&self) -> Option<Destination> {
        Some(self.clone())
    }
}

/// Provider for drivers that always pass the destination explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDestination;

impl DestinationProvider for NoDestination {
    fn destination(&self) -> Option<Destination> {
        None
    }
}
