//! TOML configuration for the publisher.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use livestream_engine::{
    BitratePolicy, EngineConfig, PublishTimeoutPolicy, ReconnectPolicy, SessionTimings,
};
use livestream_ipc::Destination;
use serde::Deserialize;
use tracing::info;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "livestream.toml";

/// Publisher configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub destination: DestinationConfig,
    pub session: SessionConfig,
    pub reconnect: ReconnectConfig,
    pub bitrate: BitrateConfig,
    pub reachability: ReachabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Ingest URL, e.g. `rtmp://live.example.com/app`.
    pub server_url: Option<String>,
    pub stream_key: Option<String>,
    /// Built-in preset name.
    pub preset: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            stream_key: None,
            preset: "street".to_string(),
        }
    }
}

/// Periods in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub telemetry_interval_secs: f64,
    pub adaptation_interval_secs: f64,
    pub publish_delay_secs: f64,
    pub publish_grace_secs: f64,
    pub publish_timeout: PublishTimeoutPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: 1.0,
            adaptation_interval_secs: 5.0,
            publish_delay_secs: 0.5,
            publish_grace_secs: 2.0,
            publish_timeout: PublishTimeoutPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub floor_secs: f64,
    pub cap_secs: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            floor_secs: 2.0,
            cap_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    pub step_ratio: f64,
    pub floor_ratio: f64,
    pub allow_upscale: bool,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        let policy = BitratePolicy::default();
        Self {
            step_ratio: policy.step_ratio,
            floor_ratio: policy.floor_ratio,
            allow_upscale: policy.allow_upscale,
        }
    }
}

/// TCP probe against the ingest host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    pub enabled: bool,
    pub interval_secs: f64,
    pub timeout_secs: f64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5.0,
            timeout_secs: 2.0,
        }
    }
}

impl AppConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default file if present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Session controller settings.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let session = &self.session;
        let reconnect = &self.reconnect;
        let bitrate = &self.bitrate;

        if !(0.0..1.0).contains(&bitrate.step_ratio) || bitrate.step_ratio == 0.0 {
            bail!("bitrate.step_ratio must be in (0, 1), got {}", bitrate.step_ratio);
        }
        if !(0.0..=1.0).contains(&bitrate.floor_ratio) {
            bail!("bitrate.floor_ratio must be in [0, 1], got {}", bitrate.floor_ratio);
        }

        Ok(EngineConfig {
            reconnect: ReconnectPolicy {
                max_attempts: reconnect.max_attempts,
                floor: secs("reconnect.floor_secs", reconnect.floor_secs)?,
                cap: secs("reconnect.cap_secs", reconnect.cap_secs)?,
            },
            timings: SessionTimings {
                telemetry_interval: secs(
                    "session.telemetry_interval_secs",
                    session.telemetry_interval_secs,
                )?,
                adaptation_interval: secs(
                    "session.adaptation_interval_secs",
                    session.adaptation_interval_secs,
                )?,
                publish_delay: secs("session.publish_delay_secs", session.publish_delay_secs)?,
                publish_grace: secs("session.publish_grace_secs", session.publish_grace_secs)?,
            },
            publish_timeout: session.publish_timeout,
            bitrate: BitratePolicy {
                step_ratio: bitrate.step_ratio,
                floor_ratio: bitrate.floor_ratio,
                allow_upscale: bitrate.allow_upscale,
            },
        })
    }

    /// Destination from, in order: a full publish URL, explicit parts, the
    /// config file.
    pub fn destination(
        &self,
        full_url: Option<&str>,
        server_url: Option<String>,
        stream_key: Option<String>,
    ) -> Destination {
        if let Some(url) = full_url {
            return Destination::from_full_url(url);
        }
        Destination::new(
            server_url
                .or_else(|| self.destination.server_url.clone())
                .unwrap_or_default(),
            stream_key
                .or_else(|| self.destination.stream_key.clone())
                .unwrap_or_default(),
        )
    }
}

/// Seconds to a duration. Periods must be positive.
fn secs(field: &str, value: f64) -> Result<Duration> {
    let duration = Duration::try_from_secs_f64(value)
        .with_context(|| format!("{field} is not a valid duration: {value}"))?;
    if duration.is_zero() {
        bail!("{field} must be greater than zero");
    }
    Ok(duration)
}
