//! Common types used across controller messages.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use url::Url;

/// Immutable quality profile for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Preset name (e.g., "street").
    pub name: String,

    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Target frames per second.
    pub frame_rate: u32,

    /// Nominal lower video bitrate bound in kbps.
    pub min_bitrate_kbps: u32,

    /// Upper video bitrate bound in kbps.
    pub max_bitrate_kbps: u32,

    /// Video bitrate at session start in kbps.
    pub initial_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: f32,
}

impl Preset {
    /// 720p30, tuned for cellular links.
    pub fn street() -> Self {
        Self {
            name: "street".to_string(),
            width: 1280,
            height: 720,
            frame_rate: 30,
            min_bitrate_kbps: 2000,
            max_bitrate_kbps: 3000,
            initial_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            audio_sample_rate: 48000,
            keyframe_interval_secs: 2.0,
        }
    }

    /// 1080p30 for Wi-Fi uplinks.
    pub fn wifi() -> Self {
        Self {
            name: "wifi".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 30,
            min_bitrate_kbps: 4500,
            max_bitrate_kbps: 6000,
            initial_bitrate_kbps: 5000,
            ..Self::street()
        }
    }

    /// 1080p60, maximum quality.
    pub fn high_quality() -> Self {
        Self {
            name: "high-quality".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 60,
            min_bitrate_kbps: 6500,
            max_bitrate_kbps: 9000,
            initial_bitrate_kbps: 7500,
            ..Self::street()
        }
    }

    /// All built-in presets.
    pub fn all() -> Vec<Self> {
        vec![Self::street(), Self::wifi(), Self::high_quality()]
    }

    /// Looks up a built-in preset by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::all().into_iter().find(|p| p.name == wanted)
    }

    /// Nominal video bitrate range in kbps.
    pub fn bitrate_range(&self) -> RangeInclusive<u32> {
        self.min_bitrate_kbps..=self.max_bitrate_kbps
    }

    /// Checks the preset's internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 || self.frame_rate == 0 {
            return Err(format!("preset '{}' has an empty video format", self.name));
        }
        if self.min_bitrate_kbps == 0 || self.min_bitrate_kbps > self.max_bitrate_kbps {
            return Err(format!(
                "preset '{}' has an invalid bitrate range {}..{}",
                self.name, self.min_bitrate_kbps, self.max_bitrate_kbps
            ));
        }
        if !self.bitrate_range().contains(&self.initial_bitrate_kbps) {
            return Err(format!(
                "preset '{}' initial bitrate {} is outside {}..{}",
                self.name, self.initial_bitrate_kbps, self.min_bitrate_kbps, self.max_bitrate_kbps
            ));
        }
        Ok(())
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::street()
    }
}

/// Where to publish: ingest server plus stream key.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Destination {
    /// Ingest URL including the application path (e.g., "rtmp://host/live").
    pub server_url: String,

    /// Stream key for authentication.
    pub stream_key: String,
}

impl Destination {
    /// Create a destination from its parts.
    pub fn new(server_url: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            stream_key: stream_key.into(),
        }
    }

    /// Split a full publish URL (`rtmp://host[:port]/app/key`) into server URL
    /// and stream key. The last path segment (plus any query) is the key.
    /// Anything that does not parse as an RTMP URL becomes a server URL with
    /// an empty key.
    pub fn from_full_url(full_url: &str) -> Self {
        let fallback = || Self::new(full_url, "");

        let Ok(url) = Url::parse(full_url) else {
            return fallback();
        };
        if url.scheme() != "rtmp" && url.scheme() != "rtmps" {
            return fallback();
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let Some((key, app)) = segments.split_last() else {
            return fallback();
        };

        let mut server_url = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            server_url.push_str(&format!(":{port}"));
        }
        if !app.is_empty() {
            server_url.push('/');
            server_url.push_str(&app.join("/"));
        }

        let stream_key = match url.query() {
            Some(query) => format!("{key}?{query}"),
            None => key.to_string(),
        };

        Self::new(server_url, stream_key)
    }

    /// Server URL and key joined, or empty if either part is missing.
    pub fn full_url(&self) -> String {
        if !self.is_valid() {
            return String::new();
        }
        format!("{}/{}", self.server_url.trim_end_matches('/'), self.stream_key)
    }

    /// Returns true if both parts are present and the URL is RTMP.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Checks the destination, describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let server_url = self.server_url.trim();
        if server_url.is_empty() {
            return Err("server URL is empty".to_string());
        }
        if self.stream_key.trim().is_empty() {
            return Err("stream key is empty".to_string());
        }
        if !server_url.starts_with("rtmp://") && !server_url.starts_with("rtmps://") {
            return Err("URL must start with rtmp:// or rtmps://".to_string());
        }

        let url = Url::parse(server_url).map_err(|e| format!("server URL is malformed: {e}"))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err("server URL has no host".to_string());
        }
        if url.path().trim_matches('/').is_empty() {
            return Err("server URL has no application path".to_string());
        }
        Ok(())
    }
}

// Keeps stream keys out of logs.
impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = if self.stream_key.is_empty() { "" } else { "***" };
        f.debug_struct("Destination")
            .field("server_url", &self.server_url)
            .field("stream_key", &masked)
            .finish()
    }
}

/// Capture/encode devices the controller can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Video input.
    Camera,

    /// Audio input.
    Microphone,

    /// Video encoder.
    Encoder,
}

impl DeviceKind {
    /// Returns the display name for this device.
    pub fn name(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::Encoder => "encoder",
        }
    }
}

/// Point-in-time view of the session telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Frames dropped since session start.
    pub dropped_frames: u64,

    /// Last achieved bitrate sample in kbps.
    pub current_bitrate_kbps: u32,

    /// Last round-trip estimate in milliseconds.
    pub rtt_ms: f64,

    /// Last outbound queue depth sample.
    pub queue_depth: u64,

    /// Bytes sent since session start.
    pub bytes_sent: u64,

    /// Seconds since publishing began.
    pub duration_secs: f64,

    /// Mean bitrate over the session in kbps.
    pub average_bitrate_kbps: u32,
}

/// Coarse, advisory network health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkHealth {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl NetworkHealth {
    /// Returns a simple string representation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        }
    }

    /// Returns a user-facing description.
    pub fn message(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent connection",
            Self::Good => "Good connection",
            Self::Fair => "Unstable connection, adjusting quality",
            Self::Poor => "Weak connection, reducing quality",
        }
    }
}
