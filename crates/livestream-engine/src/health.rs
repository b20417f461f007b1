//! Network health classification.
//!
//! Advisory only: the tiers feed bitrate adaptation and the observer, never
//! connection decisions.

use livestream_ipc::{NetworkHealth, Preset, TelemetrySnapshot};

/// Classifies a telemetry snapshot against the preset, worst tier first.
pub fn estimate(snapshot: &TelemetrySnapshot, preset: &Preset) -> NetworkHealth {
    let bitrate_ratio = if preset.initial_bitrate_kbps > 0 {
        snapshot.current_bitrate_kbps as f64 / preset.initial_bitrate_kbps as f64
    } else {
        0.0
    };
    let drop_ratio = snapshot.dropped_frames as f64 / snapshot.duration_secs.max(1.0);
    let rtt = snapshot.rtt_ms;

    if rtt > 500.0 || drop_ratio > 0.10 || bitrate_ratio < 0.5 {
        NetworkHealth::Poor
    } else if rtt > 300.0 || drop_ratio > 0.05 || bitrate_ratio < 0.7 {
        NetworkHealth::Fair
    } else if rtt < 100.0 && drop_ratio < 0.01 && bitrate_ratio > 0.9 {
        NetworkHealth::Excellent
    } else {
        NetworkHealth::Good
    }
}
