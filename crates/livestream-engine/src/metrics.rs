//! Session telemetry accumulation.

use std::time::{Duration, Instant};

use livestream_ipc::TelemetrySnapshot;

/// Collects telemetry for one session.
///
/// Owned by the session loop, so plain fields suffice. Duration and average
/// bitrate are derived at read time from the start timestamp.
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    start_time: Option<Instant>,
    dropped_frames: u64,
    current_bitrate_kbps: u32,
    rtt_ms: f64,
    queue_depth: u64,
    bytes_sent: u64,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter and clear the start timestamp.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Mark the beginning of streaming. Later calls keep the first timestamp.
    pub fn start_at(&mut self, now: Instant) {
        self.start_time.get_or_insert(now);
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    /// Record frames dropped before they reached the wire.
    pub fn record_frame_drops(&mut self, count: u64) {
        self.dropped_frames = self.dropped_frames.saturating_add(count);
    }

    /// Record an achieved bitrate sample.
    pub fn record_bitrate(&mut self, kbps: u32) {
        self.current_bitrate_kbps = kbps;
    }

    pub fn record_rtt(&mut self, rtt_ms: f64) {
        self.rtt_ms = rtt_ms;
    }

    pub fn record_queue_depth(&mut self, depth: u64) {
        self.queue_depth = depth;
    }

    /// Record bytes sent.
    pub fn record_bytes_sent(&mut self, bytes: u64) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes);
    }

    /// Time since streaming began, zero before that.
    pub fn duration_at(&self, now: Instant) -> Duration {
        self.start_time
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Mean bitrate since streaming began in kbps.
    pub fn average_bitrate_kbps_at(&self, now: Instant) -> u32 {
        let elapsed = self.duration_at(now).as_secs_f64();
        if elapsed > 0.0 {
            ((self.bytes_sent * 8) as f64 / elapsed / 1000.0) as u32
        } else {
            0
        }
    }

    /// Get a snapshot as of `now`.
    pub fn snapshot_at(&self, now: Instant) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dropped_frames: self.dropped_frames,
            current_bitrate_kbps: self.current_bitrate_kbps,
            rtt_ms: self.rtt_ms,
            queue_depth: self.queue_depth,
            bytes_sent: self.bytes_sent,
            duration_secs: self.duration_at(now).as_secs_f64(),
            average_bitrate_kbps: self.average_bitrate_kbps_at(now),
        }
    }

    /// Get current telemetry snapshot.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot_at(Instant::now())
    }
}
