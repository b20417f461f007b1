//! Encoder used when no frame source is attached.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{EncoderError, EncoderResult, VideoEncoder, VideoEncoderConfig};

#[derive(Debug, Default)]
struct RateControlState {
    config: Option<VideoEncoderConfig>,
    adjustments: u32,
}

/// Read-only view of a [`HeadlessEncoder`]'s rate control.
#[derive(Debug, Clone)]
pub struct RateControlHandle {
    state: Arc<Mutex<RateControlState>>,
}

impl RateControlHandle {
    /// Current target bitrate, if configured.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.state.lock().config.as_ref().map(|c| c.bitrate_kbps)
    }

    /// Number of bitrate changes since the last `configure`.
    pub fn adjustments(&self) -> u32 {
        self.state.lock().adjustments
    }
}

/// Tracks configuration and rate-control targets without producing frames.
///
/// Lets the publisher run against a real ingest server while the capture
/// pipeline lives elsewhere.
#[derive(Debug, Default)]
pub struct HeadlessEncoder {
    state: Arc<Mutex<RateControlState>>,
}

impl HeadlessEncoder {
    /// Create an unconfigured encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for observing the rate-control target from another thread.
    pub fn handle(&self) -> RateControlHandle {
        RateControlHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl VideoEncoder for HeadlessEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> EncoderResult<()> {
        config.validate()?;
        info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_kbps = config.bitrate_kbps,
            gop = config.keyframe_interval_frames(),
            "Encoder configured"
        );
        let mut state = self.state.lock();
        state.config = Some(config.clone());
        state.adjustments = 0;
        Ok(())
    }

    fn set_bitrate(&mut self, kbps: u32) -> EncoderResult<()> {
        let mut state = self.state.lock();
        let config = state.config.as_mut().ok_or(EncoderError::NotConfigured)?;
        if config.bitrate_kbps != kbps {
            debug!(from = config.bitrate_kbps, to = kbps, "Encoder bitrate updated");
            config.bitrate_kbps = kbps;
            state.adjustments += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "headless"
    }
}
