//! Video encoder contract and rate control.
//!
//! The session controller configures the encoder once per session from the
//! selected preset and then only moves its target bitrate. Frame-level work
//! stays behind the [`VideoEncoder`] trait.

mod error;
mod headless;

pub use error::EncoderError;
pub use headless::{HeadlessEncoder, RateControlHandle};

use crossbeam_channel::{Receiver, Sender};
use livestream_ipc::Preset;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target frames per second.
    pub fps: u32,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: f32,

    /// H.264 profile.
    pub profile: H264Profile,
}

impl VideoEncoderConfig {
    /// Derives the encoder setup for a preset, starting at its initial bitrate.
    pub fn from_preset(preset: &Preset) -> Self {
        Self {
            width: preset.width,
            height: preset.height,
            fps: preset.frame_rate,
            bitrate_kbps: preset.initial_bitrate_kbps,
            keyframe_interval_secs: preset.keyframe_interval_secs,
            profile: H264Profile::for_preset(preset),
        }
    }

    /// Keyframe interval expressed in frames.
    pub fn keyframe_interval_frames(&self) -> u32 {
        (self.keyframe_interval_secs * self.fps as f32).round().max(1.0) as u32
    }

    /// Rejects configurations no encoder can run.
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(EncoderError::InvalidConfig("frame rate 0".into()));
        }
        if self.bitrate_kbps == 0 {
            return Err(EncoderError::InvalidConfig("bitrate 0".into()));
        }
        Ok(())
    }
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self::from_preset(&Preset::default())
    }
}

/// H.264 profile levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

impl H264Profile {
    /// Profile suited to a preset's output height.
    pub fn for_preset(preset: &Preset) -> Self {
        match preset.height {
            0..=539 => Self::Baseline,
            540..=899 => Self::Main,
            _ => Self::High,
        }
    }
}

/// Notifications an encoder raises while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Frames were discarded before encoding.
    FramesDropped { count: u64 },
}

/// Creates the channel an encoder reports on.
pub fn encoder_event_channel() -> (Sender<EncoderEvent>, Receiver<EncoderEvent>) {
    crossbeam_channel::unbounded()
}

/// Trait for video encoders.
pub trait VideoEncoder: Send {
    /// Apply a full configuration. Called once per session before publishing.
    fn configure(&mut self, config: &VideoEncoderConfig) -> EncoderResult<()>;

    /// Change the rate-control target without reconfiguring.
    fn set_bitrate(&mut self, kbps: u32) -> EncoderResult<()>;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_preset() {
        let config = VideoEncoderConfig::from_preset(&Preset::high_quality());
        assert_eq!((config.width, config.height, config.fps), (1920, 1080, 60));
        assert_eq!(config.bitrate_kbps, 7500);
        assert_eq!(config.keyframe_interval_frames(), 120);
        assert_eq!(config.profile, H264Profile::High);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profile_follows_resolution() {
        assert_eq!(H264Profile::for_preset(&Preset::street()), H264Profile::Main);
        assert_eq!(H264Profile::for_preset(&Preset::wifi()), H264Profile::High);

        let small = Preset {
            width: 640,
            height: 360,
            ..Preset::street()
        };
        assert_eq!(
            VideoEncoderConfig::from_preset(&small).profile,
            H264Profile::Baseline
        );
    }

    #[test]
    fn test_config_validation() {
        let config = VideoEncoderConfig {
            fps: 0,
            ..VideoEncoderConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EncoderError::InvalidConfig(_))
        ));
    }
}
