//! Target bitrate control within a preset's bounds.

use livestream_ipc::Preset;
use tracing::debug;

use crate::config::BitratePolicy;

/// Moves the encoder's target bitrate in multiplicative steps.
///
/// The target stays within `[min * floor_ratio, max]` of the preset.
#[derive(Debug, Clone)]
pub struct BitrateController {
    initial_kbps: u32,
    floor_kbps: u32,
    max_kbps: u32,
    current_kbps: u32,
    step_ratio: f64,
}

impl BitrateController {
    pub fn new(preset: &Preset, policy: &BitratePolicy) -> Self {
        let floor_kbps = (preset.min_bitrate_kbps as f64 * policy.floor_ratio).round() as u32;
        Self {
            initial_kbps: preset.initial_bitrate_kbps,
            floor_kbps,
            max_kbps: preset.max_bitrate_kbps,
            current_kbps: preset.initial_bitrate_kbps,
            step_ratio: policy.step_ratio,
        }
    }

    /// Current target in kbps.
    pub fn current(&self) -> u32 {
        self.current_kbps
    }

    /// Lowest target the controller will reach.
    pub fn floor(&self) -> u32 {
        self.floor_kbps
    }

    /// Lower the target one step. Returns the new target if it changed.
    pub fn adjust_down(&mut self) -> Option<u32> {
        let target = (self.current_kbps as f64 * (1.0 - self.step_ratio)).round() as u32;
        self.set(target.max(self.floor_kbps))
    }

    /// Raise the target one step. Returns the new target if it changed.
    pub fn adjust_up(&mut self) -> Option<u32> {
        let target = (self.current_kbps as f64 * (1.0 + self.step_ratio)).round() as u32;
        self.set(target.min(self.max_kbps))
    }

    /// Back to the preset's initial bitrate.
    pub fn reset(&mut self) {
        self.current_kbps = self.initial_kbps;
    }

    fn set(&mut self, target: u32) -> Option<u32> {
        if target == self.current_kbps {
            return None;
        }
        debug!(from = self.current_kbps, to = target, "Target bitrate adjusted");
        self.current_kbps = target;
        Some(target)
    }
}
