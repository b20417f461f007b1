//! Camera and microphone attachment.
//!
//! The session attaches inputs when it starts and detaches them when it
//! ends. Frame delivery happens outside the session controller.

mod error;

pub use error::CaptureError;

use livestream_ipc::DeviceKind;
use tracing::{info, warn};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Devices a session can attach.
pub const SESSION_DEVICES: [DeviceKind; 2] = [DeviceKind::Camera, DeviceKind::Microphone];

/// Trait for the platform's capture inputs.
pub trait CaptureDevices: Send {
    /// Attach a device to the capture pipeline.
    fn attach(&mut self, kind: DeviceKind) -> CaptureResult<()>;

    /// Detach a device. Detaching an unattached device is a no-op.
    fn detach(&mut self, kind: DeviceKind);
}

/// Outcome of attaching a set of devices.
#[derive(Debug, Default)]
pub struct AttachReport {
    /// Devices now attached.
    pub attached: Vec<DeviceKind>,

    /// Devices that failed, with the reason.
    pub failed: Vec<(DeviceKind, CaptureError)>,
}

impl AttachReport {
    /// True when no device could be attached.
    pub fn is_total_failure(&self) -> bool {
        self.attached.is_empty() && !self.failed.is_empty()
    }
}

/// Attaches each device in `kinds`, collecting failures instead of stopping.
pub fn attach_all(devices: &mut dyn CaptureDevices, kinds: &[DeviceKind]) -> AttachReport {
    let mut report = AttachReport::default();
    for &kind in kinds {
        match devices.attach(kind) {
            Ok(()) => {
                info!(device = kind.name(), "Device attached");
                report.attached.push(kind);
            }
            Err(e) => {
                warn!(device = kind.name(), "Failed to attach device: {}", e);
                report.failed.push((kind, e));
            }
        }
    }
    report
}

/// Detaches devices in reverse attach order.
pub fn detach_all(devices: &mut dyn CaptureDevices, kinds: &[DeviceKind]) {
    for &kind in kinds.iter().rev() {
        devices.detach(kind);
    }
}
