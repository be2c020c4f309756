// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ CaptureCoordinator  │  ← serial queue, the only caller after construction
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CameraSession     │  ← one live device, guarded by one lock
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraHardware Trait│  ← device service contract
//! └──────────┬──────────┘
//!            │
//!       ┌────┴──────┐
//!       ▼           ▼
//!  ┌─────────┐ ┌────────┐
//!  │Synthetic│ │  V4L2  │
//!  └─────────┘ └────────┘
//! ```

pub mod format_converters;
pub mod frame_loop;
pub mod negotiator;
pub mod preview_target;
pub mod session;
pub mod synthetic;
pub mod types;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use preview_target::{FrameAvailableListener, PreviewTarget};
pub use session::CameraSession;
pub use types::*;

use std::sync::Arc;

/// Camera hardware service
///
/// Enumerates devices and opens them. Implementations must refuse to open a
/// device that is already held by another handle.
pub trait CameraHardware: Send + Sync {
    /// Devices currently available
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    /// Open a device for exclusive use
    fn open(&self, id: &str) -> BackendResult<Box<dyn CameraHandle>>;
}

/// An open camera device
pub trait CameraHandle: Send {
    // ===== Binding =====

    fn descriptor(&self) -> &DeviceDescriptor;

    /// Stream frames straight into `target` once preview starts
    fn bind_preview_target(&mut self, target: Arc<PreviewTarget>) -> BackendResult<()>;

    /// Display rotation offset and mirroring for the bound target
    fn set_display_orientation(
        &mut self,
        rotation: SensorRotation,
        mirrored: bool,
    ) -> BackendResult<()>;

    // ===== Capabilities =====

    fn capabilities(&self) -> BackendResult<Capabilities>;

    fn apply_capabilities(&mut self, settings: &CaptureSettings) -> BackendResult<()>;

    // ===== Streaming =====

    fn start_preview(&mut self) -> BackendResult<()>;

    /// One-shot focus; devices without focus control return `Ok`
    fn auto_focus(&mut self) -> BackendResult<()>;

    fn stop_preview(&mut self) -> BackendResult<()>;

    /// Stop delivering frames to the bound target
    fn clear_frame_callback(&mut self);

    /// Give the device back to the hardware service
    fn release(&mut self);
}

/// Pick the device facing `facing`, or any device if none does
pub fn select_device(devices: &[DeviceDescriptor], facing: Facing) -> Option<&DeviceDescriptor> {
    devices
        .iter()
        .find(|d| d.facing == facing)
        .or_else(|| devices.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, facing: Facing) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            facing,
        }
    }

    #[test]
    fn test_select_device_by_facing() {
        let devices = vec![device("back", Facing::Back), device("front", Facing::Front)];
        assert_eq!(
            select_device(&devices, Facing::Front).map(|d| d.id.as_str()),
            Some("front")
        );
    }

    #[test]
    fn test_select_device_falls_back() {
        let devices = vec![device("usb", Facing::External)];
        assert_eq!(
            select_device(&devices, Facing::Back).map(|d| d.id.as_str()),
            Some("usb")
        );
        assert!(select_device(&[], Facing::Front).is_none());
    }
}
