// SPDX-License-Identifier: GPL-3.0-only

//! Camera session ownership
//!
//! The session holds the single live device handle. Every method takes the
//! session lock for its whole duration, so a `release` from the host thread
//! can never interleave with a `configure` running on the capture thread.
//!
//! Hardware failures never leave this module: they are logged and the
//! session falls back to "no device", which shows up as a blank preview.

use super::negotiator;
use super::preview_target::PreviewTarget;
use super::types::*;
use super::{CameraHandle, CameraHardware, select_device};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Internal session state
struct SessionState {
    /// The open device, if any
    handle: Option<Box<dyn CameraHandle>>,
    facing: Facing,
    mirrored: bool,
    rotation: SensorRotation,
    preview_size: Option<PreviewSize>,
    fps_range: Option<FpsRange>,
    /// Set while the owner is paused; setups are refused
    suspended: bool,
}

/// Owner of the one open camera device
pub struct CameraSession {
    hardware: Arc<dyn CameraHardware>,
    state: Mutex<SessionState>,
}

impl CameraSession {
    /// Create a session with no device open
    ///
    /// `rotation` is the display rotation offset applied on every setup.
    pub fn new(
        hardware: Arc<dyn CameraHardware>,
        facing: Facing,
        mirrored: bool,
        rotation: SensorRotation,
    ) -> Self {
        Self {
            hardware,
            state: Mutex::new(SessionState {
                handle: None,
                facing,
                mirrored,
                rotation,
                preview_size: None,
                fps_range: None,
                suspended: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a camera and bind it to `target`
    ///
    /// Any device already open is released first. The requested facing is
    /// preferred; any device is used if none matches. On failure the session
    /// is left with no device.
    pub fn setup(&self, target: &Arc<PreviewTarget>) {
        let mut state = self.lock();
        if state.suspended {
            debug!(texture = target.texture_id(), "Session suspended, ignoring setup");
            return;
        }
        release_locked(&mut state);

        let devices = self.hardware.list_devices();
        let Some(device) = select_device(&devices, state.facing) else {
            error!(facing = %state.facing, "No camera available");
            return;
        };
        if device.facing != state.facing {
            warn!(
                requested = %state.facing,
                using = %device.facing,
                device = %device.id,
                "No camera with requested facing, using first available"
            );
        }

        let mut handle = match self.hardware.open(&device.id) {
            Ok(handle) => handle,
            Err(e) => {
                error!(device = %device.id, error = %e, "Failed to open camera");
                return;
            }
        };

        let mirrored = state.mirrored && device.facing == Facing::Front;
        let bound = handle
            .bind_preview_target(Arc::clone(target))
            .and_then(|_| handle.set_display_orientation(state.rotation, mirrored));
        if let Err(e) = bound {
            error!(device = %device.id, error = %e, "Failed to bind preview target");
            handle.release();
            return;
        }

        info!(
            device = %device.id,
            facing = %device.facing,
            rotation = %state.rotation,
            mirrored,
            texture = target.texture_id(),
            "Camera opened"
        );
        state.handle = Some(handle);
    }

    /// Capabilities of the open device
    pub fn capabilities(&self) -> Option<Capabilities> {
        let state = self.lock();
        let handle = state.handle.as_ref()?;
        match handle.capabilities() {
            Ok(caps) => Some(caps),
            Err(e) => {
                warn!(error = %e, "Failed to query camera capabilities");
                None
            }
        }
    }

    /// Apply a preview size (and optional frame-rate range) to the open device
    ///
    /// No-op without a device or a size.
    pub fn configure(&self, size: Option<PreviewSize>, fps: Option<FpsRange>) {
        let mut state = self.lock();
        let Some(size) = size else {
            debug!("No preview size to configure");
            return;
        };
        let Some(handle) = state.handle.as_mut() else {
            debug!("No camera open, skipping configure");
            return;
        };

        match handle.apply_capabilities(&CaptureSettings { size, fps }) {
            Ok(()) => {
                info!(size = %size, fps = ?fps, "Camera configured");
                state.preview_size = Some(size);
                state.fps_range = fps;
            }
            Err(e) => warn!(size = %size, error = %e, "Failed to configure camera"),
        }
    }

    /// Negotiate against the device capabilities and apply the result
    ///
    /// Returns the applied preview size.
    pub fn configure_for(&self, width: u32, height: u32, fps: u32) -> Option<PreviewSize> {
        let caps = self.capabilities()?;
        let size = negotiator::optimal_preview_size(&caps.sizes, width, height);
        let range = negotiator::suitable_fps_range(fps, &caps.fps_ranges);
        debug!(width, height, chosen = ?size, fps_range = %range, "Negotiated preview");
        self.configure(size, Some(range));
        self.preview_size()
    }

    pub fn start_preview(&self) {
        let mut state = self.lock();
        if let Some(handle) = state.handle.as_mut()
            && let Err(e) = handle.start_preview()
        {
            error!(error = %e, "Failed to start preview");
        }
    }

    pub fn auto_focus(&self) {
        let mut state = self.lock();
        if let Some(handle) = state.handle.as_mut()
            && let Err(e) = handle.auto_focus()
        {
            warn!(error = %e, "Auto focus failed");
        }
    }

    pub fn stop_preview(&self) {
        let mut state = self.lock();
        if let Some(handle) = state.handle.as_mut()
            && let Err(e) = handle.stop_preview()
        {
            warn!(error = %e, "Failed to stop preview");
        }
    }

    /// Release the open device, if any
    ///
    /// Safe to call from any thread and any number of times.
    pub fn release(&self) {
        release_locked(&mut self.lock());
    }

    /// Release the device and refuse setups until [`resume`](Self::resume)
    ///
    /// Setups still queued or in flight when this runs either finish before
    /// it (and are released here) or are refused.
    pub fn suspend(&self) {
        let mut state = self.lock();
        state.suspended = true;
        release_locked(&mut state);
    }

    pub fn resume(&self) {
        self.lock().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    pub fn is_open(&self) -> bool {
        self.lock().handle.is_some()
    }

    /// Preview size applied by the last successful configure
    pub fn preview_size(&self) -> Option<PreviewSize> {
        self.lock().preview_size
    }

    pub fn fps_range(&self) -> Option<FpsRange> {
        self.lock().fps_range
    }

    pub fn facing(&self) -> Facing {
        self.lock().facing
    }

    /// Facing used by the next setup
    pub fn set_facing(&self, facing: Facing) {
        self.lock().facing = facing;
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn release_locked(state: &mut SessionState) {
    let Some(mut handle) = state.handle.take() else {
        return;
    };
    info!(device = %handle.descriptor().id, "Releasing camera");
    handle.clear_frame_callback();
    if let Err(e) = handle.stop_preview() {
        warn!(error = %e, "Failed to stop preview during release");
    }
    handle.release();
    state.preview_size = None;
    state.fps_range = None;
}
