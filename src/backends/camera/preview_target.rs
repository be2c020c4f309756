// SPDX-License-Identifier: GPL-3.0-only

//! Camera-bound texture endpoint
//!
//! A [`PreviewTarget`] is what a camera device streams into. It pairs the
//! texture id owned by the render pipeline with a single-slot frame mailbox:
//! the device posts frames from its stream thread, the render thread latches
//! the newest one into the texture at draw time. Frames that arrive before
//! the previous one is latched replace it, so the device never waits on the
//! renderer.

use super::types::{CameraFrame, SensorRotation};
use crate::gpu::matrix::{self, Mat4};
use crate::gpu::TextureId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Called after a new frame has been posted
pub type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

struct TargetState {
    pending: Option<CameraFrame>,
    listener: Option<FrameAvailableListener>,
    rotation: SensorRotation,
    mirrored: bool,
    timestamp_ns: u64,
    released: bool,
}

pub struct PreviewTarget {
    texture_id: TextureId,
    epoch: Instant,
    state: Mutex<TargetState>,
}

impl PreviewTarget {
    pub fn new(texture_id: TextureId) -> Arc<Self> {
        Arc::new(Self {
            texture_id,
            epoch: Instant::now(),
            state: Mutex::new(TargetState {
                pending: None,
                listener: None,
                rotation: SensorRotation::None,
                mirrored: false,
                timestamp_ns: 0,
                released: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Texture the frames are latched into
    pub fn texture_id(&self) -> TextureId {
        self.texture_id
    }

    pub fn set_on_frame_available(&self, listener: FrameAvailableListener) {
        self.lock().listener = Some(listener);
    }

    pub fn clear_on_frame_available(&self) {
        self.lock().listener = None;
    }

    /// Display orientation the device applies to its output
    pub fn set_orientation(&self, rotation: SensorRotation, mirrored: bool) {
        let mut state = self.lock();
        state.rotation = rotation;
        state.mirrored = mirrored;
    }

    /// Post a frame from a device stream thread
    ///
    /// The listener runs on the calling thread, outside the target's lock.
    pub fn post_frame(&self, frame: CameraFrame) {
        let listener = {
            let mut state = self.lock();
            if state.released {
                return;
            }
            state.pending = Some(frame);
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Take the newest posted frame, advancing the frame timestamp
    pub fn latch(&self) -> Option<CameraFrame> {
        let mut state = self.lock();
        let frame = state.pending.take()?;
        let ts = frame
            .captured_at
            .saturating_duration_since(self.epoch)
            .as_nanos() as u64;
        state.timestamp_ns = ts.max(state.timestamp_ns + 1);
        Some(frame)
    }

    /// Timestamp of the last latched frame, in nanoseconds since the target was created
    pub fn timestamp_ns(&self) -> u64 {
        self.lock().timestamp_ns
    }

    /// Texture coordinate transform for the current orientation
    ///
    /// Rotation and mirroring are applied about the texture centre.
    pub fn transform_matrix(&self) -> Mat4 {
        let state = self.lock();
        let mirror = if state.mirrored { -1.0 } else { 1.0 };
        let m = matrix::multiply(
            &matrix::rotation_z(state.rotation.degrees()),
            &matrix::scale(mirror, 1.0),
        );
        let m = matrix::multiply(&matrix::translation(0.5, 0.5), &m);
        matrix::multiply(&m, &matrix::translation(-0.5, -0.5))
    }

    /// Stop accepting frames and drop the listener
    pub fn release(&self) {
        let mut state = self.lock();
        if !state.released {
            debug!(texture = self.texture_id, "Releasing preview target");
        }
        state.released = true;
        state.pending = None;
        state.listener = None;
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }
}

impl std::fmt::Debug for PreviewTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewTarget")
            .field("texture_id", &self.texture_id)
            .field("released", &self.is_released())
            .finish()
    }
}
