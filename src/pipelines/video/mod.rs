// SPDX-License-Identifier: GPL-3.0-only

//! Video recording
//!
//! The render thread drives a [`RecordingController`] once per draw. The
//! controller owns its own thread; it is handed the camera texture id and a
//! [`SharedContext`] so it can render the same texture without a copy.

pub mod recorder;
pub mod y4m;

pub use recorder::{TextureRecorder, VideoSink};
pub use y4m::Y4mWriter;

use crate::gpu::{Mat4, SharedContext, TextureId};
use crate::shaders::FilterType;
use std::path::PathBuf;

/// Parameters for one recording
///
/// Built by the caller without a context; the render thread fills in
/// `shared_context` when it starts the recording.
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
    pub shared_context: Option<SharedContext>,
}

impl RecordingRequest {
    pub fn new(output: PathBuf, width: u32, height: u32, frame_rate: u32, bitrate_kbps: u32) -> Self {
        Self {
            output,
            width,
            height,
            frame_rate,
            bitrate_kbps,
            shared_context: None,
        }
    }

    pub fn with_shared_context(mut self, context: SharedContext) -> Self {
        self.shared_context = Some(context);
        self
    }
}

/// Control surface of a video encoder
///
/// Every call is made from the render thread. Implementations must not block
/// on encoding work.
pub trait RecordingController: Send + Sync {
    fn is_recording(&self) -> bool;

    fn start_recording(&self, request: RecordingRequest);

    fn stop_recording(&self);

    /// Texture to encode from; `NO_TEXTURE` withdraws the previous one
    fn set_texture_id(&self, texture: TextureId);

    /// Re-grant rendering context access after the render context was recreated
    fn update_shared_context(&self, context: SharedContext);

    fn update_filter(&self, filter: FilterType);

    /// A new frame is in the texture
    fn frame_available(&self, tex_matrix: &Mat4, timestamp_ns: u64);
}
