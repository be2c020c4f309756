// SPDX-License-Identifier: GPL-3.0-only

//! Render pipeline and recording state machine
//!
//! Lives on the render thread. Owns the rendering context, the camera-bound
//! texture, the per-context program cache and the [`RecordingStatus`]. Other
//! threads talk to it only through [`RenderControls`], which it reads at the
//! start of every draw.
//!
//! Each draw:
//! 1. swaps in a pending filter, if one was requested
//! 2. latches the newest camera frame into the texture
//! 3. advances the recording state machine
//! 4. draws the texture through the active program
//! 5. tells the recording controller about the filter and the frame

use super::video::{RecordingController, RecordingRequest};
use crate::backends::camera::preview_target::PreviewTarget;
use crate::backends::camera::types::PreviewSize;
use crate::constants::timing;
use crate::gpu::{GpuDriver, GpuResult, NO_TEXTURE, ProgramId, TextureId, matrix};
use crate::shaders::{FilterCatalog, FilterType};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Recording state as seen by the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingStatus {
    #[default]
    Off,
    On,
    /// The controller is recording but has not been given this context yet
    Resumed,
}

/// What the render thread does for one state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingAction {
    None,
    /// Grant the context, start the controller, attach the texture
    Start,
    /// Re-grant the context to an already running controller, attach the texture
    Reshare,
    Stop,
}

/// Recording transition table, evaluated once per draw
pub fn next_recording_status(
    current: RecordingStatus,
    requested: bool,
) -> (RecordingAction, RecordingStatus) {
    use RecordingStatus::*;
    match (current, requested) {
        (Off, true) => (RecordingAction::Start, On),
        (Resumed, true) => (RecordingAction::Reshare, On),
        (On, true) => (RecordingAction::None, On),
        (On | Resumed, false) => (RecordingAction::Stop, Off),
        (Off, false) => (RecordingAction::None, Off),
    }
}

#[derive(Default)]
struct ControlState {
    pending_filter: Option<FilterType>,
    recording: bool,
    request: Option<RecordingRequest>,
}

/// Requests from other threads, picked up at the next draw
#[derive(Clone, Default)]
pub struct RenderControls {
    inner: Arc<Mutex<ControlState>>,
}

impl RenderControls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a filter; only the last request before a draw takes effect
    pub fn set_filter(&self, filter: FilterType) {
        self.lock().pending_filter = Some(filter);
    }

    pub fn start_recording(&self, request: RecordingRequest) {
        let mut state = self.lock();
        state.recording = true;
        state.request = Some(request);
    }

    pub fn stop_recording(&self) {
        let mut state = self.lock();
        state.recording = false;
        state.request = None;
    }

    pub fn recording_requested(&self) -> bool {
        self.lock().recording
    }

    fn take_pending_filter(&self) -> Option<FilterType> {
        self.lock().pending_filter.take()
    }

    /// The stored request; with none left the recording request is dropped
    fn take_request(&self) -> Option<RecordingRequest> {
        let mut state = self.lock();
        let request = state.request.take();
        if request.is_none() {
            state.recording = false;
        }
        request
    }
}

pub struct RenderPipeline {
    catalog: FilterCatalog,
    controls: RenderControls,
    recorder: Arc<dyn RecordingController>,
    driver: Option<Box<dyn GpuDriver>>,
    target: Option<Arc<PreviewTarget>>,
    texture: TextureId,
    /// Compiled programs for the current context only
    programs: HashMap<FilterType, ProgramId>,
    active_filter: FilterType,
    status: RecordingStatus,
    surface: Option<(u32, u32)>,
    preview_size: Option<PreviewSize>,
    frame_size: Option<(u32, u32)>,
    program_switches: u64,
    frames_drawn: u64,
}

impl RenderPipeline {
    pub fn new(
        catalog: FilterCatalog,
        controls: RenderControls,
        recorder: Arc<dyn RecordingController>,
        initial_filter: FilterType,
    ) -> Self {
        Self {
            catalog,
            controls,
            recorder,
            driver: None,
            target: None,
            texture: NO_TEXTURE,
            programs: HashMap::new(),
            active_filter: initial_filter,
            status: RecordingStatus::Off,
            surface: None,
            preview_size: None,
            frame_size: None,
            program_switches: 0,
            frames_drawn: 0,
        }
    }

    /// Take ownership of a fresh rendering context
    ///
    /// Creates the camera texture and its preview target. Anything left from
    /// a previous context is released first.
    pub fn on_surface_created(
        &mut self,
        mut driver: Box<dyn GpuDriver>,
    ) -> GpuResult<Arc<PreviewTarget>> {
        if self.driver.is_some() {
            self.release();
        }

        let texture = driver.create_texture()?;
        let target = PreviewTarget::new(texture);
        self.texture = texture;
        self.target = Some(Arc::clone(&target));
        self.driver = Some(driver);
        self.programs.clear();
        self.frame_size = None;

        self.status = if self.recorder.is_recording() {
            RecordingStatus::Resumed
        } else {
            RecordingStatus::Off
        };
        info!(texture, status = ?self.status, "Render surface created");
        Ok(target)
    }

    pub fn on_surface_changed(&mut self, width: u32, height: u32) -> GpuResult<()> {
        let Some(driver) = self.driver.as_mut() else {
            debug!(width, height, "Surface changed without a context");
            return Ok(());
        };
        driver.set_viewport(width, height)?;
        self.surface = Some((width, height));
        debug!(width, height, "Render surface changed");
        Ok(())
    }

    /// Negotiated camera preview size, used for texel offsets
    pub fn set_preview_size(&mut self, size: PreviewSize) {
        debug!(size = %size, "Preview size relayed to renderer");
        self.preview_size = Some(size);
    }

    /// Draw one frame
    ///
    /// A no-op without a context or before the surface has a size. Any error
    /// is fatal to the caller's context.
    pub fn draw_frame(&mut self) -> GpuResult<()> {
        if self.driver.is_none() || self.surface.is_none() {
            debug!("No render surface, skipping draw");
            return Ok(());
        }

        if let Some(filter) = self.controls.take_pending_filter()
            && filter != self.active_filter
        {
            debug!(from = ?self.active_filter, to = ?filter, "Switching filter");
            self.active_filter = filter;
            self.program_switches += 1;
        }

        let Some(driver) = self.driver.as_mut() else {
            return Ok(());
        };
        let Some(target) = self.target.clone() else {
            return Ok(());
        };

        if let Some(frame) = target.latch() {
            driver.update_texture(self.texture, &frame)?;
            self.frame_size = Some((frame.width, frame.height));
        }

        self.update_recording();

        let program = self.program_for(self.active_filter)?;
        let tex_matrix = target.transform_matrix();
        let timestamp_ns = target.timestamp_ns();
        let descriptor = self.catalog.descriptor(self.active_filter);
        let uniforms = descriptor.uniforms(matrix::IDENTITY, tex_matrix, self.texel_size());

        if let Some(driver) = self.driver.as_mut() {
            driver.draw(program, self.texture, &uniforms)?;
        }

        self.recorder.update_filter(self.active_filter);
        self.recorder.frame_available(&tex_matrix, timestamp_ns);

        self.frames_drawn += 1;
        if self.frames_drawn % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                frames = self.frames_drawn,
                filter = ?self.active_filter,
                recording = ?self.status,
                "Render progress"
            );
        }
        Ok(())
    }

    fn update_recording(&mut self) {
        let requested = self.controls.recording_requested();
        let (action, next) = next_recording_status(self.status, requested);
        let Some(driver) = self.driver.as_ref() else {
            return;
        };

        match action {
            RecordingAction::None => {}
            RecordingAction::Start => {
                let Some(request) = self.controls.take_request() else {
                    warn!("Recording requested without a request, dropping it");
                    return;
                };
                info!(output = %request.output.display(), "Starting recording");
                let request = request.with_shared_context(driver.share_context());
                self.recorder.start_recording(request);
                self.recorder.set_texture_id(self.texture);
            }
            RecordingAction::Reshare => {
                info!("Resuming recording on new rendering context");
                self.recorder.update_shared_context(driver.share_context());
                self.recorder.set_texture_id(self.texture);
            }
            RecordingAction::Stop => {
                info!("Stopping recording");
                self.recorder.stop_recording();
            }
        }
        self.status = next;
    }

    /// Cached program for `filter`, compiling it on first use in this context
    fn program_for(&mut self, filter: FilterType) -> GpuResult<ProgramId> {
        if let Some(program) = self.programs.get(&filter) {
            return Ok(*program);
        }
        let Some(driver) = self.driver.as_mut() else {
            return Err(crate::gpu::GpuError::NoRenderTarget);
        };
        let descriptor = self.catalog.descriptor(filter);
        let program = driver.compile_program(&descriptor.program_source())?;
        debug!(filter = ?filter, program, "Compiled filter program");
        self.programs.insert(filter, program);
        Ok(program)
    }

    fn texel_size(&self) -> [f32; 2] {
        let (w, h) = self
            .preview_size
            .map(|s| (s.width, s.height))
            .or(self.frame_size)
            .or(self.surface)
            .unwrap_or((1, 1));
        [1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32]
    }

    /// Read back the last composited frame
    pub fn snapshot(&mut self) -> GpuResult<Option<RgbaImage>> {
        match self.driver.as_mut() {
            Some(driver) if self.surface.is_some() => driver.read_pixels().map(Some),
            _ => Ok(None),
        }
    }

    /// Release the texture, programs and context
    ///
    /// The recorder is told to let go of the texture before it is deleted.
    /// Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(target) = self.target.take() {
            target.release();
        }
        let Some(mut driver) = self.driver.take() else {
            return;
        };

        if self.status != RecordingStatus::Off {
            self.recorder.set_texture_id(NO_TEXTURE);
        }
        for (_, program) in self.programs.drain() {
            driver.delete_program(program);
        }
        if self.texture != NO_TEXTURE {
            driver.delete_texture(self.texture);
        }
        info!(texture = self.texture, frames = self.frames_drawn, "Render context released");
        self.texture = NO_TEXTURE;
        self.surface = None;
    }

    pub fn preview_target(&self) -> Option<Arc<PreviewTarget>> {
        self.target.clone()
    }

    pub fn has_context(&self) -> bool {
        self.driver.is_some()
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn active_filter(&self) -> FilterType {
        self.active_filter
    }

    pub fn texture_id(&self) -> TextureId {
        self.texture
    }

    /// Times the active filter changed at a draw
    pub fn program_switches(&self) -> u64 {
        self.program_switches
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ContextProvider, GpuError};
    use crate::testing::{FakeGpu, GpuCall, RecorderCall, RecorderLog};
    use std::path::PathBuf;

    fn setup(recorder: &Arc<RecorderLog>) -> (RenderPipeline, RenderControls, FakeGpu) {
        let controls = RenderControls::new();
        let controller: Arc<dyn RecordingController> = recorder.clone();
        let mut pipeline = RenderPipeline::new(
            FilterCatalog::default(),
            controls.clone(),
            controller,
            FilterType::Normal,
        );
        let gpu = FakeGpu::new();
        pipeline
            .on_surface_created(gpu.create_shared_driver().unwrap())
            .unwrap();
        pipeline.on_surface_changed(640, 480).unwrap();
        (pipeline, controls, gpu)
    }

    fn request() -> RecordingRequest {
        RecordingRequest::new(PathBuf::from("out.y4m"), 640, 480, 30, 4_000)
    }

    #[test]
    fn test_transition_table() {
        use RecordingAction as A;
        use RecordingStatus::*;
        assert_eq!(next_recording_status(Off, true), (A::Start, On));
        assert_eq!(next_recording_status(Resumed, true), (A::Reshare, On));
        assert_eq!(next_recording_status(On, true), (A::None, On));
        assert_eq!(next_recording_status(On, false), (A::Stop, Off));
        assert_eq!(next_recording_status(Resumed, false), (A::Stop, Off));
        assert_eq!(next_recording_status(Off, false), (A::None, Off));
    }

    #[test]
    fn test_resumed_is_never_a_transition_target() {
        for current in [RecordingStatus::Off, RecordingStatus::On, RecordingStatus::Resumed] {
            for requested in [false, true] {
                let (_, next) = next_recording_status(current, requested);
                assert_ne!(next, RecordingStatus::Resumed);
            }
        }
    }

    #[test]
    fn test_start_once_per_request() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);

        controls.start_recording(request());
        for _ in 0..3 {
            pipeline.draw_frame().unwrap();
        }
        assert_eq!(pipeline.status(), RecordingStatus::On);
        assert_eq!(
            recorder.control_calls(),
            vec![
                RecorderCall::Start {
                    width: 640,
                    height: 480,
                    context: Some(gpu.id()),
                },
                RecorderCall::Texture(pipeline.texture_id()),
            ]
        );

        controls.stop_recording();
        pipeline.draw_frame().unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::Off);
        assert_eq!(recorder.control_calls().last(), Some(&RecorderCall::Stop));
    }

    #[test]
    fn test_every_draw_notifies_recorder() {
        let recorder = RecorderLog::new();
        let (mut pipeline, _controls, _gpu) = setup(&recorder);
        for _ in 0..4 {
            pipeline.draw_frame().unwrap();
        }
        // recording never started, frames still forwarded
        assert_eq!(recorder.frames(), 4);
        assert!(recorder.calls().contains(&RecorderCall::Filter(FilterType::Normal)));
        assert!(recorder.control_calls().is_empty());
    }

    #[test]
    fn test_surface_created_while_recording_resumes() {
        let recorder = RecorderLog::new();
        recorder.set_recording(true);
        let (mut pipeline, controls, gpu) = setup(&recorder);
        assert_eq!(pipeline.status(), RecordingStatus::Resumed);

        controls.start_recording(request());
        pipeline.draw_frame().unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::On);
        assert_eq!(
            recorder.control_calls(),
            vec![
                RecorderCall::Context(gpu.id()),
                RecorderCall::Texture(pipeline.texture_id()),
            ]
        );
    }

    #[test]
    fn test_consumed_request_is_dropped_after_recreate() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);
        controls.start_recording(request());
        pipeline.draw_frame().unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::On);

        // recorder gave up on its own, then the surface came back
        recorder.set_recording(false);
        pipeline
            .on_surface_created(gpu.create_shared_driver().unwrap())
            .unwrap();
        pipeline.on_surface_changed(640, 480).unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::Off);

        pipeline.draw_frame().unwrap();
        pipeline.draw_frame().unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::Off);
        assert!(!controls.recording_requested());
        let starts = recorder
            .control_calls()
            .iter()
            .filter(|c| matches!(c, RecorderCall::Start { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_stop_from_resumed() {
        let recorder = RecorderLog::new();
        recorder.set_recording(true);
        let (mut pipeline, _controls, _gpu) = setup(&recorder);
        pipeline.draw_frame().unwrap();
        assert_eq!(pipeline.status(), RecordingStatus::Off);
        assert_eq!(recorder.control_calls(), vec![RecorderCall::Stop]);
    }

    #[test]
    fn test_filter_change_a_then_b_compiles_only_b() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);
        pipeline.draw_frame().unwrap();

        controls.set_filter(FilterType::Sepia);
        controls.set_filter(FilterType::Grayscale);
        pipeline.draw_frame().unwrap();

        assert_eq!(pipeline.program_switches(), 1);
        assert_eq!(pipeline.active_filter(), FilterType::Grayscale);
        assert_eq!(gpu.compiles(), vec!["normal".to_string(), "grayscale".to_string()]);
        let labels: Vec<String> = gpu.draws().into_iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["normal".to_string(), "grayscale".to_string()]);
    }

    #[test]
    fn test_programs_cached_per_context() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);
        pipeline.draw_frame().unwrap();
        controls.set_filter(FilterType::Emboss);
        pipeline.draw_frame().unwrap();
        controls.set_filter(FilterType::Normal);
        pipeline.draw_frame().unwrap();
        assert_eq!(gpu.compiles().len(), 2);

        // context loss: everything is compiled again
        pipeline
            .on_surface_created(gpu.create_shared_driver().unwrap())
            .unwrap();
        pipeline.on_surface_changed(640, 480).unwrap();
        pipeline.draw_frame().unwrap();
        assert_eq!(gpu.compiles().len(), 3);
    }

    #[test]
    fn test_latched_frame_updates_texture() {
        let recorder = RecorderLog::new();
        let (mut pipeline, _controls, gpu) = setup(&recorder);
        let target = pipeline.preview_target().unwrap();
        let data = vec![0u8; 4 * 4 * 4];
        target.post_frame(crate::backends::camera::types::CameraFrame::new(
            4,
            4,
            data.into(),
            0,
        ));
        pipeline.draw_frame().unwrap();
        pipeline.draw_frame().unwrap();

        let updates = gpu
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GpuCall::UpdateTexture(_)))
            .count();
        assert_eq!(updates, 1);
        assert_eq!(pipeline.frames_drawn(), 2);
    }

    #[test]
    fn test_compile_failure_is_reported() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);
        gpu.fail_compile("beauty");
        controls.set_filter(FilterType::Beauty);
        assert!(matches!(
            pipeline.draw_frame(),
            Err(GpuError::ShaderCompile { .. })
        ));
    }

    #[test]
    fn test_release_withdraws_texture_from_recorder() {
        let recorder = RecorderLog::new();
        let (mut pipeline, controls, gpu) = setup(&recorder);
        controls.start_recording(request());
        pipeline.draw_frame().unwrap();
        let texture = pipeline.texture_id();

        pipeline.release();
        pipeline.release();

        assert_eq!(
            recorder.control_calls().last(),
            Some(&RecorderCall::Texture(NO_TEXTURE))
        );
        assert_eq!(gpu.live_textures(), 0);
        let deletes = gpu
            .calls()
            .into_iter()
            .filter(|c| *c == GpuCall::DeleteTexture(texture))
            .count();
        assert_eq!(deletes, 1);
        assert!(!pipeline.has_context());
        // drawing without a context is a no-op
        assert!(pipeline.draw_frame().is_ok());
    }

    #[test]
    fn test_snapshot_reads_surface() {
        let recorder = RecorderLog::new();
        let (mut pipeline, _controls, _gpu) = setup(&recorder);
        pipeline.draw_frame().unwrap();
        let image = pipeline.snapshot().unwrap().unwrap();
        assert_eq!(image.dimensions(), (640, 480));
    }
}
