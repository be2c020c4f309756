// SPDX-License-Identifier: GPL-3.0-only

//! Surface host
//!
//! Top-level owner of the camera pipeline. The host thread drives lifecycle
//! (resume, pause, destroy) and user requests (filter, camera, recording);
//! it never touches GPU state itself. Everything reaches the render thread
//! as a queued event and the camera as a capture message.
//!
//! Pause order matters: pending capture messages are dropped, the session is
//! suspended (releasing the camera), and only then is a render teardown
//! queued behind any draws already waiting. Destroy stops both threads and
//! discards what they had not yet run.

use crate::backends::camera::CameraHardware;
use crate::backends::camera::preview_target::PreviewTarget;
use crate::backends::camera::session::CameraSession;
use crate::backends::camera::types::Facing;
use crate::config::Config;
use crate::constants::timing;
use crate::errors::{AppError, AppResult, GpuError};
use crate::gpu::ContextProvider;
use crate::pipelines::capture::CaptureCoordinator;
use crate::pipelines::render::{RecordingStatus, RenderControls, RenderPipeline};
use crate::pipelines::render_thread::{RenderHandle, RenderThread};
use crate::pipelines::video::{RecordingController, RecordingRequest};
use crate::shaders::{FilterCatalog, FilterType};
use image::RgbaImage;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Called once a render surface has its first size
pub type PreparedListener = Box<dyn Fn(u32, u32) + Send>;

#[derive(Default)]
struct PreparedState {
    count: u64,
    listener: Option<PreparedListener>,
}

#[derive(Default)]
struct Prepared {
    state: Mutex<PreparedState>,
    changed: Condvar,
}

impl Prepared {
    fn lock(&self) -> MutexGuard<'_, PreparedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, width: u32, height: u32) {
        let mut state = self.lock();
        state.count += 1;
        if let Some(listener) = state.listener.as_ref() {
            listener(width, height);
        }
        self.changed.notify_all();
    }
}

/// Render-side counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_drawn: u64,
    pub program_switches: u64,
    pub filter: FilterType,
    pub recording: RecordingStatus,
}

pub struct SurfaceHost {
    session: Arc<CameraSession>,
    capture: CaptureCoordinator,
    render: RenderThread,
    controls: RenderControls,
    recorder: Arc<dyn RecordingController>,
    prepared: Arc<Prepared>,
    surface: (u32, u32),
    resumes: u64,
    active: bool,
    destroyed: bool,
}

impl SurfaceHost {
    /// Build the session and start the capture and render threads
    ///
    /// Nothing is opened or rendered until [`resume`](Self::resume).
    pub fn new(
        config: &Config,
        hardware: Arc<dyn CameraHardware>,
        gpu: Arc<dyn ContextProvider>,
        recorder: Arc<dyn RecordingController>,
    ) -> AppResult<Self> {
        let session = Arc::new(CameraSession::new(
            hardware,
            config.facing,
            config.mirror_preview,
            config.display_rotation(),
        ));
        let capture = CaptureCoordinator::spawn(Arc::clone(&session), config.target_fps)?;

        let controls = RenderControls::new();
        let pipeline = RenderPipeline::new(
            FilterCatalog::new(config.beauty_level()),
            controls.clone(),
            Arc::clone(&recorder),
            config.default_filter,
        );

        let prepared = Arc::new(Prepared::default());
        let on_ready = {
            let capture = capture.handle();
            let prepared = Arc::clone(&prepared);
            Box::new(
                move |render: &RenderHandle, target: Arc<PreviewTarget>, width, height| {
                    let render = render.clone();
                    target.set_on_frame_available(Arc::new(move || render.request_render()));
                    capture.setup_camera(width, height, target);
                    prepared.notify(width, height);
                },
            )
        };
        let render = RenderThread::spawn(pipeline, gpu, on_ready)?;

        let render_handle = render.handle();
        capture.set_preview_size_listener(Box::new(move |size| {
            render_handle.queue(move |pipeline| {
                pipeline.set_preview_size(size);
                Ok(())
            });
        }));

        info!(
            facing = %config.facing,
            filter = %config.default_filter,
            rotation = config.display_rotation,
            "Surface host created"
        );

        Ok(Self {
            session,
            capture,
            render,
            controls,
            recorder,
            prepared,
            surface: (config.surface_width, config.surface_height),
            resumes: 0,
            active: false,
            destroyed: false,
        })
    }

    /// Register a readiness listener, called on the render thread
    pub fn on_prepared(&self, listener: PreparedListener) {
        self.prepared.lock().listener = Some(listener);
    }

    /// Wait until the surface created by the last resume is ready
    pub fn wait_prepared(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.prepared.lock();
        while state.count < self.resumes {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .prepared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Create a render surface; the camera opens once it is ready
    pub fn resume(&mut self) {
        if self.destroyed || self.active {
            debug!(active = self.active, "Ignoring resume");
            return;
        }
        let (width, height) = self.surface;
        self.session.resume();
        self.render.surface_created();
        self.render.surface_changed(width, height);
        self.resumes += 1;
        self.active = true;
        info!(width, height, "Surface host resumed");
    }

    pub fn surface_changed(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
        if self.active {
            self.render.surface_changed(width, height);
        }
    }

    /// Drop pending camera work, release the camera, then tear down rendering
    ///
    /// The session stays suspended until the next resume, so a setup the
    /// render thread posts after this point never reopens the camera.
    pub fn pause(&mut self) {
        if !self.active {
            return;
        }
        self.capture.clear_pending();
        self.session.suspend();
        self.render.queue_teardown();
        self.active = false;
        info!("Surface host paused");
    }

    /// Stop both threads; idempotent
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.pause();
        self.capture.shutdown();
        self.render.shutdown();
        self.destroyed = true;
        info!("Surface host destroyed");
    }

    /// Takes effect at the next draw
    pub fn change_filter(&self, filter: FilterType) {
        debug!(filter = ?filter, "Filter change requested");
        self.controls.set_filter(filter);
    }

    /// Switch between front and back cameras, reopening on the current surface
    pub fn switch_camera(&self) -> Facing {
        let facing = self.session.facing().toggled();
        self.session.set_facing(facing);
        info!(facing = %facing, "Switching camera");

        if self.active {
            self.capture.clear_pending();
            let capture = self.capture.handle();
            let (width, height) = self.surface;
            self.render.queue(move |pipeline| {
                if let Some(target) = pipeline.preview_target() {
                    capture.setup_camera(width, height, target);
                }
                Ok(())
            });
        }
        facing
    }

    pub fn start_recording(&self, request: RecordingRequest) {
        info!(output = %request.output.display(), "Recording requested");
        self.controls.start_recording(request);
        self.render.request_render();
    }

    pub fn stop_recording(&self) {
        info!("Recording stop requested");
        self.controls.stop_recording();
        self.render.request_render();
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn request_render(&self) {
        self.render.request_render();
    }

    /// Read back the composited preview
    ///
    /// `Ok(None)` when there is no surface or the render thread is gone.
    pub fn snapshot(&self) -> AppResult<Option<RgbaImage>> {
        match self
            .render
            .call(|pipeline| pipeline.snapshot(), timing::SNAPSHOT_TIMEOUT)
        {
            Some(result) => result.map_err(AppError::from),
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> Option<RenderStats> {
        self.render.call(
            |pipeline| RenderStats {
                frames_drawn: pipeline.frames_drawn(),
                program_switches: pipeline.program_switches(),
                filter: pipeline.active_filter(),
                recording: pipeline.status(),
            },
            timing::SNAPSHOT_TIMEOUT,
        )
    }

    /// Wait until queued camera work has finished
    pub fn wait_camera_idle(&self, timeout: Duration) -> bool {
        self.capture.wait_idle(timeout)
    }

    /// The GPU error that stopped rendering, if any
    pub fn fatal_error(&self) -> Option<GpuError> {
        self.render.fatal_error()
    }

    pub fn session(&self) -> &Arc<CameraSession> {
        &self.session
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for SurfaceHost {
    fn drop(&mut self) {
        self.destroy();
    }
}
