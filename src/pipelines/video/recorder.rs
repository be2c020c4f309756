// SPDX-License-Identifier: GPL-3.0-only

//! Threaded texture recorder
//!
//! [`TextureRecorder`] implements [`RecordingController`] by forwarding every
//! call over a channel to its own thread. On start, that thread attaches to
//! the rendering context granted in the request, then for each frame renders
//! the shared camera texture through the active filter at the output size,
//! reads the pixels back and hands them to a [`VideoSink`].
//!
//! The recorder only ever has usage rights on the camera texture. Setting the
//! texture to `NO_TEXTURE` is a synchronous handoff: the call returns once
//! every frame queued before it has been encoded, so the render thread may
//! delete the texture afterwards.
//!
//! `is_recording` follows the caller's last start or stop at once. Every
//! start and stop bumps a generation, and the worker only clears the flag on
//! failure when no newer request has been made since.

use super::y4m::Y4mWriter;
use super::{RecordingController, RecordingRequest};
use crate::constants::{threads, timing};
use crate::errors::RecordingError;
use crate::gpu::{GpuDriver, GpuError, Mat4, NO_TEXTURE, ProgramId, SharedContext, TextureId, matrix};
use crate::shaders::{FilterCatalog, FilterType};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Destination for rendered frames
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &RgbaImage, timestamp_ns: u64) -> Result<(), RecordingError>;

    /// Flush and close the output
    fn finish(&mut self) -> Result<(), RecordingError>;
}

/// Opens the sink for a request
pub type SinkFactory =
    Box<dyn Fn(&RecordingRequest) -> Result<Box<dyn VideoSink>, RecordingError> + Send>;

fn open_y4m(request: &RecordingRequest) -> Result<Box<dyn VideoSink>, RecordingError> {
    let sink = Y4mWriter::create(
        &request.output,
        request.width,
        request.height,
        request.frame_rate,
    )?;
    Ok(Box::new(sink))
}

/// Recording flag plus the generation of the request that last set it
#[derive(Debug, Default)]
struct Status {
    generation: u64,
    recording: bool,
}

#[derive(Clone, Default)]
struct SharedStatus(Arc<Mutex<Status>>);

impl SharedStatus {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the flag unless a newer start or stop has been requested
    fn clear_if_current(&self, generation: u64) {
        let mut status = self.lock();
        if status.generation == generation {
            status.recording = false;
        }
    }
}

enum Command {
    Start(RecordingRequest, u64),
    Stop,
    Texture(TextureId, Option<mpsc::SyncSender<()>>),
    Context(SharedContext),
    Filter(FilterType),
    Frame { tex_matrix: Mat4, timestamp_ns: u64 },
    Shutdown,
}

pub struct TextureRecorder {
    commands: mpsc::Sender<Command>,
    status: SharedStatus,
    frames: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TextureRecorder {
    /// Recorder writing YUV4MPEG2 files
    pub fn new(catalog: FilterCatalog) -> Result<Self, RecordingError> {
        Self::with_sink_factory(catalog, Box::new(open_y4m))
    }

    pub fn with_sink_factory(
        catalog: FilterCatalog,
        make_sink: SinkFactory,
    ) -> Result<Self, RecordingError> {
        let (commands, receiver) = mpsc::channel();
        let status = SharedStatus::default();
        let frames = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            catalog,
            make_sink,
            status: status.clone(),
            frames: Arc::clone(&frames),
            texture: NO_TEXTURE,
            filter: FilterType::default(),
            active: None,
        };
        let handle = std::thread::Builder::new()
            .name(threads::RECORDER.into())
            .spawn(move || worker.run(receiver))
            .map_err(|e| RecordingError::Spawn(e.to_string()))?;

        Ok(Self {
            commands,
            status,
            frames,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Frames written across all recordings
    pub fn frames_encoded(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Recorder thread has exited, dropping command");
        }
    }
}

impl RecordingController for TextureRecorder {
    fn is_recording(&self) -> bool {
        self.status.lock().recording
    }

    fn start_recording(&self, request: RecordingRequest) {
        // sent under the lock so generations reach the worker in order
        let mut status = self.status.lock();
        status.generation += 1;
        status.recording = true;
        self.send(Command::Start(request, status.generation));
    }

    fn stop_recording(&self) {
        let mut status = self.status.lock();
        status.generation += 1;
        status.recording = false;
        self.send(Command::Stop);
    }

    fn set_texture_id(&self, texture: TextureId) {
        if texture != NO_TEXTURE {
            self.send(Command::Texture(texture, None));
            return;
        }

        let (ack, acked) = mpsc::sync_channel(1);
        self.send(Command::Texture(NO_TEXTURE, Some(ack)));
        if acked.recv_timeout(timing::RECORDER_DETACH_TIMEOUT).is_err() {
            warn!("Recorder did not release the texture in time");
        }
    }

    fn update_shared_context(&self, context: SharedContext) {
        self.send(Command::Context(context));
    }

    fn update_filter(&self, filter: FilterType) {
        self.send(Command::Filter(filter));
    }

    fn frame_available(&self, tex_matrix: &Mat4, timestamp_ns: u64) {
        if self.is_recording() {
            self.send(Command::Frame {
                tex_matrix: *tex_matrix,
                timestamp_ns,
            });
        }
    }
}

impl Drop for TextureRecorder {
    fn drop(&mut self) {
        self.send(Command::Shutdown);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Recorder thread panicked");
        }
    }
}

/// One recording in progress, owned by the recorder thread
struct ActiveRecording {
    driver: Box<dyn GpuDriver>,
    programs: HashMap<FilterType, ProgramId>,
    sink: Box<dyn VideoSink>,
    context: SharedContext,
    generation: u64,
    output: PathBuf,
    width: u32,
    height: u32,
    written: u64,
}

impl ActiveRecording {
    fn encode(
        &mut self,
        catalog: &FilterCatalog,
        filter: FilterType,
        texture: TextureId,
        tex_matrix: &Mat4,
        timestamp_ns: u64,
    ) -> Result<(), RecordingError> {
        let descriptor = catalog.descriptor(filter);
        let program = match self.programs.get(&filter) {
            Some(program) => *program,
            None => {
                let program = self.driver.compile_program(&descriptor.program_source())?;
                self.programs.insert(filter, program);
                program
            }
        };

        let texel = [1.0 / self.width as f32, 1.0 / self.height as f32];
        let uniforms = descriptor.uniforms(matrix::IDENTITY, *tex_matrix, texel);
        self.driver.draw(program, texture, &uniforms)?;
        let image = self.driver.read_pixels()?;
        self.sink.write_frame(&image, timestamp_ns)?;
        self.written += 1;
        Ok(())
    }
}

struct Worker {
    catalog: FilterCatalog,
    make_sink: SinkFactory,
    status: SharedStatus,
    frames: Arc<AtomicU64>,
    texture: TextureId,
    filter: FilterType,
    active: Option<ActiveRecording>,
}

impl Worker {
    fn run(mut self, commands: mpsc::Receiver<Command>) {
        debug!("Recorder thread started");
        while let Ok(command) = commands.recv() {
            match command {
                Command::Start(request, generation) => self.start(request, generation),
                Command::Stop => self.finish(),
                Command::Texture(texture, ack) => {
                    self.texture = texture;
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                Command::Context(context) => self.reshare(context),
                Command::Filter(filter) => self.filter = filter,
                Command::Frame {
                    tex_matrix,
                    timestamp_ns,
                } => self.encode(&tex_matrix, timestamp_ns),
                Command::Shutdown => break,
            }
        }
        self.finish();
        self.status.lock().recording = false;
        debug!("Recorder thread exiting");
    }

    fn start(&mut self, request: RecordingRequest, generation: u64) {
        if self.active.is_some() {
            warn!(error = %RecordingError::AlreadyRecording, "Ignoring start request");
            return;
        }
        let output = request.output.clone();
        match self.open(request, generation) {
            Ok(active) => {
                info!(
                    output = %active.output.display(),
                    width = active.width,
                    height = active.height,
                    "Recording started"
                );
                self.active = Some(active);
            }
            Err(e) => {
                error!(output = %output.display(), error = %e, "Failed to start recording");
                self.status.clear_if_current(generation);
            }
        }
    }

    fn open(
        &self,
        request: RecordingRequest,
        generation: u64,
    ) -> Result<ActiveRecording, RecordingError> {
        let context = request
            .shared_context
            .clone()
            .ok_or(RecordingError::NoSharedContext)?;
        let mut driver = context.attach()?;
        driver.set_viewport(request.width, request.height)?;
        let sink = (self.make_sink)(&request)?;
        debug!(
            context = context.id(),
            bitrate_kbps = request.bitrate_kbps,
            "Recorder attached to shared context"
        );

        Ok(ActiveRecording {
            driver,
            programs: HashMap::new(),
            sink,
            context,
            generation,
            output: request.output,
            width: request.width,
            height: request.height,
            written: 0,
        })
    }

    /// Attach to a new share group after the render context was recreated
    fn reshare(&mut self, context: SharedContext) {
        let Some(active) = self.active.as_mut() else {
            debug!(context = context.id(), "No recording to reshare, ignoring context");
            return;
        };
        if active.context.same_group(&context) {
            debug!(context = context.id(), "Recorder already in this share group");
            return;
        }
        let attached = context.attach().and_then(|mut driver| {
            driver.set_viewport(active.width, active.height)?;
            Ok(driver)
        });
        match attached {
            Ok(driver) => {
                info!(context = context.id(), "Recorder reattached to rendering context");
                active.driver = driver;
                active.context = context;
                active.programs.clear();
            }
            Err(e) => {
                error!(error = %e, "Failed to attach to shared context");
                self.abort();
            }
        }
    }

    fn encode(&mut self, tex_matrix: &Mat4, timestamp_ns: u64) {
        if self.texture == NO_TEXTURE {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match active.encode(&self.catalog, self.filter, self.texture, tex_matrix, timestamp_ns) {
            Ok(()) => {
                let n = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
                if n % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(frames = n, timestamp_ns, "Recorder progress");
                }
            }
            Err(RecordingError::Gpu(GpuError::UnknownTexture(texture))) => {
                debug!(texture, "Camera texture gone, dropping frame");
            }
            Err(e) => {
                error!(error = %e, "Recording failed");
                self.abort();
            }
        }
    }

    /// Close the active output; the flag is the caller's to change
    fn finish(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.sink.finish() {
                error!(output = %active.output.display(), error = %e, "Failed to finish output");
            }
            info!(
                output = %active.output.display(),
                frames = active.written,
                "Recording stopped"
            );
        }
    }

    /// Stop after a failure the caller did not ask for
    fn abort(&mut self) {
        let generation = self.active.as_ref().map(|active| active.generation);
        self.finish();
        if let Some(generation) = generation {
            self.status.clear_if_current(generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ContextProvider;
    use crate::testing::{FakeGpu, wait_for};

    type Written = Arc<Mutex<Vec<(u32, u32, u64)>>>;

    struct MemorySink {
        written: Written,
    }

    impl VideoSink for MemorySink {
        fn write_frame(&mut self, frame: &RgbaImage, timestamp_ns: u64) -> Result<(), RecordingError> {
            self.written
                .lock()
                .unwrap()
                .push((frame.width(), frame.height(), timestamp_ns));
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecordingError> {
            Ok(())
        }
    }

    fn recorder() -> (TextureRecorder, Written) {
        let written: Written = Arc::default();
        let sink_log = Arc::clone(&written);
        let recorder = TextureRecorder::with_sink_factory(
            FilterCatalog::default(),
            Box::new(
                move |_: &RecordingRequest| -> Result<Box<dyn VideoSink>, RecordingError> {
                    Ok(Box::new(MemorySink {
                        written: Arc::clone(&sink_log),
                    }))
                },
            ),
        )
        .unwrap();
        (recorder, written)
    }

    /// A render-side driver with one camera texture
    fn render_side(gpu: &FakeGpu) -> (Box<dyn GpuDriver>, TextureId) {
        let mut driver = gpu.create_shared_driver().unwrap();
        let texture = driver.create_texture().unwrap();
        (driver, texture)
    }

    fn request(context: Option<SharedContext>) -> RecordingRequest {
        let request = RecordingRequest::new(PathBuf::from("unused.y4m"), 320, 240, 30, 2_000);
        match context {
            Some(context) => request.with_shared_context(context),
            None => request,
        }
    }

    #[test]
    fn test_records_shared_texture() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.update_filter(FilterType::Sepia);
        for ts in 1..=3 {
            recorder.frame_available(&matrix::IDENTITY, ts);
        }
        // handoff doubles as a barrier
        recorder.set_texture_id(NO_TEXTURE);

        assert!(recorder.is_recording());
        assert_eq!(
            *written.lock().unwrap(),
            vec![(320, 240, 1), (320, 240, 2), (320, 240, 3)]
        );
        // the recorder compiled its own program on its own context
        let draws = gpu.draws();
        assert_eq!(draws.len(), 3);
        assert!(draws.iter().all(|(d, label)| *d == 2 && label == "sepia"));

        recorder.stop_recording();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.frames_encoded(), 3);
    }

    #[test]
    fn test_no_frames_without_texture() {
        let gpu = FakeGpu::new();
        let (driver, _texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.set_texture_id(NO_TEXTURE);
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_without_context_fails() {
        let (recorder, _written) = recorder();
        recorder.start_recording(request(None));
        assert!(wait_for(|| !recorder.is_recording()));
    }

    #[test]
    fn test_deleted_texture_drops_frame_only() {
        let gpu = FakeGpu::new();
        let (mut driver, texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        driver.delete_texture(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.set_texture_id(NO_TEXTURE);

        assert!(written.lock().unwrap().is_empty());
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_reshare_same_group_keeps_driver() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, _written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.update_shared_context(driver.share_context());
        recorder.frame_available(&matrix::IDENTITY, 2);
        recorder.set_texture_id(NO_TEXTURE);

        assert_eq!(gpu.compiles(), vec!["normal".to_string()]);
        let drivers: Vec<u32> = gpu.draws().into_iter().map(|(d, _)| d).collect();
        assert_eq!(drivers, vec![2, 2]);
    }

    #[test]
    fn test_reshare_recompiles_on_new_group() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, _written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);

        let recreated = FakeGpu::new();
        let (new_driver, new_texture) = render_side(&recreated);
        recorder.update_shared_context(new_driver.share_context());
        recorder.set_texture_id(new_texture);
        recorder.frame_available(&matrix::IDENTITY, 2);
        recorder.set_texture_id(NO_TEXTURE);

        assert_eq!(gpu.draws(), vec![(2, "normal".to_string())]);
        assert_eq!(recreated.compiles(), vec!["normal".to_string()]);
        assert_eq!(recreated.draws(), vec![(2, "normal".to_string())]);
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_stop_then_start_keeps_recording() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.stop_recording();
        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.set_texture_id(NO_TEXTURE);

        assert!(recorder.is_recording());
        assert_eq!(*written.lock().unwrap(), vec![(320, 240, 1)]);
    }

    #[test]
    fn test_failed_start_keeps_newer_start() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        // the first start fails, but a newer start is already queued
        recorder.start_recording(request(None));
        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.set_texture_id(NO_TEXTURE);

        assert!(recorder.is_recording());
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let (recorder, written) = recorder();

        recorder.start_recording(request(Some(driver.share_context())));
        recorder.start_recording(request(Some(driver.share_context())));
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.set_texture_id(NO_TEXTURE);
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_writes_y4m_file() {
        let dir = tempfile::tempdir().unwrap();
        let gpu = FakeGpu::new();
        let (driver, texture) = render_side(&gpu);
        let recorder = TextureRecorder::new(FilterCatalog::default()).unwrap();
        let output = dir.path().join("clip.y4m");

        recorder.start_recording(
            RecordingRequest::new(output.clone(), 8, 8, 30, 500)
                .with_shared_context(driver.share_context()),
        );
        recorder.set_texture_id(texture);
        recorder.frame_available(&matrix::IDENTITY, 1);
        recorder.stop_recording();
        drop(recorder);

        let bytes = std::fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"YUV4MPEG2 W8 H8 F30:1"));
        assert!(bytes.windows(6).any(|w| w == b"FRAME\n"));
    }
}
