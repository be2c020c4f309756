// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the camera, GPU and recorder collaborators

use crate::backends::camera::preview_target::PreviewTarget;
use crate::backends::camera::types::*;
use crate::backends::camera::{CameraHandle, CameraHardware};
use crate::gpu::{
    ContextProvider, FilterUniforms, GpuDriver, GpuError, GpuResult, Mat4, ProgramId,
    ProgramSource, SharedContext, TextureId,
};
use crate::pipelines::video::{RecordingController, RecordingRequest};
use crate::shaders::FilterType;
use image::RgbaImage;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

/// Poll `check` until it holds or two seconds pass
pub fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

// ---------------------------------------------------------------------------
// Camera hardware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCall {
    Open(String),
    Bind(TextureId),
    Orientation(u32, bool),
    Apply(u32, u32),
    StartPreview,
    AutoFocus,
    StopPreview,
    ClearCallback,
    Release,
}

#[derive(Default)]
struct FakeCameraState {
    calls: Vec<HardwareCall>,
    open: usize,
    fail_open: bool,
    fail_start: bool,
    target: Option<Arc<PreviewTarget>>,
}

/// Scripted camera service with a call log
pub struct FakeCamera {
    devices: Vec<DeviceDescriptor>,
    state: Arc<Mutex<FakeCameraState>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Self::with_devices(&[("front", Facing::Front), ("back", Facing::Back)])
    }

    pub fn with_devices(devices: &[(&str, Facing)]) -> Arc<Self> {
        Arc::new(Self {
            devices: devices
                .iter()
                .map(|(id, facing)| DeviceDescriptor {
                    id: id.to_string(),
                    name: format!("Fake {}", id),
                    facing: *facing,
                })
                .collect(),
            state: Arc::new(Mutex::new(FakeCameraState::default())),
            gate: Mutex::new(None),
        })
    }

    /// Make the next `open` block until the returned sender fires or drops
    pub fn hold_next_open(&self) -> mpsc::Sender<()> {
        let (release, held) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(held);
        release
    }

    pub fn calls(&self) -> Vec<HardwareCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Handles currently open
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    /// Post a frame into the currently bound preview target
    pub fn post_frame(&self, width: u32, height: u32, sequence: u64) -> bool {
        let target = self.state.lock().unwrap().target.clone();
        match target {
            Some(target) => {
                let data = vec![128u8; (width * height * 4) as usize];
                target.post_frame(CameraFrame::new(width, height, data.into(), sequence));
                true
            }
            None => false,
        }
    }
}

impl CameraHardware for FakeCamera {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.clone()
    }

    fn open(&self, id: &str) -> BackendResult<Box<dyn CameraHandle>> {
        let held = self.gate.lock().unwrap().take();
        if let Some(held) = held {
            let _ = held.recv_timeout(Duration::from_secs(2));
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(BackendError::NotAvailable(id.to_string()));
        }
        let descriptor = self
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))?;
        state.calls.push(HardwareCall::Open(id.to_string()));
        state.open += 1;
        Ok(Box::new(FakeHandle {
            descriptor,
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

struct FakeHandle {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<FakeCameraState>>,
    released: bool,
}

impl FakeHandle {
    fn log(&self, call: HardwareCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl CameraHandle for FakeHandle {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn bind_preview_target(&mut self, target: Arc<PreviewTarget>) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HardwareCall::Bind(target.texture_id()));
        state.target = Some(target);
        Ok(())
    }

    fn set_display_orientation(
        &mut self,
        rotation: SensorRotation,
        mirrored: bool,
    ) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(HardwareCall::Orientation(rotation.degrees(), mirrored));
        if let Some(target) = &state.target {
            target.set_orientation(rotation, mirrored);
        }
        Ok(())
    }

    fn capabilities(&self) -> BackendResult<Capabilities> {
        Ok(Capabilities {
            sizes: vec![
                PreviewSize::new(640, 480),
                PreviewSize::new(1280, 720),
                PreviewSize::new(320, 240),
            ],
            fps_ranges: vec![FpsRange::new(15_000, 30_000), FpsRange::new(7_500, 15_000)],
        })
    }

    fn apply_capabilities(&mut self, settings: &CaptureSettings) -> BackendResult<()> {
        self.log(HardwareCall::Apply(settings.size.width, settings.size.height));
        Ok(())
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HardwareCall::StartPreview);
        if state.fail_start {
            return Err(BackendError::IoError("start failed".into()));
        }
        Ok(())
    }

    fn auto_focus(&mut self) -> BackendResult<()> {
        self.log(HardwareCall::AutoFocus);
        Ok(())
    }

    fn stop_preview(&mut self) -> BackendResult<()> {
        self.log(HardwareCall::StopPreview);
        Ok(())
    }

    fn clear_frame_callback(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(HardwareCall::ClearCallback);
        state.target = None;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap();
        state.calls.push(HardwareCall::Release);
        state.open -= 1;
        state.target = None;
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// GPU
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCall {
    CreateDriver(u32),
    Compile { driver: u32, label: String },
    DeleteProgram { driver: u32, program: ProgramId },
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    UpdateTexture(TextureId),
    Viewport { driver: u32, width: u32, height: u32 },
    Draw { driver: u32, label: String, texture: TextureId },
    ReadPixels { driver: u32 },
    DropDriver(u32),
}

struct FakeGpuState {
    calls: Vec<GpuCall>,
    textures: HashSet<TextureId>,
    next_texture: TextureId,
    next_driver: u32,
    fail_compile: Option<String>,
    fail_draw: bool,
}

static NEXT_FAKE_GROUP: AtomicU64 = AtomicU64::new(1000);

/// GPU share group that logs every driver call
#[derive(Clone)]
pub struct FakeGpu {
    id: u64,
    state: Arc<Mutex<FakeGpuState>>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            id: NEXT_FAKE_GROUP.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(FakeGpuState {
                calls: Vec::new(),
                textures: HashSet::new(),
                next_texture: 1,
                next_driver: 1,
                fail_compile: None,
                fail_draw: false,
            })),
        }
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// (driver, program label) for every draw
    pub fn draws(&self) -> Vec<(u32, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::Draw { driver, label, .. } => Some((driver, label)),
                _ => None,
            })
            .collect()
    }

    /// Program labels compiled, in order
    pub fn compiles(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::Compile { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().unwrap().textures.len()
    }

    pub fn fail_compile(&self, label: &str) {
        self.state.lock().unwrap().fail_compile = Some(label.to_string());
    }

    pub fn fail_draw(&self, fail: bool) {
        self.state.lock().unwrap().fail_draw = fail;
    }

    fn log(&self, call: GpuCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl ContextProvider for FakeGpu {
    fn id(&self) -> u64 {
        self.id
    }

    fn create_shared_driver(&self) -> GpuResult<Box<dyn GpuDriver>> {
        let ordinal = {
            let mut state = self.state.lock().unwrap();
            let ordinal = state.next_driver;
            state.next_driver += 1;
            state.calls.push(GpuCall::CreateDriver(ordinal));
            ordinal
        };
        Ok(Box::new(FakeDriver {
            ordinal,
            gpu: self.clone(),
            programs: HashMap::new(),
            next_program: 1,
            viewport: None,
        }))
    }
}

pub struct FakeDriver {
    ordinal: u32,
    gpu: FakeGpu,
    programs: HashMap<ProgramId, String>,
    next_program: ProgramId,
    viewport: Option<(u32, u32)>,
}

impl GpuDriver for FakeDriver {
    fn share_context(&self) -> SharedContext {
        SharedContext::new(Arc::new(self.gpu.clone()))
    }

    fn compile_program(&mut self, source: &ProgramSource<'_>) -> GpuResult<ProgramId> {
        let fail = self.gpu.state.lock().unwrap().fail_compile.as_deref() == Some(source.label);
        if fail {
            return Err(GpuError::ShaderCompile {
                label: source.label.to_string(),
                message: "injected".into(),
            });
        }
        self.gpu.log(GpuCall::Compile {
            driver: self.ordinal,
            label: source.label.to_string(),
        });
        let id = self.next_program;
        self.next_program += 1;
        self.programs.insert(id, source.label.to_string());
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.gpu.log(GpuCall::DeleteProgram {
            driver: self.ordinal,
            program,
        });
    }

    fn create_texture(&mut self) -> GpuResult<TextureId> {
        let mut state = self.gpu.state.lock().unwrap();
        let id = state.next_texture;
        state.next_texture += 1;
        state.textures.insert(id);
        state.calls.push(GpuCall::CreateTexture(id));
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let mut state = self.gpu.state.lock().unwrap();
        state.textures.remove(&texture);
        state.calls.push(GpuCall::DeleteTexture(texture));
    }

    fn update_texture(&mut self, texture: TextureId, _frame: &CameraFrame) -> GpuResult<()> {
        let mut state = self.gpu.state.lock().unwrap();
        if !state.textures.contains(&texture) {
            return Err(GpuError::UnknownTexture(texture));
        }
        state.calls.push(GpuCall::UpdateTexture(texture));
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> GpuResult<()> {
        self.viewport = Some((width, height));
        self.gpu.log(GpuCall::Viewport {
            driver: self.ordinal,
            width,
            height,
        });
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramId,
        texture: TextureId,
        _uniforms: &FilterUniforms,
    ) -> GpuResult<()> {
        let label = self
            .programs
            .get(&program)
            .cloned()
            .ok_or(GpuError::UnknownProgram(program))?;
        if self.viewport.is_none() {
            return Err(GpuError::NoRenderTarget);
        }
        let mut state = self.gpu.state.lock().unwrap();
        if state.fail_draw {
            return Err(GpuError::InvalidFrame("injected".into()));
        }
        if !state.textures.contains(&texture) {
            return Err(GpuError::UnknownTexture(texture));
        }
        state.calls.push(GpuCall::Draw {
            driver: self.ordinal,
            label,
            texture,
        });
        Ok(())
    }

    fn read_pixels(&mut self) -> GpuResult<RgbaImage> {
        let (width, height) = self.viewport.ok_or(GpuError::NoRenderTarget)?;
        self.gpu.log(GpuCall::ReadPixels {
            driver: self.ordinal,
        });
        Ok(RgbaImage::new(width, height))
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.gpu.log(GpuCall::DropDriver(self.ordinal));
    }
}

// ---------------------------------------------------------------------------
// Recording controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderCall {
    Start {
        width: u32,
        height: u32,
        context: Option<u64>,
    },
    Stop,
    Texture(TextureId),
    Context(u64),
    Filter(FilterType),
    Frame(u64),
}

/// Recording controller that only records what it was told
#[derive(Default)]
pub struct RecorderLog {
    recording: AtomicBool,
    calls: Mutex<Vec<RecorderCall>>,
}

impl RecorderLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend a recording is already running
    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than the per-draw filter and frame notifications
    pub fn control_calls(&self) -> Vec<RecorderCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, RecorderCall::Filter(_) | RecorderCall::Frame(_)))
            .collect()
    }

    pub fn frames(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RecorderCall::Frame(_)))
            .count()
    }

    fn log(&self, call: RecorderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RecordingController for RecorderLog {
    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn start_recording(&self, request: RecordingRequest) {
        self.recording.store(true, Ordering::SeqCst);
        self.log(RecorderCall::Start {
            width: request.width,
            height: request.height,
            context: request.shared_context.as_ref().map(|c| c.id()),
        });
    }

    fn stop_recording(&self) {
        self.recording.store(false, Ordering::SeqCst);
        self.log(RecorderCall::Stop);
    }

    fn set_texture_id(&self, texture: TextureId) {
        self.log(RecorderCall::Texture(texture));
    }

    fn update_shared_context(&self, context: SharedContext) {
        self.log(RecorderCall::Context(context.id()));
    }

    fn update_filter(&self, filter: FilterType) {
        self.log(RecorderCall::Filter(filter));
    }

    fn frame_available(&self, _tex_matrix: &Mat4, timestamp_ns: u64) {
        self.log(RecorderCall::Frame(timestamp_ns));
    }
}
