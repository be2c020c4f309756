// SPDX-License-Identifier: GPL-3.0-only

//! GPU driver abstraction
//!
//! A [`GpuDriver`] is one rendering context: it owns compiled programs and a
//! render target, and can see the texture objects of every context it shares
//! with. Contexts are shared by handing a [`SharedContext`] capability to
//! another thread, which attaches to it and gets its own driver.
//!
//! Every [`GpuError`] is fatal to the thread that hit it. The render thread
//! stops on the first one rather than keep drawing against a broken context.

pub mod matrix;
pub mod wgpu_driver;

pub use matrix::Mat4;
pub use wgpu_driver::WgpuContext;

use crate::backends::camera::types::CameraFrame;
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use std::sync::Arc;
use thiserror::Error;

/// Texture object name, unique across all contexts sharing a device
pub type TextureId = u32;

/// Program object name, unique within one context
pub type ProgramId = u32;

/// Sentinel for "no texture bound"
pub const NO_TEXTURE: TextureId = 0;

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// GPU failures. None of these are recoverable on the thread that hits them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GpuError {
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(String),
    #[error("program '{label}' failed to compile: {message}")]
    ShaderCompile { label: String, message: String },
    #[error("unknown texture {0}")]
    UnknownTexture(TextureId),
    #[error("unknown program {0}")]
    UnknownProgram(ProgramId),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("no render target, viewport not set")]
    NoRenderTarget,
    #[error("pixel readback failed: {0}")]
    Readback(String),
}

/// Shader program source handed to [`GpuDriver::compile_program`]
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    pub label: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
}

/// Uniform block shared by every filter program
///
/// Layout matches `struct FilterUniforms` in `shaders/common.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FilterUniforms {
    /// Vertex transform
    pub mvp: Mat4,
    /// Camera texture coordinate transform
    pub tex_matrix: Mat4,
    /// Per-filter level vector (beauty filter)
    pub level: [f32; 4],
    /// Convolution kernel weights 0-3
    pub kernel0: [f32; 4],
    /// Convolution kernel weights 4-7
    pub kernel1: [f32; 4],
    /// Kernel weight 8, color adjust
    pub kernel2: [f32; 4],
    /// Texel size (1/width, 1/height)
    pub texel: [f32; 4],
}

impl Default for FilterUniforms {
    fn default() -> Self {
        Self {
            mvp: matrix::IDENTITY,
            tex_matrix: matrix::IDENTITY,
            level: [0.0; 4],
            kernel0: [0.0; 4],
            kernel1: [0.0; 4],
            kernel2: [0.0; 4],
            texel: [0.0; 4],
        }
    }
}

/// One rendering context
///
/// All calls are made from the thread that owns the driver.
pub trait GpuDriver: Send {
    /// Capability that lets another thread attach to this context's objects
    fn share_context(&self) -> SharedContext;

    /// Compile and link a program
    fn compile_program(&mut self, source: &ProgramSource<'_>) -> GpuResult<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    /// Create an empty texture object that camera frames can be latched into
    fn create_texture(&mut self) -> GpuResult<TextureId>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Upload a camera frame into a texture, resizing it if needed
    fn update_texture(&mut self, texture: TextureId, frame: &CameraFrame) -> GpuResult<()>;

    /// Size the render target
    fn set_viewport(&mut self, width: u32, height: u32) -> GpuResult<()>;

    /// Draw a full-screen quad sampling `texture` through `program`
    fn draw(
        &mut self,
        program: ProgramId,
        texture: TextureId,
        uniforms: &FilterUniforms,
    ) -> GpuResult<()>;

    /// Read back the render target
    fn read_pixels(&mut self) -> GpuResult<RgbaImage>;
}

/// Something that can create drivers sharing one set of GPU objects
pub trait ContextProvider: Send + Sync {
    /// Identity of the share group
    fn id(&self) -> u64;

    /// Create a new context in the same share group
    fn create_shared_driver(&self) -> GpuResult<Box<dyn GpuDriver>>;
}

/// Usage rights on another thread's rendering context
///
/// Holding one keeps the underlying device alive, but does not transfer
/// ownership of any texture: the granting thread may delete its textures at
/// any time and the holder must stop using them when told to.
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<dyn ContextProvider>,
}

impl SharedContext {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self { inner: provider }
    }

    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Create a driver on the calling thread that sees the shared objects
    pub fn attach(&self) -> GpuResult<Box<dyn GpuDriver>> {
        self.inner.create_shared_driver()
    }

    /// Whether two handles name the same share group
    pub fn same_group(&self, other: &SharedContext) -> bool {
        self.id() == other.id()
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext")
            .field("id", &self.id())
            .finish()
    }
}
