// SPDX-License-Identifier: GPL-3.0-only

//! wgpu-backed rendering contexts
//!
//! A [`WgpuContext`] owns one wgpu device and the table of camera textures.
//! Every driver created from it is one rendering context: it has its own
//! programs, uniform buffer and offscreen render target, and sees every
//! texture in the shared table. That is the share-group model the render
//! thread and the recorder rely on.

use super::{
    ContextProvider, FilterUniforms, GpuDriver, GpuError, GpuResult, ProgramId, ProgramSource,
    SharedContext, TextureId,
};
use crate::backends::camera::types::CameraFrame;
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Pixel format of every render target
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// A camera texture and its current size
struct CameraTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct TextureTable {
    next_id: TextureId,
    entries: HashMap<TextureId, CameraTexture>,
}

/// State shared by every context in one share group
struct DeviceShared {
    id: u64,
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    textures: Mutex<TextureTable>,
}

impl DeviceShared {
    fn textures(&self) -> MutexGuard<'_, TextureTable> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_camera_texture(&self, width: u32, height: u32) -> CameraTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("camera_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        CameraTexture {
            texture,
            view,
            width,
            height,
        }
    }
}

/// A wgpu device that rendering contexts can be created from
#[derive(Clone)]
pub struct WgpuContext {
    shared: Arc<DeviceShared>,
}

impl WgpuContext {
    /// Create a device on the first suitable adapter
    pub fn new() -> GpuResult<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> GpuResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::NoAdapter(e.to_string()))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected for rendering"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("filtercam_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| GpuError::DeviceCreation(e.to_string()))?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter_bind_group_layout"),
            entries: &[
                // Uniform block
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Camera texture
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("camera_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            shared: Arc::new(DeviceShared {
                id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
                adapter_name: adapter_info.name,
                device,
                queue,
                bind_group_layout,
                pipeline_layout,
                sampler,
                textures: Mutex::new(TextureTable {
                    next_id: 1,
                    entries: HashMap::new(),
                }),
            }),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.shared.adapter_name
    }
}

impl ContextProvider for WgpuContext {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn create_shared_driver(&self) -> GpuResult<Box<dyn GpuDriver>> {
        Ok(Box::new(WgpuDriver::new(Arc::clone(&self.shared))))
    }
}

/// Offscreen colour target plus its readback size
struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// One rendering context on a wgpu device
pub struct WgpuDriver {
    shared: Arc<DeviceShared>,
    programs: HashMap<ProgramId, wgpu::RenderPipeline>,
    next_program: ProgramId,
    uniform_buffer: wgpu::Buffer,
    target: Option<RenderTarget>,
}

impl WgpuDriver {
    fn new(shared: Arc<DeviceShared>) -> Self {
        let uniform_buffer = shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_uniform_buffer"),
            size: std::mem::size_of::<FilterUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        debug!(group = shared.id, "Created rendering context");
        Self {
            shared,
            programs: HashMap::new(),
            next_program: 1,
            uniform_buffer,
            target: None,
        }
    }
}

impl GpuDriver for WgpuDriver {
    fn share_context(&self) -> SharedContext {
        SharedContext::new(Arc::new(WgpuContext {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn compile_program(&mut self, source: &ProgramSource<'_>) -> GpuResult<ProgramId> {
        let device = &self.shared.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_source = format!("{}\n{}", source.vertex, source.fragment);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(source.label),
            layout: Some(&self.shared.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::ShaderCompile {
                label: source.label.to_string(),
                message: err.to_string(),
            });
        }

        let id = self.next_program;
        self.next_program += 1;
        self.programs.insert(id, pipeline);
        debug!(program = id, label = source.label, "Compiled program");
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_texture(&mut self) -> GpuResult<TextureId> {
        // 1x1 black until the first frame is latched
        let placeholder = self.shared.create_camera_texture(1, 1);
        self.shared.queue.write_texture(
            placeholder.texture.as_image_copy(),
            &[0, 0, 0, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let mut table = self.shared.textures();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.insert(id, placeholder);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.shared.textures().entries.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn update_texture(&mut self, texture: TextureId, frame: &CameraFrame) -> GpuResult<()> {
        if !frame.is_well_formed() || frame.width == 0 || frame.height == 0 {
            return Err(GpuError::InvalidFrame(format!(
                "{}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let mut table = self.shared.textures();
        let needs_realloc = {
            let entry = table
                .entries
                .get(&texture)
                .ok_or(GpuError::UnknownTexture(texture))?;
            entry.width != frame.width || entry.height != frame.height
        };
        if needs_realloc {
            debug!(
                texture,
                width = frame.width,
                height = frame.height,
                "Resizing camera texture"
            );
            let resized = self.shared.create_camera_texture(frame.width, frame.height);
            if let Some(old) = table.entries.insert(texture, resized) {
                old.texture.destroy();
            }
        }
        let entry = table
            .entries
            .get(&texture)
            .ok_or(GpuError::UnknownTexture(texture))?;

        self.shared.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> GpuResult<()> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidFrame(format!(
                "viewport {}x{}",
                width, height
            )));
        }
        if let Some(target) = &self.target
            && target.width == width
            && target.height == height
        {
            return Ok(());
        }

        let texture = self.shared.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("render_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(RenderTarget {
            texture,
            view,
            width,
            height,
        });
        Ok(())
    }

    fn draw(
        &mut self,
        program: ProgramId,
        texture: TextureId,
        uniforms: &FilterUniforms,
    ) -> GpuResult<()> {
        let pipeline = self
            .programs
            .get(&program)
            .ok_or(GpuError::UnknownProgram(program))?;
        let target = self.target.as_ref().ok_or(GpuError::NoRenderTarget)?;
        let device = &self.shared.device;

        let bind_group = {
            let table = self.shared.textures();
            let camera = table
                .entries
                .get(&texture)
                .ok_or(GpuError::UnknownTexture(texture))?;
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("filter_bind_group"),
                layout: &self.shared.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&camera.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.shared.sampler),
                    },
                ],
            })
        };

        self.shared
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter_render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, Some(&bind_group), &[]);
            pass.draw(0..4, 0..1);
        }
        self.shared.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self) -> GpuResult<RgbaImage> {
        let target = self.target.as_ref().ok_or(GpuError::NoRenderTarget)?;
        let (width, height) = (target.width, target.height);
        let device = &self.shared.device;

        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging_buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.shared.queue.submit(std::iter::once(encoder.finish()));

        let data = pollster::block_on(read_buffer_async(device, &staging))?;
        let pixels: Vec<u8> = data
            .chunks_exact(padded as usize)
            .flat_map(|row| &row[..unpadded as usize])
            .copied()
            .collect();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GpuError::Readback("short readback buffer".into()))
    }
}

/// Map a MAP_READ buffer, wait for the GPU and copy its contents out
async fn read_buffer_async(device: &wgpu::Device, buffer: &wgpu::Buffer) -> GpuResult<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| GpuError::Readback("buffer mapping was cancelled".into()))?
        .map_err(|e| GpuError::Readback(format!("failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}
