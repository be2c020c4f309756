// SPDX-License-Identifier: GPL-3.0-only

//! filtercam - live camera preview with real-time shader filters
//!
//! Camera frames stream into a GPU texture, are drawn through a selectable
//! filter, and can be recorded at the same time without copying the texture
//! off the GPU.
//!
//! # Architecture
//!
//! - [`backends`]: camera hardware contract, device session, preview negotiation
//! - [`gpu`]: rendering driver contract, shared contexts and the wgpu driver
//! - [`shaders`]: the filter catalog and its WGSL programs
//! - [`pipelines`]: capture coordinator, render pipeline and recorder
//! - [`host`]: lifecycle owner tying the threads together
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load();
//! let mut host = SurfaceHost::new(&config, hardware, gpu, recorder)?;
//! host.resume();
//! host.change_filter(FilterType::Sepia);
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod host;
pub mod pipelines;
pub mod shaders;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backends::camera::{CameraHardware, CameraSession, Facing, PreviewSize};
pub use config::Config;
pub use constants::BitratePreset;
pub use errors::{AppError, AppResult};
pub use host::SurfaceHost;
pub use pipelines::video::{RecordingController, RecordingRequest, TextureRecorder};
pub use shaders::{FilterCatalog, FilterType};
