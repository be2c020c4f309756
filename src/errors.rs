// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera pipeline
//!
//! Errors fall into two classes:
//! - recoverable: camera hardware and recorder failures are logged and absorbed
//!   by the component that hit them ([`BackendError`], [`RecordingError`])
//! - fatal: GPU failures on the render thread stop that thread ([`GpuError`])

use thiserror::Error;

pub use crate::backends::camera::types::{BackendError, BackendResult};
pub use crate::gpu::{GpuError, GpuResult};

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error used by the command-line front end
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Camera error: {0}")]
    Camera(#[from] BackendError),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

/// Recorder-specific errors
#[derive(Debug, Error)]
pub enum RecordingError {
    /// The frame sink for the output target could not be created
    #[error("failed to open output {path}: {source}")]
    SinkCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Writing an encoded frame failed
    #[error("failed to write frame: {0}")]
    Write(#[from] std::io::Error),
    /// A frame did not match the size the output was opened with
    #[error("frame is {actual:?}, output expects {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// The request carried no rendering context to attach to
    #[error("recording request has no shared rendering context")]
    NoSharedContext,
    /// Rendering the shared texture failed
    #[error("GPU error while recording: {0}")]
    Gpu(#[from] GpuError),
    /// A recording request arrived while a recording is already running
    #[error("recording already in progress")]
    AlreadyRecording,
    /// The recorder thread could not be started
    #[error("failed to spawn recorder thread: {0}")]
    Spawn(String),
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
