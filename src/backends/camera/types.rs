// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Which way a camera points relative to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Faces the user (selfie camera)
    #[default]
    Front,
    /// Faces away from the user
    Back,
    /// Facing unknown (USB webcams and the like)
    External,
}

impl Facing {
    /// The opposite facing, used when switching cameras
    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back | Facing::External => Facing::Front,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
            Facing::External => write!(f, "external"),
        }
    }
}

/// A camera advertised by a hardware service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Identifier passed back to `CameraHardware::open`
    pub id: String,
    /// Human readable name
    pub name: String,
    pub facing: Facing,
}

/// Preview resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f32 / self.height as f32
    }
}

impl std::fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supported frame-rate range in milli-fps (30 fps = 30000)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Single-rate range for a whole fps value
    pub const fn fixed(fps: u32) -> Self {
        Self {
            min: fps * 1000,
            max: fps * 1000,
        }
    }

    pub fn contains(&self, milli_fps: u32) -> bool {
        self.min <= milli_fps && milli_fps <= self.max
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}-{:.1} fps",
            self.min as f32 / 1000.0,
            self.max as f32 / 1000.0
        )
    }
}

/// What an open device reports it can do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub sizes: Vec<PreviewSize>,
    pub fps_ranges: Vec<FpsRange>,
}

/// Capture parameters applied to an open device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub size: PreviewSize,
    pub fps: Option<FpsRange>,
}

/// Rotation in degrees (clockwise)
///
/// Used as the display rotation offset applied when a camera is set up. The
/// preview transform rotates the sampled image by this amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// A single RGBA frame delivered by a camera backend
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixels (`width * height * 4` bytes)
    pub data: Arc<[u8]>,
    /// Backend frame counter
    pub sequence: u64,
    /// When the backend produced the frame
    pub captured_at: Instant,
}

impl CameraFrame {
    pub fn new(width: u32, height: u32, data: Arc<[u8]>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Whether the buffer holds exactly one RGBA frame of the stated size
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for camera hardware operations
///
/// All of these are recoverable: the component that hits one logs it and
/// leaves the preview in a safe, possibly blank, state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    #[error("Backend not available: {0}")]
    NotAvailable(String),
    /// Camera device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Device is already opened by another session
    #[error("Device busy: {0}")]
    Busy(String),
    /// Format not supported
    #[error("Format not supported: {0}")]
    FormatNotSupported(String),
    /// Operation needs an open device
    #[error("No device open")]
    NotOpen,
    /// General I/O error
    #[error("I/O error: {0}")]
    IoError(String),
    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::IoError(e.to_string())
    }
}
