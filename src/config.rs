// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::{Facing, SensorRotation};
use crate::constants::{
    BitratePreset, DEFAULT_DISPLAY_ROTATION, DEFAULT_FPS, DEFAULT_PREVIEW_HEIGHT,
    DEFAULT_PREVIEW_WIDTH,
};
use crate::errors::ConfigError;
use crate::shaders::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default beauty filter level (1-5)
pub const DEFAULT_BEAUTY_LEVEL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred camera facing; any camera is used if none faces this way
    pub facing: Facing,
    /// Mirror camera preview horizontally (selfie mode)
    pub mirror_preview: bool,
    /// Display rotation offset in degrees (0, 90, 180, 270) applied at camera setup
    pub display_rotation: u32,
    /// Width of the render surface
    pub surface_width: u32,
    /// Height of the render surface
    pub surface_height: u32,
    /// Desired preview frame rate
    pub target_fps: u32,
    /// Filter active when the pipeline starts
    pub default_filter: FilterType,
    /// Beauty filter strength, 1 (mildest) to 5 (strongest)
    pub beauty_level: u8,
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Directory for recordings
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            mirror_preview: true, // Default to mirrored (selfie mode)
            display_rotation: DEFAULT_DISPLAY_ROTATION,
            surface_width: DEFAULT_PREVIEW_WIDTH,
            surface_height: DEFAULT_PREVIEW_HEIGHT,
            target_fps: DEFAULT_FPS,
            default_filter: FilterType::default(),
            beauty_level: DEFAULT_BEAUTY_LEVEL,
            bitrate_preset: BitratePreset::default(), // Default to Medium
            output_dir: None,
        }
    }
}

impl Config {
    /// Location of the user config file, if a config directory exists
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("filtercam").join("config.toml"))
    }

    /// Load the user config, falling back to defaults on any problem
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            debug!("No config directory, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable config");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Display rotation as a sensor rotation; unsupported angles map to none
    pub fn display_rotation(&self) -> SensorRotation {
        SensorRotation::from_degrees_int(self.display_rotation as i32)
    }

    /// Beauty level clamped to the supported range
    pub fn beauty_level(&self) -> u8 {
        self.beauty_level.clamp(1, 5)
    }
}
