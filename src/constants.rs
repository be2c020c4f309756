// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum difference between a candidate preview aspect ratio and the
/// requested ratio for the candidate to count as a match.
pub const ASPECT_RATIO_TOLERANCE: f32 = 0.05;

/// Default preview width when the host does not supply one
pub const DEFAULT_PREVIEW_WIDTH: u32 = 640;

/// Default preview height when the host does not supply one
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;

/// Default desired preview frame rate (frames per second)
pub const DEFAULT_FPS: u32 = 30;

/// Default display rotation offset applied at camera setup, in degrees
pub const DEFAULT_DISPLAY_ROTATION: u32 = 90;

/// Video encoder bitrate presets
///
/// These presets define the target bitrate for video encoding based on resolution.
/// Users can choose between quality and file size trade-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// All presets, lowest first
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given resolution
    ///
    /// - SD (640x480): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080): Low=4, Medium=8, High=16 Mbps
    /// - 4K (3840x2160): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32, _height: u32) -> u32 {
        match (get_resolution_tier(width), self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 15_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::FourK, BitratePreset::High) => 50_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// 640x480 and below
    SD,
    /// 1280x720
    HD,
    /// 1920x1080
    FullHD,
    /// 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Thread names, so the three pipeline contexts are identifiable in logs and debuggers
pub mod threads {
    pub const CAPTURE: &str = "filtercam-capture";
    pub const RENDER: &str = "filtercam-render";
    pub const RECORDER: &str = "filtercam-recorder";
    pub const STREAM: &str = "filtercam-stream";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// How long `SurfaceHost::snapshot` waits for the render thread
    pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Log every Nth frame in per-frame hot paths
    pub const FRAME_LOG_INTERVAL: u64 = 60;

    /// Back-off after a failed device read before retrying
    pub const STREAM_RETRY_DELAY: Duration = Duration::from_millis(10);

    /// How long the render thread waits for the recorder to let go of a texture
    pub const RECORDER_DETACH_TIMEOUT: Duration = Duration::from_secs(1);

    /// How long the host waits for the render surface to become ready
    pub const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
}
