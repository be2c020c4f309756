// SPDX-License-Identifier: GPL-3.0-only

//! Preview size and frame-rate negotiation
//!
//! Pure selection over what an open device advertises. Nothing here touches
//! hardware, so the coordinator can call it between the setup and configure
//! steps without holding the session lock.

use super::types::{FpsRange, PreviewSize};
use crate::constants::ASPECT_RATIO_TOLERANCE;
use tracing::debug;

/// Pick the preview size that best matches `target_width`x`target_height`.
///
/// Candidates are scanned in ascending width. Among those whose aspect ratio
/// is within [`ASPECT_RATIO_TOLERANCE`] of the target ratio, the one closest
/// in height wins; the scan stops at the first taller candidate once a match
/// exists. If no candidate has a matching ratio, the size closest in height
/// over the whole list is returned.
///
/// Returns `None` for an empty list or a non-positive target.
pub fn optimal_preview_size(
    supported: &[PreviewSize],
    target_width: u32,
    target_height: u32,
) -> Option<PreviewSize> {
    if supported.is_empty() || target_width == 0 || target_height == 0 {
        return None;
    }

    let mut sizes = supported.to_vec();
    sizes.sort_by_key(|s| s.width);

    let target_ratio = target_width as f32 / target_height as f32;
    let height_diff = |s: &PreviewSize| s.height.abs_diff(target_height);

    let mut best: Option<PreviewSize> = None;
    let mut min_diff = u32::MAX;
    for size in &sizes {
        if (size.aspect_ratio() - target_ratio).abs() > ASPECT_RATIO_TOLERANCE {
            continue;
        }
        if best.is_some() && size.height > target_height {
            break;
        }
        if height_diff(size) < min_diff {
            min_diff = height_diff(size);
            best = Some(*size);
        }
    }

    if best.is_none() {
        debug!(
            target_width,
            target_height, "No preview size within ratio tolerance, using closest height"
        );
        // min_by_key keeps the first of equal elements, same as a strict `<` scan
        best = sizes.iter().copied().min_by_key(height_diff);
    }

    best
}

/// Pick the frame-rate range for `expected_fps` (whole frames per second).
///
/// Ranges are in milli-fps. The range containing the expected rate with the
/// smallest summed distance to both bounds wins; if none contains it the first
/// advertised range is kept. An empty list yields a fixed `[fps, fps]` range.
pub fn suitable_fps_range(expected_fps: u32, ranges: &[FpsRange]) -> FpsRange {
    let expected = expected_fps.saturating_mul(1000);
    let Some(first) = ranges.first() else {
        return FpsRange::new(expected, expected);
    };

    let mut chosen = *first;
    let mut min_diff = u32::MAX;
    for range in ranges.iter().filter(|r| r.contains(expected)) {
        let diff = (expected - range.min) + (range.max - expected);
        if diff < min_diff {
            min_diff = diff;
            chosen = *range;
        }
    }
    chosen
}
