// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera hardware
//!
//! Produces a moving colour-bar pattern at the configured size and frame
//! rate. Always available, so the full pipeline can run on machines without
//! a camera.

use super::frame_loop::{LoopAction, StreamLoop};
use super::preview_target::PreviewTarget;
use super::types::*;
use super::{CameraHandle, CameraHardware};
use crate::constants::threads;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [16, 16, 16],
];

/// Test-pattern camera service with one front and one back device
pub struct SyntheticCamera {
    devices: Vec<DeviceDescriptor>,
    open: Arc<Mutex<HashSet<String>>>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            devices: vec![
                DeviceDescriptor {
                    id: "synthetic-front".into(),
                    name: "Synthetic front camera".into(),
                    facing: Facing::Front,
                },
                DeviceDescriptor {
                    id: "synthetic-back".into(),
                    name: "Synthetic back camera".into(),
                    facing: Facing::Back,
                },
            ],
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            sizes: vec![
                PreviewSize::new(320, 240),
                PreviewSize::new(640, 480),
                PreviewSize::new(1280, 720),
                PreviewSize::new(1920, 1080),
            ],
            fps_ranges: vec![FpsRange::new(15_000, 30_000), FpsRange::new(30_000, 30_000)],
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraHardware for SyntheticCamera {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.clone()
    }

    fn open(&self, id: &str) -> BackendResult<Box<dyn CameraHandle>> {
        let descriptor = self
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))?;

        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !open.insert(id.to_string()) {
            return Err(BackendError::Busy(id.to_string()));
        }
        debug!(device = %id, "Opened synthetic camera");

        Ok(Box::new(SyntheticHandle {
            descriptor,
            open: Arc::clone(&self.open),
            target: None,
            settings: CaptureSettings {
                size: PreviewSize::new(640, 480),
                fps: None,
            },
            stream: None,
            released: false,
        }))
    }
}

struct SyntheticHandle {
    descriptor: DeviceDescriptor,
    open: Arc<Mutex<HashSet<String>>>,
    target: Option<Arc<PreviewTarget>>,
    settings: CaptureSettings,
    stream: Option<StreamLoop>,
    released: bool,
}

impl SyntheticHandle {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.released {
            Err(BackendError::NotOpen)
        } else {
            Ok(())
        }
    }
}

impl CameraHandle for SyntheticHandle {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn bind_preview_target(&mut self, target: Arc<PreviewTarget>) -> BackendResult<()> {
        self.ensure_open()?;
        self.target = Some(target);
        Ok(())
    }

    fn set_display_orientation(
        &mut self,
        rotation: SensorRotation,
        mirrored: bool,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        if let Some(target) = &self.target {
            target.set_orientation(rotation, mirrored);
        }
        Ok(())
    }

    fn capabilities(&self) -> BackendResult<Capabilities> {
        self.ensure_open()?;
        Ok(SyntheticCamera::capabilities())
    }

    fn apply_capabilities(&mut self, settings: &CaptureSettings) -> BackendResult<()> {
        self.ensure_open()?;
        if !SyntheticCamera::capabilities().sizes.contains(&settings.size) {
            return Err(BackendError::FormatNotSupported(settings.size.to_string()));
        }
        self.settings = *settings;
        Ok(())
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        if self.stream.is_some() {
            return Ok(());
        }
        let target = self.target.clone().ok_or(BackendError::NotOpen)?;
        let size = self.settings.size;
        let fps = self.settings.fps.map(|r| r.max).unwrap_or(30_000).max(1_000);
        let interval = Duration::from_micros(1_000_000_000 / fps as u64);

        info!(device = %self.descriptor.id, size = %size, fps = fps / 1000, "Starting synthetic stream");
        let mut sequence = 0u64;
        self.stream = Some(StreamLoop::start(threads::STREAM, move || {
            let data = test_pattern(size.width, size.height, sequence);
            target.post_frame(CameraFrame::new(size.width, size.height, data.into(), sequence));
            sequence += 1;
            std::thread::sleep(interval);
            LoopAction::Continue
        }));
        Ok(())
    }

    fn auto_focus(&mut self) -> BackendResult<()> {
        self.ensure_open()
    }

    fn stop_preview(&mut self) -> BackendResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        Ok(())
    }

    fn clear_frame_callback(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.target = None;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.clear_frame_callback();
        self.released = true;
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.descriptor.id);
        debug!(device = %self.descriptor.id, "Released synthetic camera");
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Colour bars scrolled horizontally by `sequence` pixels
pub fn test_pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
    let w = width as usize;
    let bar_width = (w / BARS.len()).max(1);
    let row: Vec<u8> = (0..w)
        .flat_map(|x| {
            let shifted = (x + sequence as usize) % w.max(1);
            let [r, g, b] = BARS[(shifted / bar_width).min(BARS.len() - 1)];
            [r, g, b, 255]
        })
        .collect();
    row.repeat(height as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_second_open_is_busy() {
        let camera = SyntheticCamera::new();
        let mut first = camera.open("synthetic-front").unwrap();
        assert!(matches!(
            camera.open("synthetic-front"),
            Err(BackendError::Busy(_))
        ));
        first.release();
        assert!(camera.open("synthetic-front").is_ok());
    }

    #[test]
    fn test_unknown_device() {
        let camera = SyntheticCamera::new();
        assert!(matches!(
            camera.open("nope"),
            Err(BackendError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_streams_into_target() {
        let camera = SyntheticCamera::new();
        let mut handle = camera.open("synthetic-back").unwrap();
        let target = PreviewTarget::new(1);
        let frames = Arc::new(AtomicUsize::new(0));
        let frames_clone = Arc::clone(&frames);
        target.set_on_frame_available(Arc::new(move || {
            frames_clone.fetch_add(1, Ordering::SeqCst);
        }));

        handle.bind_preview_target(Arc::clone(&target)).unwrap();
        handle
            .apply_capabilities(&CaptureSettings {
                size: PreviewSize::new(320, 240),
                fps: Some(FpsRange::fixed(30)),
            })
            .unwrap();
        handle.start_preview().unwrap();
        while frames.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.release();

        let frame = target.latch().unwrap();
        assert_eq!((frame.width, frame.height), (320, 240));
        assert!(frame.is_well_formed());

        // no frames after release
        let seen = frames.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(frames.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_rejects_unsupported_size() {
        let camera = SyntheticCamera::new();
        let mut handle = camera.open("synthetic-front").unwrap();
        let result = handle.apply_capabilities(&CaptureSettings {
            size: PreviewSize::new(7, 7),
            fps: None,
        });
        assert!(matches!(result, Err(BackendError::FormatNotSupported(_))));
    }

    #[test]
    fn test_pattern_size() {
        assert_eq!(test_pattern(16, 4, 3).len(), 16 * 4 * 4);
    }
}
