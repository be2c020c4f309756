// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera hardware
//!
//! Captures YUYV or RGB24 through a memory-mapped stream and converts each
//! buffer to RGBA on the stream thread before posting it to the preview
//! target. V4L2 reports no facing, so every device is `External`.

use super::format_converters::{rgb_to_rgba, yuyv_to_rgba};
use super::frame_loop::StreamLoop;
use super::preview_target::PreviewTarget;
use super::types::*;
use super::{CameraHandle, CameraHardware};
use crate::constants::{threads, timing};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

const YUYV: &[u8; 4] = b"YUYV";
const RGB3: &[u8; 4] = b"RGB3";

/// V4L2 camera service over `/dev/video*`
pub struct V4l2Camera {
    open: Arc<Mutex<HashSet<String>>>,
}

impl V4l2Camera {
    pub fn new() -> Self {
        Self {
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl Default for V4l2Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraHardware for V4l2Camera {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let mut devices = Vec::new();
        for entry in std::fs::read_dir("/dev").into_iter().flatten().flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("video") {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            debug!(path = %path.display(), card = %caps.card, "Found V4L2 capture device");
            devices.push(DeviceDescriptor {
                id: path.to_string_lossy().into_owned(),
                name: caps.card.clone(),
                facing: Facing::External,
            });
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    fn open(&self, id: &str) -> BackendResult<Box<dyn CameraHandle>> {
        let dev = Device::with_path(id)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", id, e)))?;
        let caps = dev.query_caps()?;

        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !open.insert(id.to_string()) {
            return Err(BackendError::Busy(id.to_string()));
        }
        info!(device = %id, card = %caps.card, "Opened V4L2 camera");

        Ok(Box::new(V4l2Handle {
            descriptor: DeviceDescriptor {
                id: id.to_string(),
                name: caps.card,
                facing: Facing::External,
            },
            dev,
            open: Arc::clone(&self.open),
            target: None,
            settings: None,
            stream: None,
            released: false,
        }))
    }
}

struct V4l2Handle {
    descriptor: DeviceDescriptor,
    /// Control handle, kept for capability queries
    dev: Device,
    open: Arc<Mutex<HashSet<String>>>,
    target: Option<Arc<PreviewTarget>>,
    settings: Option<CaptureSettings>,
    stream: Option<StreamLoop>,
    released: bool,
}

impl V4l2Handle {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.released {
            Err(BackendError::NotOpen)
        } else {
            Ok(())
        }
    }
}

impl CameraHandle for V4l2Handle {
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
        let mut caps = Capabilities::default();
        let mut seen_ranges = HashSet::new();

        for desc in self.dev.enum_formats()? {
            if desc.fourcc != v4l::FourCC::new(YUYV) && desc.fourcc != v4l::FourCC::new(RGB3) {
                continue;
            }
            for size in self.dev.enum_framesizes(desc.fourcc)? {
                match size.size {
                    v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                        let preview = PreviewSize::new(discrete.width, discrete.height);
                        if !caps.sizes.contains(&preview) {
                            caps.sizes.push(preview);
                        }
                        let intervals = self
                            .dev
                            .enum_frameintervals(desc.fourcc, discrete.width, discrete.height)
                            .unwrap_or_default();
                        for interval in intervals {
                            if let v4l::frameinterval::FrameIntervalEnum::Discrete(frac) =
                                interval.interval
                                && frac.numerator > 0
                            {
                                let range = FpsRange::fixed(frac.denominator / frac.numerator);
                                if seen_ranges.insert(range) {
                                    caps.fps_ranges.push(range);
                                }
                            }
                        }
                    }
                    v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                        // Add common resolutions
                        for (w, h) in [(320, 240), (640, 480), (1280, 720), (1920, 1080)] {
                            let preview = PreviewSize::new(w, h);
                            if w >= step.min_width
                                && w <= step.max_width
                                && h >= step.min_height
                                && h <= step.max_height
                                && !caps.sizes.contains(&preview)
                            {
                                caps.sizes.push(preview);
                            }
                        }
                    }
                }
            }
        }

        if caps.sizes.is_empty() {
            return Err(BackendError::FormatNotSupported(
                "device offers neither YUYV nor RGB24".into(),
            ));
        }
        Ok(caps)
    }

    fn apply_capabilities(&mut self, settings: &CaptureSettings) -> BackendResult<()> {
        self.ensure_open()?;
        self.settings = Some(*settings);
        Ok(())
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        if self.stream.is_some() {
            return Ok(());
        }
        let target = self.target.clone().ok_or(BackendError::NotOpen)?;
        let settings = self.settings.unwrap_or(CaptureSettings {
            size: PreviewSize::new(640, 480),
            fps: None,
        });
        let path = self.descriptor.id.clone();

        self.stream = Some(StreamLoop::run(threads::STREAM, move |stop| {
            if let Err(e) = capture_loop(&path, settings, &target, stop) {
                warn!(device = %path, error = %e, "V4L2 capture loop failed");
            }
        }));
        Ok(())
    }

    fn auto_focus(&mut self) -> BackendResult<()> {
        // UVC autofocus is continuous when supported; nothing to trigger
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
        info!(device = %self.descriptor.id, "Released V4L2 camera");
    }
}

impl Drop for V4l2Handle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Main capture loop running on the stream thread
fn capture_loop(
    path: &str,
    settings: CaptureSettings,
    target: &PreviewTarget,
    stop: &AtomicBool,
) -> BackendResult<()> {
    let mut dev = Device::with_path(path)?;

    let mut format = dev.format()?;
    format.width = settings.size.width;
    format.height = settings.size.height;
    format.fourcc = v4l::FourCC::new(YUYV);
    let format = match dev.set_format(&format) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "Could not set format, using current device format");
            dev.format()?
        }
    };
    let is_yuyv = format.fourcc == v4l::FourCC::new(YUYV);
    if !is_yuyv && format.fourcc != v4l::FourCC::new(RGB3) {
        return Err(BackendError::FormatNotSupported(format!("{}", format.fourcc)));
    }

    if let Some(fps) = settings.fps {
        let whole = (fps.max / 1000).max(1);
        if let Err(e) = dev.set_params(&v4l::video::capture::Parameters::with_fps(whole)) {
            warn!(fps = whole, error = %e, "Could not set frame rate");
        }
    }

    info!(
        device = %path,
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        "V4L2 stream started"
    );

    let (width, height, stride) = (format.width, format.height, format.stride);
    let mut stream = MmapStream::with_buffers(&mut dev, Type::VideoCapture, 4)?;

    while !stop.load(Ordering::SeqCst) {
        match stream.next() {
            Ok((buf, meta)) => {
                let rgba = if is_yuyv {
                    yuyv_to_rgba(buf, width, height, stride)
                } else {
                    rgb_to_rgba(buf, width, height, stride)
                };
                let sequence = meta.sequence as u64;
                if sequence % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(sequence, bytes = buf.len(), "V4L2 frame captured");
                }
                target.post_frame(CameraFrame::new(width, height, rgba.into(), sequence));
            }
            Err(e) => {
                warn!(error = %e, "Failed to capture frame");
                std::thread::sleep(timing::STREAM_RETRY_DELAY);
            }
        }
    }

    info!(device = %path, "V4L2 stream ended");
    Ok(())
}
