// SPDX-License-Identifier: GPL-3.0-only

//! YUV4MPEG2 output
//!
//! Uncompressed 4:4:4 frames behind a one-line stream header. Any player
//! built on ffmpeg reads it, and it needs no encoder.

use super::recorder::VideoSink;
use crate::errors::RecordingError;
use image::RgbaImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

pub struct Y4mWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    frames: u64,
    planes: Vec<u8>,
}

impl Y4mWriter {
    /// Create the file and write the stream header
    pub fn create(path: &Path, width: u32, height: u32, frame_rate: u32) -> Result<Self, RecordingError> {
        let file = File::create(path).map_err(|source| RecordingError::SinkCreation {
            path: path.display().to_string(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        writeln!(
            out,
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C444",
            width,
            height,
            frame_rate.max(1)
        )?;
        debug!(path = %path.display(), width, height, frame_rate, "Opened Y4M output");

        Ok(Self {
            out,
            width,
            height,
            frames: 0,
            planes: Vec::with_capacity((width * height * 3) as usize),
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl VideoSink for Y4mWriter {
    fn write_frame(&mut self, frame: &RgbaImage, _timestamp_ns: u64) -> Result<(), RecordingError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(RecordingError::FrameSize {
                expected: (self.width, self.height),
                actual: frame.dimensions(),
            });
        }

        let count = (self.width * self.height) as usize;
        self.planes.clear();
        self.planes.resize(count * 3, 0);
        let (y_plane, chroma) = self.planes.split_at_mut(count);
        let (u_plane, v_plane) = chroma.split_at_mut(count);

        for (i, px) in frame.pixels().enumerate() {
            let (y, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
            y_plane[i] = y;
            u_plane[i] = u;
            v_plane[i] = v;
        }

        self.out.write_all(b"FRAME\n")?;
        self.out.write_all(&self.planes)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecordingError> {
        self.out.flush()?;
        Ok(())
    }
}

/// BT.601 studio range
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}
