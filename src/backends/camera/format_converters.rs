// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format conversion for device backends
//!
//! Device backends deliver whatever the hardware produces; the preview target
//! only accepts tightly packed RGBA, so conversion happens on the stream thread.

/// Convert YUYV (YUV 4:2:2) to RGBA
///
/// YUYV format: Y0 U0 Y1 V0 - each 4-byte group encodes 2 pixels.
/// Uses BT.601 coefficients for YUV to RGB conversion. `stride` is the
/// device's bytes per line; 0 means tightly packed.
pub fn yuyv_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    for row in rows(data, width as usize * 2, height, stride) {
        let row_end = rgba.len() + width as usize * 4;
        // YUYV: Y0 U0 Y1 V0 - processes 2 pixels at a time
        for chunk in row.chunks_exact(4) {
            let y0 = chunk[0] as f32;
            let u = chunk[1] as f32 - 128.0;
            let y1 = chunk[2] as f32;
            let v = chunk[3] as f32 - 128.0;

            for y in [y0, y1] {
                if rgba.len() >= row_end {
                    break;
                }
                push_bt601(&mut rgba, y, u, v);
            }
        }
        rgba.resize(row_end, 0);
    }

    // Short buffers (truncated reads) are padded with black
    rgba.resize(pixel_count * 4, 0);
    rgba
}

/// Convert packed RGB24 to RGBA with opaque alpha
///
/// `stride` as for [`yuyv_to_rgba`].
pub fn rgb_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Vec<u8> {
    let pixel_count = (width * height) as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);
    for row in rows(data, width as usize * 3, height, stride) {
        let row_end = rgba.len() + width as usize * 4;
        for px in row.chunks_exact(3) {
            rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        rgba.resize(row_end, 0);
    }
    rgba.resize(pixel_count * 4, 0);
    rgba
}

/// The pixel bytes of each complete or partial row, skipping line padding
fn rows(data: &[u8], row_bytes: usize, height: u32, stride: u32) -> impl Iterator<Item = &[u8]> {
    let stride = (stride as usize).max(row_bytes).max(1);
    data.chunks(stride)
        .take(height as usize)
        .map(move |line| &line[..line.len().min(row_bytes)])
}

fn push_bt601(rgba: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    rgba.extend_from_slice(&[r, g, b, 255]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // two pixels, luma 16 and 235, no chroma
        let data = [16u8, 128, 235, 128];
        let rgba = yuyv_to_rgba(&data, 2, 1, 0);
        assert_eq!(rgba, vec![16, 16, 16, 255, 235, 235, 235, 255]);
    }

    #[test]
    fn test_yuyv_short_buffer_padded() {
        let data = [100u8, 128, 100, 128];
        let rgba = yuyv_to_rgba(&data, 4, 1, 0);
        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[8..], &[0; 8]);
    }

    #[test]
    fn test_rgb_to_rgba() {
        let data = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(rgb_to_rgba(&data, 2, 1, 0), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_yuyv_skips_line_padding() {
        // 2x2 image, 4 bytes of pixels plus 4 bytes of padding per line
        let data = [
            16u8, 128, 16, 128, 0xEE, 0xEE, 0xEE, 0xEE, //
            235, 128, 235, 128, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let rgba = yuyv_to_rgba(&data, 2, 2, 8);
        assert_eq!(&rgba[..8], &[16, 16, 16, 255, 16, 16, 16, 255]);
        assert_eq!(&rgba[8..], &[235, 235, 235, 255, 235, 235, 235, 255]);
    }

    #[test]
    fn test_rgb_skips_line_padding() {
        let data = [1u8, 2, 3, 9, 4, 5, 6, 9];
        assert_eq!(
            rgb_to_rgba(&data, 1, 2, 4),
            vec![1, 2, 3, 255, 4, 5, 6, 255]
        );
    }
}
