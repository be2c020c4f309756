// SPDX-License-Identifier: GPL-3.0-only

//! Column-major 4x4 matrices for vertex and texture transforms

/// Column-major 4x4 matrix
pub type Mat4 = [f32; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// `a * b`
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

pub fn translation(x: f32, y: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[12] = x;
    m[13] = y;
    m
}

pub fn scale(x: f32, y: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0] = x;
    m[5] = y;
    m
}

/// Rotation about the z axis; exact for multiples of 90 degrees
pub fn rotation_z(degrees: u32) -> Mat4 {
    let (sin, cos) = match degrees % 360 {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        d => (d as f32).to_radians().sin_cos(),
    };
    let mut m = IDENTITY;
    m[0] = cos;
    m[1] = sin;
    m[4] = -sin;
    m[5] = cos;
    m
}

/// Apply `m` to the point `(x, y, 0, 1)`
pub fn transform_point(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13])
}
