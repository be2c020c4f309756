// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! - [`camera`]: camera hardware contract, session ownership, preview
//!   negotiation and the device implementations (synthetic, V4L2)

pub mod camera;
