// SPDX-License-Identifier: GPL-3.0-only

//! Capture, render and record pipelines
//!
//! Three threads cooperate on every frame:
//!
//! ```text
//! ┌───────────────┐  SetupCamera   ┌──────────────────┐
//! │ Render thread │ ─────────────▶ │  Capture thread  │
//! │               │ ◀───────────── │ (CameraSession)  │
//! │ RenderPipeline│  preview size  └──────────────────┘
//! │               │                        │ frames
//! │  texture ◀────┼────────────────────────┘
//! │               │  texture id + shared context
//! │               │ ─────────────▶ ┌──────────────────┐
//! └───────────────┘   per draw     │ Recorder thread  │
//!                                  └──────────────────┘
//! ```
//!
//! - [`capture`]: serial queue sequencing camera open, configure and start
//! - [`render`]: filter rendering and the recording state machine
//! - [`render_thread`]: request-driven render loop and teardown ordering
//! - [`video`]: recording controller contract and the texture recorder

pub mod capture;
pub mod render;
pub mod render_thread;
pub mod video;

pub use capture::{CaptureCoordinator, CaptureHandle, CaptureMessage};
pub use render::{RecordingStatus, RenderControls, RenderPipeline, next_recording_status};
pub use render_thread::{RenderHandle, RenderThread};
