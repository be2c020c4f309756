// SPDX-License-Identifier: GPL-3.0-only

//! Capture coordinator
//!
//! A single background thread that runs camera hardware calls in order, so
//! the render thread never blocks on device I/O. Setting up a camera is a
//! chain of three messages, each handler posting the next one:
//!
//! ```text
//! SetupCamera ──▶ ConfigureCamera ──▶ StartCameraPreview
//! ```
//!
//! Messages posted by other threads interleave with the chain in FIFO order.

use crate::backends::camera::preview_target::PreviewTarget;
use crate::backends::camera::session::CameraSession;
use crate::backends::camera::types::PreviewSize;
use crate::constants::threads;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Messages handled by the capture thread
pub enum CaptureMessage {
    SetupCamera {
        width: u32,
        height: u32,
        target: Arc<PreviewTarget>,
    },
    ConfigureCamera {
        width: u32,
        height: u32,
    },
    StartCameraPreview,
}

impl std::fmt::Debug for CaptureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMessage::SetupCamera { width, height, target } => write!(
                f,
                "SetupCamera({}x{}, texture {})",
                width,
                height,
                target.texture_id()
            ),
            CaptureMessage::ConfigureCamera { width, height } => {
                write!(f, "ConfigureCamera({}x{})", width, height)
            }
            CaptureMessage::StartCameraPreview => f.write_str("StartCameraPreview"),
        }
    }
}

/// Receives the negotiated preview size
pub type PreviewSizeListener = Box<dyn Fn(PreviewSize) + Send>;

#[derive(Default)]
struct CaptureQueue {
    messages: VecDeque<CaptureMessage>,
    busy: bool,
    stopped: bool,
}

struct Shared {
    queue: Mutex<CaptureQueue>,
    changed: Condvar,
    on_preview_size: Mutex<Option<PreviewSizeListener>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CaptureQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, message: CaptureMessage) {
        let mut queue = self.lock();
        if queue.stopped {
            debug!(message = ?message, "Capture thread stopped, dropping message");
            return;
        }
        queue.messages.push_back(message);
        self.changed.notify_all();
    }
}

/// Cloneable handle for posting to the capture thread
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    pub fn post(&self, message: CaptureMessage) {
        self.shared.post(message);
    }

    /// Open the camera bound to `target`, then configure and start it
    pub fn setup_camera(&self, width: u32, height: u32, target: Arc<PreviewTarget>) {
        self.post(CaptureMessage::SetupCamera {
            width,
            height,
            target,
        });
    }
}

pub struct CaptureCoordinator {
    handle: CaptureHandle,
    thread: Option<JoinHandle<()>>,
}

impl CaptureCoordinator {
    /// Start the capture thread
    ///
    /// `fps` is the desired frame rate used for range negotiation.
    pub fn spawn(session: Arc<CameraSession>, fps: u32) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(CaptureQueue::default()),
            changed: Condvar::new(),
            on_preview_size: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(threads::CAPTURE.into())
            .spawn(move || run(&worker_shared, &session, fps))?;

        Ok(Self {
            handle: CaptureHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }

    pub fn post(&self, message: CaptureMessage) {
        self.handle.post(message);
    }

    pub fn setup_camera(&self, width: u32, height: u32, target: Arc<PreviewTarget>) {
        self.handle.setup_camera(width, height, target);
    }

    /// Called after each successful configure with the applied size
    pub fn set_preview_size_listener(&self, listener: PreviewSizeListener) {
        *self
            .handle
            .shared
            .on_preview_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Drop every message not yet started
    ///
    /// A message already running is not interrupted.
    pub fn clear_pending(&self) {
        let mut queue = self.handle.shared.lock();
        let dropped = queue.messages.len();
        queue.messages.clear();
        if dropped > 0 {
            debug!(dropped, "Cleared pending capture messages");
        }
        self.handle.shared.changed.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.handle.shared.lock().messages.len()
    }

    /// Wait until the queue is empty and no message is running
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.handle.shared.lock();
        while !queue.stopped && (queue.busy || !queue.messages.is_empty()) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            queue = self
                .handle
                .shared
                .changed
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stop the thread, discarding undelivered messages, and join it
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.handle.shared.lock();
            queue.stopped = true;
            let dropped = queue.messages.len();
            queue.messages.clear();
            if dropped > 0 {
                debug!(dropped, "Discarding capture messages at shutdown");
            }
            self.handle.shared.changed.notify_all();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Capture thread panicked");
        }
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, session: &CameraSession, fps: u32) {
    info!("Capture thread started");
    loop {
        let message = {
            let mut queue = shared.lock();
            queue.busy = false;
            shared.changed.notify_all();
            loop {
                if queue.stopped {
                    break None;
                }
                if let Some(message) = queue.messages.pop_front() {
                    queue.busy = true;
                    break Some(message);
                }
                queue = shared
                    .changed
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(message) = message else {
            break;
        };
        handle_message(shared, session, fps, message);
    }
    info!("Capture thread exiting");
}

fn handle_message(shared: &Shared, session: &CameraSession, fps: u32, message: CaptureMessage) {
    debug!(message = ?message, "Handling capture message");
    match message {
        CaptureMessage::SetupCamera {
            width,
            height,
            target,
        } => {
            session.setup(&target);
            shared.post(CaptureMessage::ConfigureCamera { width, height });
        }
        CaptureMessage::ConfigureCamera { width, height } => {
            if let Some(size) = session.configure_for(width, height, fps) {
                let listener = shared
                    .on_preview_size
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(listener) = listener.as_ref() {
                    listener(size);
                }
            }
            shared.post(CaptureMessage::StartCameraPreview);
        }
        CaptureMessage::StartCameraPreview => {
            session.start_preview();
            session.auto_focus();
        }
    }
}
