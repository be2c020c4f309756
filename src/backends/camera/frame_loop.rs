// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for device stream loops
//!
//! Every device backend pushes frames from a dedicated thread. This module
//! gives them one way to start that thread, signal it to stop, and join it,
//! so `stop_preview` and `release` behave the same on every backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the stream loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a stream loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = StreamLoop::start("synthetic", move || {
///     target.post_frame(next_frame());
///     thread::sleep(frame_interval);
///     LoopAction::Continue
/// });
///
/// // Later, stop the loop
/// controller.stop();
/// ```
pub struct StreamLoop {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl StreamLoop {
    /// Start a new loop in a separate thread
    ///
    /// The closure is called repeatedly until it returns `LoopAction::Stop`
    /// or the controller's `stop()` method is called.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::run(name, move |stop| {
            while !stop.load(Ordering::SeqCst) {
                if loop_fn() == LoopAction::Stop {
                    debug!("Loop requested stop");
                    break;
                }
            }
        })
    }

    /// Run `body` on a separate thread, handing it the stop signal
    ///
    /// For loops that own borrowed resources (a memory-mapped device stream)
    /// and therefore must keep their whole lifetime inside one function.
    pub fn run<B>(name: &str, body: B) -> Self
    where
        B: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting stream loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Stream loop thread started");
                body(&stop_signal_clone);
                info!(name = %name_clone, "Stream loop thread exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn stream loop thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting stream loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for stream loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Stream loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Stream loop thread finished");
            }
        }
    }
}

impl Drop for StreamLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "StreamLoop dropped, stopping loop");
            self.stop();
        }
    }
}
