// SPDX-License-Identifier: GPL-3.0-only

//! Render thread
//!
//! Runs a [`RenderPipeline`] on a dedicated thread fed by one FIFO event
//! queue. Draws are request-driven: nothing is rendered until a frame
//! available signal (or an explicit request) queues a draw, and consecutive
//! draw requests collapse into one.
//!
//! The first [`GpuError`] stops the thread. The error is logged and kept for
//! [`RenderThread::fatal_error`]; every later event is ignored.

use super::render::RenderPipeline;
use crate::backends::camera::preview_target::PreviewTarget;
use crate::constants::threads;
use crate::gpu::{ContextProvider, GpuError, GpuResult};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Work queued onto the render thread
pub type RenderTask = Box<dyn FnOnce(&mut RenderPipeline) -> GpuResult<()> + Send>;

/// Called on the render thread once a new surface has its first size
pub type SurfaceReadyListener = Box<dyn Fn(&RenderHandle, Arc<PreviewTarget>, u32, u32) + Send>;

enum RenderEvent {
    SurfaceCreated,
    SurfaceChanged { width: u32, height: u32 },
    Task(RenderTask),
    Draw,
    Teardown,
}

#[derive(Default)]
struct EventQueue {
    events: VecDeque<RenderEvent>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<EventQueue>,
    wake: Condvar,
    running: AtomicBool,
    fatal: Mutex<Option<GpuError>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EventQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: RenderEvent) {
        let mut queue = self.lock();
        if queue.shutdown {
            return;
        }
        queue.events.push_back(event);
        self.wake.notify_one();
    }
}

/// Cloneable handle for posting to the render thread
#[derive(Clone)]
pub struct RenderHandle {
    shared: Arc<Shared>,
}

impl RenderHandle {
    /// Queue a draw unless one is already waiting at the back of the queue
    pub fn request_render(&self) {
        let mut queue = self.shared.lock();
        if queue.shutdown || matches!(queue.events.back(), Some(RenderEvent::Draw)) {
            return;
        }
        queue.events.push_back(RenderEvent::Draw);
        self.shared.wake.notify_one();
    }

    pub fn queue(&self, task: impl FnOnce(&mut RenderPipeline) -> GpuResult<()> + Send + 'static) {
        self.shared.push(RenderEvent::Task(Box::new(task)));
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

pub struct RenderThread {
    handle: RenderHandle,
    thread: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Start the render thread
    ///
    /// `provider` creates a new rendering context each time a surface is
    /// created. `on_ready` runs after the first size of each new surface.
    pub fn spawn(
        pipeline: RenderPipeline,
        provider: Arc<dyn ContextProvider>,
        on_ready: SurfaceReadyListener,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(EventQueue::default()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
            fatal: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(threads::RENDER.into())
            .spawn(move || {
                let mut worker = RenderWorker {
                    handle: RenderHandle {
                        shared: Arc::clone(&worker_shared),
                    },
                    pipeline,
                    provider,
                    on_ready,
                    announced: true,
                };
                worker.run(&worker_shared);
            })?;

        Ok(Self {
            handle: RenderHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> RenderHandle {
        self.handle.clone()
    }

    pub fn surface_created(&self) {
        self.handle.shared.push(RenderEvent::SurfaceCreated);
    }

    pub fn surface_changed(&self, width: u32, height: u32) {
        self.handle
            .shared
            .push(RenderEvent::SurfaceChanged { width, height });
    }

    pub fn request_render(&self) {
        self.handle.request_render();
    }

    pub fn queue(&self, task: impl FnOnce(&mut RenderPipeline) -> GpuResult<()> + Send + 'static) {
        self.handle.queue(task);
    }

    /// Release the texture, programs and context after everything already queued
    pub fn queue_teardown(&self) {
        self.handle.shared.push(RenderEvent::Teardown);
    }

    /// Run `f` on the render thread and wait for its result
    ///
    /// Returns `None` if the thread has stopped or `timeout` passes.
    pub fn call<R, F>(&self, f: F, timeout: Duration) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut RenderPipeline) -> R + Send + 'static,
    {
        if !self.is_running() {
            return None;
        }
        let (reply, result) = mpsc::channel();
        self.queue(move |pipeline| {
            let _ = reply.send(f(pipeline));
            Ok(())
        });
        result.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// The error that stopped the thread, if any
    pub fn fatal_error(&self) -> Option<GpuError> {
        self.handle
            .shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the thread and wait for it
    ///
    /// Events still queued are discarded, not run. The pipeline is released
    /// on the way out.
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.handle.shared.lock();
            queue.shutdown = true;
            let dropped = queue.events.len();
            queue.events.clear();
            if dropped > 0 {
                debug!(dropped, "Discarding queued render events");
            }
            self.handle.shared.wake.notify_all();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Render thread panicked");
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct RenderWorker {
    handle: RenderHandle,
    pipeline: RenderPipeline,
    provider: Arc<dyn ContextProvider>,
    on_ready: SurfaceReadyListener,
    /// Whether the current surface has been announced to `on_ready`
    announced: bool,
}

impl RenderWorker {
    fn run(&mut self, shared: &Shared) {
        info!("Render thread started");
        loop {
            let event = {
                let mut queue = shared.lock();
                loop {
                    if queue.shutdown {
                        break None;
                    }
                    if let Some(event) = queue.events.pop_front() {
                        break Some(event);
                    }
                    queue = shared
                        .wake
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            let Some(event) = event else {
                break;
            };

            if let Err(e) = self.handle(event) {
                error!(error = %e, "Fatal GPU error, stopping render thread");
                *shared.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                shared.lock().events.clear();
                break;
            }
        }

        self.pipeline.release();
        shared.running.store(false, Ordering::SeqCst);
        info!("Render thread exiting");
    }

    fn handle(&mut self, event: RenderEvent) -> GpuResult<()> {
        match event {
            RenderEvent::SurfaceCreated => {
                let driver = self.provider.create_shared_driver()?;
                self.pipeline.on_surface_created(driver)?;
                self.announced = false;
            }
            RenderEvent::SurfaceChanged { width, height } => {
                self.pipeline.on_surface_changed(width, height)?;
                if !self.announced
                    && let Some(target) = self.pipeline.preview_target()
                {
                    self.announced = true;
                    (self.on_ready)(&self.handle, target, width, height);
                }
            }
            RenderEvent::Task(task) => task(&mut self.pipeline)?,
            RenderEvent::Draw => self.pipeline.draw_frame()?,
            RenderEvent::Teardown => {
                if self.pipeline.has_context() {
                    self.pipeline.release();
                } else {
                    warn!("Teardown without a render context");
                }
            }
        }
        Ok(())
    }
}
