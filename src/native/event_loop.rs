//! Per-thread event loop.
//!
//! Each worker thread owns exactly one [`EventLoop`]: a current-thread Tokio
//! runtime paired with a [`LocalSet`] so every task spawned on it runs on the
//! owning thread, one callback at a time.

use std::cell::Cell;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};
use tokio::time::Instant;

/// Error raised while bringing up a loop.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("failed to initialize event loop for worker {worker_id}: {source}")]
    Init {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },
}

/// How [`EventLoop::run`] should drive the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Block until [`EventLoop::stop`] is requested or no active handles remain.
    Default,
    /// Run callbacks that are ready right now and return.
    NoWait,
}

/// Count of live tasks registered on a loop.
#[derive(Debug, Default)]
struct ActiveHandles {
    count: Cell<usize>,
    idle: Notify,
}

impl ActiveHandles {
    fn acquire(self: &Rc<Self>) -> ActiveGuard {
        self.count.set(self.count.get() + 1);
        ActiveGuard {
            handles: Rc::clone(self),
        }
    }
}

struct ActiveGuard {
    handles: Rc<ActiveHandles>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let remaining = self.handles.count.get() - 1;
        self.handles.count.set(remaining);
        if remaining == 0 {
            self.handles.idle.notify_one();
        }
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Thread-safe handle that asks a loop to stop.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    signal: Arc<StopSignal>,
}

impl LoopStopper {
    /// Request loop exit after the current batch of callbacks.
    pub fn stop(&self) {
        self.signal.request();
    }
}

/// Spawns tasks onto the loop of the current thread and counts them as
/// active handles.
#[derive(Clone)]
pub struct LocalSpawner {
    active: Rc<ActiveHandles>,
}

impl LocalSpawner {
    /// Spawn a task on the current loop.
    ///
    /// Must be called from inside a task running on the owning loop.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let guard = self.active.acquire();
        tokio::task::spawn_local(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Number of live tasks on the loop.
    pub fn active_count(&self) -> usize {
        self.active.count.get()
    }
}

/// A single-threaded event loop owned by one worker thread.
pub struct EventLoop {
    worker_id: usize,
    runtime: Runtime,
    local: LocalSet,
    active: Rc<ActiveHandles>,
    stop: Arc<StopSignal>,
    _not_send: PhantomData<Rc<()>>,
}

impl EventLoop {
    /// Allocate the loop resources for the calling thread.
    pub fn init(worker_id: usize) -> Result<Self, LoopError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| LoopError::Init { worker_id, source })?;

        tracing::debug!(worker_id, "Event loop initialized");

        Ok(Self {
            worker_id,
            runtime,
            local: LocalSet::new(),
            active: Rc::new(ActiveHandles::default()),
            stop: Arc::new(StopSignal::default()),
            _not_send: PhantomData,
        })
    }

    /// Worker this loop belongs to.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Spawn a task onto this loop. It starts running once [`run`](Self::run) is called.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let guard = self.active.acquire();
        self.local.spawn_local(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Spawner usable from tasks already running on this loop.
    pub fn spawner(&self) -> LocalSpawner {
        LocalSpawner {
            active: Rc::clone(&self.active),
        }
    }

    /// A `Send` handle that can stop this loop from another thread.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            signal: Arc::clone(&self.stop),
        }
    }

    /// Request loop exit after the current batch of callbacks.
    pub fn stop(&self) {
        self.stop.request();
    }

    /// Number of live tasks on the loop.
    pub fn active_count(&self) -> usize {
        self.active.count.get()
    }

    /// The loop's monotonic clock.
    pub fn now(&self) -> Instant {
        let _enter = self.runtime.enter();
        Instant::now()
    }

    /// Drive the loop on the calling thread.
    pub fn run(&self, mode: RunMode) {
        match mode {
            RunMode::Default => {
                self.local.block_on(&self.runtime, async {
                    loop {
                        if self.stop.is_requested() || self.active.count.get() == 0 {
                            break;
                        }
                        tokio::select! {
                            _ = self.stop.notify.notified() => {}
                            _ = self.active.idle.notified() => {}
                        }
                    }
                });
                tracing::debug!(
                    worker_id = self.worker_id,
                    active = self.active.count.get(),
                    "Event loop exited"
                );
            }
            RunMode::NoWait => {
                self.local
                    .block_on(&self.runtime, tokio::task::yield_now());
            }
        }
    }
}
