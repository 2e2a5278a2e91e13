//! Fixed pool of worker threads, one event loop each.
//!
//! # Data Flow
//! ```text
//! accept loop → dispatch (round-robin) → mpsc → worker loop
//!     → StdSocket::into_transport (re-register on this loop)
//!     → HandleTable insert → pumps + Http1Connection → two-phase close
//! ```
//!
//! A connection never leaves the worker that received it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};

use crate::connection::transport::run_pumps;
use crate::connection::{AbortReason, ConnectionContext, ConnectionId, ConnectionTracker, Lifetime};
use crate::http::protocol::Http1Connection;
use crate::http::server::ServiceContext;
use crate::lifecycle::shutdown::drain_requested;
use crate::native::{BufferPool, EventLoop, HandleError, HandleId, HandleTable, LocalSpawner, LoopError, RunMode};
use crate::transport::listener::Accepted;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker_id} failed to start: {source}")]
    Init {
        worker_id: usize,
        #[source]
        source: LoopError,
    },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker {0} panicked")]
    Panicked(usize),
}

/// What a worker keeps per open connection.
#[derive(Debug)]
struct ConnectionEntry {
    id: ConnectionId,
    lifetime: Lifetime,
}

struct WorkerState {
    worker_id: usize,
    service: Arc<ServiceContext>,
    tracker: ConnectionTracker,
    table: RefCell<HandleTable<ConnectionEntry>>,
    pool: BufferPool,
    spawner: LocalSpawner,
    draining: watch::Receiver<bool>,
    released: Notify,
}

/// Pool of worker threads fed by the listener.
pub struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<Accepted>>,
    threads: Vec<JoinHandle<()>>,
    next: AtomicUsize,
    draining: watch::Sender<bool>,
}

impl WorkerPool {
    /// Start `count` workers. Fails, after stopping the ones already
    /// running, if any loop cannot be initialized.
    pub fn start(
        count: usize,
        drain_timeout: Duration,
        service: Arc<ServiceContext>,
        tracker: ConnectionTracker,
    ) -> Result<Self, WorkerError> {
        let (draining, _) = watch::channel(false);
        let mut pool = Self {
            senders: Vec::with_capacity(count),
            threads: Vec::with_capacity(count),
            next: AtomicUsize::new(0),
            draining,
        };

        for worker_id in 0..count.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel();
            let service = Arc::clone(&service);
            let tracker = tracker.clone();
            let draining = pool.draining.subscribe();

            let spawned = std::thread::Builder::new()
                .name(format!("spindle-worker-{worker_id}"))
                .spawn(move || {
                    let event_loop = match EventLoop::init(worker_id) {
                        Ok(lp) => lp,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let state = Rc::new(WorkerState {
                        worker_id,
                        service,
                        tracker,
                        table: RefCell::new(HandleTable::new()),
                        pool: BufferPool::default(),
                        spawner: event_loop.spawner(),
                        draining,
                        released: Notify::new(),
                    });
                    event_loop.spawn(worker_main(state, rx, drain_timeout));
                    event_loop.run(RunMode::Default);
                    tracing::debug!(worker_id, "Worker thread exiting");
                });

            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    pool.stop_now();
                    return Err(WorkerError::Spawn(e));
                }
            };

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    let _ = handle.join();
                    pool.stop_now();
                    return Err(WorkerError::Init { worker_id, source });
                }
                Err(_) => {
                    let _ = handle.join();
                    pool.stop_now();
                    return Err(WorkerError::Panicked(worker_id));
                }
            }

            pool.senders.push(tx);
            pool.threads.push(handle);
        }

        tracing::info!(workers = pool.threads.len(), "Worker pool started");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Hand a connection to the next worker. Returns `false` if no worker
    /// is left to take it.
    pub fn dispatch(&self, mut conn: Accepted) -> bool {
        let workers = self.senders.len();
        for _ in 0..workers {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % workers;
            match self.senders[index].send(conn) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(returned)) => {
                    tracing::warn!(worker_id = index, "Worker is gone, trying the next one");
                    conn = returned;
                }
            }
        }
        false
    }

    /// Drain every worker and join the threads.
    ///
    /// Idle connections close at once, in-flight requests get
    /// `drain_timeout` to finish before they are aborted.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        let Self {
            senders,
            threads,
            draining,
            ..
        } = self;
        draining.send_replace(true);
        drop(senders);

        let results = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .enumerate()
                .map(|(id, t)| t.join().map_err(|_| id))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        for result in results {
            result.map_err(WorkerError::Panicked)?;
        }
        tracing::info!("Worker pool stopped");
        Ok(())
    }

    fn stop_now(&mut self) {
        self.draining.send_replace(true);
        self.senders.clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

async fn worker_main(state: Rc<WorkerState>, mut rx: mpsc::UnboundedReceiver<Accepted>, drain_timeout: Duration) {
    let mut draining = state.draining.clone();
    tracing::debug!(worker_id = state.worker_id, "Worker ready");

    loop {
        tokio::select! {
            conn = rx.recv() => match conn {
                Some(conn) => {
                    state.spawner.spawn(serve_connection(Rc::clone(&state), conn));
                }
                None => break,
            },
            _ = drain_requested(&mut draining) => break,
        }
    }

    // Connections still queued were never started; dropping them closes
    // the sockets and frees their permits.
    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }

    let open = state.table.borrow().len();
    tracing::info!(worker_id = state.worker_id, open, dropped, "Worker draining");

    let drained = tokio::time::timeout(drain_timeout, async {
        loop {
            let released = state.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if state.table.borrow().is_empty() {
                return;
            }
            released.await;
        }
    })
    .await
    .is_ok();

    if !drained {
        let lifetimes: Vec<(HandleId, Lifetime)> = state
            .table
            .borrow()
            .iter_open()
            .map(|(handle, entry)| (handle, entry.lifetime.clone()))
            .collect();
        tracing::warn!(
            worker_id = state.worker_id,
            remaining = lifetimes.len(),
            "Drain timeout elapsed, aborting connections"
        );
        for (handle, lifetime) in lifetimes {
            tracing::debug!(worker_id = state.worker_id, %handle, "Aborting connection");
            lifetime.abort(AbortReason::ServerShutdown);
        }
    }
}

async fn serve_connection(state: Rc<WorkerState>, accepted: Accepted) {
    let Accepted {
        socket,
        peer,
        local,
        permit,
    } = accepted;

    let mut stream = match socket.into_transport() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(worker_id = state.worker_id, peer_addr = %peer, error = %e, "Could not register socket");
            return;
        }
    };

    let guard = state.tracker.track(Some(permit));
    let id = guard.id();
    let (conn, side) = ConnectionContext::new(id, peer.clone(), local, state.service.pipes);

    let handle = state.table.borrow_mut().insert(ConnectionEntry {
        id,
        lifetime: side.lifetime.clone(),
    });
    if let Err(e) = state.table.borrow_mut().begin_op(handle) {
        tracing::error!(connection_id = %id, error = %e, "Connection handle rejected");
        return;
    }

    tracing::debug!(worker_id = state.worker_id, connection_id = %id, peer_addr = %peer, "Connection started");

    let protocol = Http1Connection::new(conn, Arc::clone(&state.service), state.draining.clone());
    let (report, requests) = tokio::join!(run_pumps(&mut stream, &side, &state.pool, id), protocol.run());

    let closed = close_handle(&mut state.table.borrow_mut(), handle, stream);
    state.released.notify_one();
    if let Err(e) = closed {
        tracing::error!(worker_id = state.worker_id, connection_id = %id, error = %e, "Handle close failed");
    }

    tracing::debug!(
        worker_id = state.worker_id,
        connection_id = %id,
        requests,
        bytes_read = report.bytes_read,
        bytes_written = report.bytes_written,
        read_end = ?report.read_end,
        write_end = ?report.write_end,
        "Connection closed"
    );
    drop(guard);
}

/// `Open → Closing → Closed → released`, closing the socket in between.
fn close_handle<S>(table: &mut HandleTable<ConnectionEntry>, handle: HandleId, stream: S) -> Result<ConnectionId, HandleError> {
    table.end_op(handle)?;
    let entry = table.begin_close(handle)?;
    drop(stream);
    table.complete_close(handle)?;
    table.release(handle)?;
    Ok(entry.id)
}
