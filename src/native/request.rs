//! Asynchronous operation requests against a handle.
//!
//! A request checks a stable buffer slot out of the worker's [`BufferPool`]
//! when it is issued and checks it back in only when it completes (or is
//! dropped because the operation was cancelled). At most one request of
//! each [`RequestKind`] can be outstanding on a handle at a time.

use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use thiserror::Error;

/// Default size of one pooled write slot.
pub const DEFAULT_SLOT_SIZE: usize = 16 * 1024;

/// Maximum number of idle slots a pool keeps around.
const MAX_IDLE_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Write,
    Shutdown,
    Connect,
}

impl RequestKind {
    fn bit(self) -> u8 {
        match self {
            RequestKind::Write => 0b001,
            RequestKind::Shutdown => 0b010,
            RequestKind::Connect => 0b100,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("a {0:?} request is already in flight on this handle")]
    AlreadyInFlight(RequestKind),
}

/// Per-handle record of outstanding requests.
#[derive(Debug, Default)]
pub struct InFlight {
    flags: Cell<u8>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, kind: RequestKind) -> Result<(), RequestError> {
        let flags = self.flags.get();
        if flags & kind.bit() != 0 {
            return Err(RequestError::AlreadyInFlight(kind));
        }
        self.flags.set(flags | kind.bit());
        Ok(())
    }

    fn release(&self, kind: RequestKind) {
        self.flags.set(self.flags.get() & !kind.bit());
    }

    pub fn is_in_flight(&self, kind: RequestKind) -> bool {
        self.flags.get() & kind.bit() != 0
    }
}

/// A buffer checked out of a [`BufferPool`].
#[derive(Debug)]
pub struct BufferSlot {
    buf: BytesMut,
}

impl BufferSlot {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Worker-local pool of write slots.
#[derive(Debug)]
pub struct BufferPool {
    slot_size: usize,
    idle: RefCell<Vec<BytesMut>>,
    checked_out: Cell<usize>,
}

impl BufferPool {
    pub fn new(slot_size: usize) -> Self {
        Self {
            slot_size: slot_size.max(1),
            idle: RefCell::new(Vec::new()),
            checked_out: Cell::new(0),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slots currently held by in-flight requests.
    pub fn checked_out(&self) -> usize {
        self.checked_out.get()
    }

    pub fn idle(&self) -> usize {
        self.idle.borrow().len()
    }

    fn check_out(&self) -> BufferSlot {
        let buf = self
            .idle
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.slot_size));
        self.checked_out.set(self.checked_out.get() + 1);
        BufferSlot { buf }
    }

    fn check_in(&self, mut slot: BufferSlot) {
        self.checked_out.set(self.checked_out.get() - 1);
        slot.buf.clear();
        let mut idle = self.idle.borrow_mut();
        if idle.len() < MAX_IDLE_SLOTS && slot.buf.capacity() >= self.slot_size {
            idle.push(slot.buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_SIZE)
    }
}

/// An outstanding write of at most one slot of bytes.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    pool: &'a BufferPool,
    inflight: &'a InFlight,
    slot: Option<BufferSlot>,
}

impl<'a> WriteRequest<'a> {
    /// Issue a write, copying up to one slot of `data` into a pooled buffer.
    pub fn begin(pool: &'a BufferPool, inflight: &'a InFlight, data: &[u8]) -> Result<Self, RequestError> {
        inflight.acquire(RequestKind::Write)?;
        let mut slot = pool.check_out();
        let n = data.len().min(pool.slot_size);
        slot.buf.extend_from_slice(&data[..n]);
        Ok(Self {
            pool,
            inflight,
            slot: Some(slot),
        })
    }

    /// Bytes this request carries.
    pub fn buffer(&self) -> &[u8] {
        self.slot.as_ref().map(BufferSlot::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Completion: returns the slot to the pool and reports the byte count.
    pub fn complete(mut self, result: io::Result<()>) -> io::Result<usize> {
        let len = self.len();
        self.finish();
        result.map(|()| len)
    }

    fn finish(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot);
            self.inflight.release(RequestKind::Write);
        }
    }
}

impl Drop for WriteRequest<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// An outstanding shutdown of the write direction.
#[derive(Debug)]
pub struct ShutdownRequest<'a> {
    inflight: &'a InFlight,
    done: bool,
}

impl<'a> ShutdownRequest<'a> {
    pub fn begin(inflight: &'a InFlight) -> Result<Self, RequestError> {
        inflight.acquire(RequestKind::Shutdown)?;
        Ok(Self { inflight, done: false })
    }

    pub fn complete(mut self, result: io::Result<()>) -> io::Result<()> {
        self.done = true;
        self.inflight.release(RequestKind::Shutdown);
        result
    }
}

impl Drop for ShutdownRequest<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inflight.release(RequestKind::Shutdown);
        }
    }
}

/// An outstanding outbound connect.
#[derive(Debug)]
pub struct ConnectRequest<'a> {
    inflight: &'a InFlight,
    target: Option<SocketAddr>,
    done: bool,
}

impl<'a> ConnectRequest<'a> {
    pub fn begin(inflight: &'a InFlight, target: Option<SocketAddr>) -> Result<Self, RequestError> {
        inflight.acquire(RequestKind::Connect)?;
        Ok(Self {
            inflight,
            target,
            done: false,
        })
    }

    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    pub fn complete<T>(mut self, result: io::Result<T>) -> io::Result<T> {
        self.done = true;
        self.inflight.release(RequestKind::Connect);
        result
    }
}

impl Drop for ConnectRequest<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inflight.release(RequestKind::Connect);
        }
    }
}
