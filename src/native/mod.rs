//! Native loop and handle primitives.
//!
//! # Data Flow
//! ```text
//! worker thread start
//!     → event_loop.rs (EventLoop::init, one per thread)
//!     → handle.rs     (HandleTable: Open → Closing → Closed → released)
//!     → request.rs    (Write/Shutdown/Connect requests holding pooled slots)
//! worker thread end
//!     → EventLoop dropped with the thread
//! ```
//!
//! # Design Decisions
//! - A loop is `!Send`; other threads only ever hold a `LoopStopper`
//! - Slots are freed only from `Closed`, never directly by the caller
//! - Request buffers return to the pool from the completion path only

pub mod event_loop;
pub mod handle;
pub mod request;

pub use event_loop::{EventLoop, LocalSpawner, LoopError, LoopStopper, RunMode};
pub use handle::{HandleError, HandleId, HandleState, HandleTable};
pub use request::{BufferPool, ConnectRequest, InFlight, RequestError, RequestKind, ShutdownRequest, WriteRequest};
