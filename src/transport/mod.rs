//! Network transport subsystem.
//!
//! # Data Flow
//! ```text
//! ListenEndpoint + BindOptions
//!     → listener.rs (bind, accept with permits, backoff on transient errors)
//!     → worker.rs (round-robin hand-off, one EventLoop per thread)
//!     → stream.rs (socket re-registered on the worker's loop)
//!     → connection pumps
//! ```
//!
//! # Design Decisions
//! - A connection never changes worker
//! - The connection permit travels with the socket and is released when the
//!   connection ends
//! - Stopping the accept loop leaves existing connections untouched

pub mod backoff;
pub mod endpoint;
pub mod listener;
pub mod stream;
pub mod worker;

pub use endpoint::{BindOptions, EndpointAddr, ListenEndpoint, TlsOptions};
pub use listener::{Accepted, ConnectionPermit, Listener, ListenerError};
pub use stream::{connect, StdSocket, TransportStream};
pub use worker::{WorkerError, WorkerPool};
