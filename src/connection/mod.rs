//! Connection subsystem.
//!
//! # Data Flow
//! ```text
//! accepted stream (on its worker)
//!     → tracker.rs   (ConnectionId, live-connection accounting)
//!     → context.rs   (input/output pipes, lifetime token)
//!     → transport.rs (read pump → input pipe, output pipe → write pump)
//!     → protocol consumes input, produces output
//!     → timeout.rs   (keep-alive and request-headers deadlines)
//!
//! Connection States:
//!     Open → (input completed | output completed) → both done → Closed
//!     Open → aborted → Closed
//! ```
//!
//! # Design Decisions
//! - Input and output complete independently (half-close)
//! - Abort is sticky and fails every pending pipe operation
//! - Pipe thresholds give backpressure in both directions

pub mod context;
pub mod pipe;
pub mod timeout;
pub mod tracker;
pub mod transport;

pub use context::{ConnectionContext, Lifetime, PipeSettings, TransportSide};
pub use pipe::{pipe, AbortReason, PipeError, PipeOptions, PipeReader, PipeWriter, ReadResult};
pub use timeout::{TimeoutControl, TimeoutKind};
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
