//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging → Bind listener → Start workers
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Workers drain → Abort stragglers
//!     after the drain timeout → Join worker threads
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
