//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events: connection_id, peer_addr, worker_id)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//! ```

pub mod logging;
pub mod metrics;
