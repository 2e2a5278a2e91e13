//! spindle: multi-threaded HTTP/1.x server engine.
//!
//! Sockets are accepted on one task and handed round-robin to a fixed pool
//! of worker threads, each running its own single-threaded event loop.
//! Connections are exposed to the protocol as a pair of flow-controlled
//! pipes; the HTTP/1.x protocol hands each request to a [`Handler`] through
//! [`HttpContext`].

// Core subsystems
pub mod connection;
pub mod frame;
pub mod http;
pub mod native;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use http::{handler_fn, Handler, HttpContext, HttpServer};
pub use lifecycle::Shutdown;
