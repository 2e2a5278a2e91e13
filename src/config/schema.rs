//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::transport::endpoint::{ListenEndpoint, TlsOptions};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Where to listen and how many connections to admit.
    pub listener: ListenerConfig,

    /// Worker thread pool.
    pub workers: WorkerConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Connection timeouts.
    pub timeouts: TimeoutConfig,

    /// Pipe backpressure thresholds.
    pub flow_control: FlowControlConfig,

    /// Optional response headers.
    pub response: ResponseConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// `host:port` or `unix:/path`.
    pub endpoint: ListenEndpoint,

    /// Listen queue length.
    pub backlog: u32,

    /// Maximum concurrent connections (backpressure on accept).
    pub max_connections: usize,

    /// Accepted and passed through; TLS is not terminated here.
    pub tls: Option<TlsOptions>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            endpoint: ListenEndpoint::default(),
            backlog: 1024,
            max_connections: 10_000,
            tls: None,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads. `0` means one per available CPU.
    pub count: usize,

    /// How long in-flight requests get to finish on shutdown.
    pub drain_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            drain_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Worker count with `0` resolved.
    pub fn resolved_count(&self) -> usize {
        if self.count > 0 {
            return self.count;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted request line, CRLF excluded.
    pub max_request_line_bytes: usize,

    /// Total size of the header block (and of chunked trailers).
    pub max_header_bytes: usize,

    /// Maximum number of header fields.
    pub max_header_count: usize,

    /// Maximum request body size; unlimited when absent.
    pub max_body_bytes: Option<u64>,

    /// Largest frame payload the frame reader buffers.
    pub max_frame_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_line_bytes: 8 * 1024,
            max_header_bytes: 32 * 1024,
            max_header_count: 100,
            max_body_bytes: Some(30_000_000),
            max_frame_size: 16 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle time allowed between requests on a persistent connection.
    pub keep_alive_secs: u64,

    /// Time allowed to receive a complete request head.
    pub request_headers_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 130,
            request_headers_secs: 30,
        }
    }
}

/// Pause/resume thresholds for the connection pipes, in bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub input_pause_bytes: usize,
    pub input_resume_bytes: usize,
    pub output_pause_bytes: usize,
    pub output_resume_bytes: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            input_pause_bytes: 1024 * 1024,
            input_resume_bytes: 512 * 1024,
            output_pause_bytes: 64 * 1024,
            output_resume_bytes: 32 * 1024,
        }
    }
}

/// Headers added to every response.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResponseConfig {
    pub add_server_header: bool,
    pub add_date_header: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// `pretty` or `compact`.
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}
