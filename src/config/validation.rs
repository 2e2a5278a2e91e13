//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and relationships. All
//! problems are collected, not just the first.

use std::fmt;

use crate::config::schema::ServerConfig;
use crate::transport::endpoint::ListenEndpoint;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "compact"];
/// `sun_path` capacity on Linux, minus the terminating NUL.
const MAX_UNIX_PATH_BYTES: usize = 107;

/// Check `config`, returning every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let ListenEndpoint::Unix(path) = &config.listener.endpoint {
        if path.as_os_str().len() > MAX_UNIX_PATH_BYTES {
            errors.push(ValidationError::new(
                "listener.endpoint",
                format!("unix socket path longer than {MAX_UNIX_PATH_BYTES} bytes"),
            ));
        }
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be greater than 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls", "cert_path and key_path are required"));
        }
    }

    let limits = &config.limits;
    if limits.max_request_line_bytes < 16 {
        errors.push(ValidationError::new("limits.max_request_line_bytes", "must be at least 16"));
    }
    if limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than 0"));
    }
    if limits.max_header_count == 0 {
        errors.push(ValidationError::new("limits.max_header_count", "must be greater than 0"));
    }
    if limits.max_frame_size == 0 {
        errors.push(ValidationError::new("limits.max_frame_size", "must be greater than 0"));
    }

    if config.timeouts.keep_alive_secs == 0 {
        errors.push(ValidationError::new("timeouts.keep_alive_secs", "must be greater than 0"));
    }
    if config.timeouts.request_headers_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_headers_secs", "must be greater than 0"));
    }

    let flow = &config.flow_control;
    if flow.input_resume_bytes > flow.input_pause_bytes {
        errors.push(ValidationError::new(
            "flow_control.input_resume_bytes",
            "must not exceed input_pause_bytes",
        ));
    }
    if flow.output_resume_bytes > flow.output_pause_bytes {
        errors.push(ValidationError::new(
            "flow_control.output_resume_bytes",
            "must not exceed output_pause_bytes",
        ));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", config.observability.log_level),
        ));
    }
    if !LOG_FORMATS.contains(&config.observability.log_format.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected one of {LOG_FORMATS:?}"),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
