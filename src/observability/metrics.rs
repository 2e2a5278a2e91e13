//! Metrics collection.
//!
//! Recorded through the `metrics` facade; the binary or embedding
//! application decides whether to install an exporter.
//!
//! # Metrics
//! - `spindle_connections_accepted_total` (counter)
//! - `spindle_connections_closed_total` (counter)
//! - `spindle_active_connections` (gauge)
//! - `spindle_accept_errors_total` (counter): by error kind
//! - `spindle_requests_total` (counter): by method, status
//! - `spindle_request_duration_seconds` (histogram): by method
//! - `spindle_bad_requests_total` (counter): by reason

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub fn connection_accepted() {
    counter!("spindle_connections_accepted_total").increment(1);
}

pub fn connection_opened(active: u64) {
    gauge!("spindle_active_connections").set(active as f64);
}

pub fn connection_closed(active: u64) {
    counter!("spindle_connections_closed_total").increment(1);
    gauge!("spindle_active_connections").set(active as f64);
}

pub fn accept_error(kind: std::io::ErrorKind) {
    counter!("spindle_accept_errors_total", "kind" => format!("{kind:?}")).increment(1);
}

pub fn bad_request(reason: &'static str) {
    counter!("spindle_bad_requests_total", "reason" => reason).increment(1);
}

pub fn request_completed(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "spindle_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("spindle_request_duration_seconds", "method" => method.to_string()).record(elapsed.as_secs_f64());
}
