//! Connection-level timers.
//!
//! Only one deadline is armed at a time: the keep-alive timer while waiting
//! for the first byte of a request, the request-headers timer while the
//! request head is being received. Timers run on the worker's loop.
//!
//! The keep-alive duration also bounds how long a request body may go
//! without new bytes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::TimeoutConfig;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No request bytes arrived on an idle connection.
    KeepAlive,
    /// The request head did not complete in time.
    RequestHeaders,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::KeepAlive => write!(f, "keep-alive"),
            TimeoutKind::RequestHeaders => write!(f, "request-headers"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutControl {
    keep_alive: Duration,
    request_headers: Duration,
    armed: Option<(Instant, TimeoutKind)>,
}

impl TimeoutControl {
    pub fn new(keep_alive: Duration, request_headers: Duration) -> Self {
        Self {
            keep_alive,
            request_headers,
            armed: None,
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(
            Duration::from_secs(config.keep_alive_secs),
            Duration::from_secs(config.request_headers_secs),
        )
    }

    /// Longest a connection may sit with no bytes from the peer.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Arm the idle timer, replacing any armed deadline.
    pub fn start_keep_alive(&mut self) {
        self.armed = Some((Instant::now() + self.keep_alive, TimeoutKind::KeepAlive));
    }

    /// Arm the request-headers timer unless it is already running.
    pub fn start_request_headers(&mut self) {
        if !matches!(self.armed, Some((_, TimeoutKind::RequestHeaders))) {
            self.armed = Some((Instant::now() + self.request_headers, TimeoutKind::RequestHeaders));
        }
    }

    pub fn cancel(&mut self) {
        self.armed = None;
    }

    pub fn armed(&self) -> Option<TimeoutKind> {
        self.armed.map(|(_, kind)| kind)
    }

    /// Run `fut` against the armed deadline, if any.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TimeoutKind> {
        match self.armed {
            Some((deadline, kind)) => tokio::time::timeout_at(deadline, fut).await.map_err(|_| kind),
            None => Ok(fut.await),
        }
    }
}
