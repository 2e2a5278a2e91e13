//! Response head serialization.
//!
//! # Responsibilities
//! - Canonical reason phrases
//! - Status line and header block serialization
//! - Cached `Date` header values
//!
//! # Design Decisions
//! - The status line always advertises HTTP/1.1, whatever the request version
//! - Headers are written in insertion order, exactly as the application set them

use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use chrono::Utc;

use crate::http::headers::HeaderMap;

/// Canonical reason phrase for `status`.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// Statuses that never carry a body.
pub fn is_bodyless_status(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 205 || status == 304
}

/// Interim response sent for `Expect: 100-continue`.
pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
        }
    }

    /// Custom reason if set, canonical phrase otherwise.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_else(|| reason_phrase(self.status))
    }

    /// Serialize the status line, headers and terminating blank line.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(self.status.to_string().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.reason().as_bytes());
        dst.put_slice(b"\r\n");
        self.headers.write_to(dst);
        dst.put_slice(b"\r\n");
    }
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new(200)
    }
}

/// IMF-fixdate value for the `Date` header, recomputed at most once a second.
#[derive(Debug, Default)]
pub struct DateCache {
    cached: Mutex<(i64, String)>,
}

impl DateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> String {
        let now = Utc::now();
        let second = now.timestamp();
        let mut cached = self.cached.lock().expect("date cache mutex poisoned");
        if cached.0 != second || cached.1.is_empty() {
            *cached = (second, now.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        }
        cached.1.clone()
    }
}
