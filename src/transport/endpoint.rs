//! Listening endpoints and peer addresses.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::transport::listener::ListenerError;

/// Address of either end of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddr {
    Tcp(SocketAddr),
    /// Unix peers are usually unnamed.
    Unix(Option<PathBuf>),
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddr::Tcp(addr) => write!(f, "{addr}"),
            EndpointAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            EndpointAddr::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

/// Where a listener binds.
///
/// Parsed from `host:port` or `unix:/path/to/socket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ListenEndpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for ListenEndpoint {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ListenerError::InvalidEndpoint(s.to_string()));
            }
            return Ok(ListenEndpoint::Unix(PathBuf::from(path)));
        }
        s.parse::<SocketAddr>()
            .map(ListenEndpoint::Tcp)
            .map_err(|_| ListenerError::InvalidEndpoint(s.to_string()))
    }
}

impl TryFrom<String> for ListenEndpoint {
    type Error = ListenerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenEndpoint> for String {
    fn from(value: ListenEndpoint) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenEndpoint::Tcp(addr) => write!(f, "{addr}"),
            ListenEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl Default for ListenEndpoint {
    fn default() -> Self {
        ListenEndpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

/// TLS parameters carried through bind unchanged. Nothing in the crate
/// terminates TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    pub cert_path: String,
    pub key_path: String,
}

/// Options fixed at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    pub backlog: u32,
    pub max_connections: usize,
    pub tls: Option<TlsOptions>,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            backlog: 1024,
            max_connections: 10_000,
            tls: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_and_unix() {
        let tcp: ListenEndpoint = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(tcp, ListenEndpoint::Tcp("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(tcp.to_string(), "127.0.0.1:9000");

        let unix: ListenEndpoint = "unix:/tmp/spindle.sock".parse().unwrap();
        assert_eq!(unix, ListenEndpoint::Unix(PathBuf::from("/tmp/spindle.sock")));
        assert_eq!(unix.to_string(), "unix:/tmp/spindle.sock");
    }

    #[test]
    fn rejects_garbage() {
        assert!("localhost".parse::<ListenEndpoint>().is_err());
        assert!("unix:".parse::<ListenEndpoint>().is_err());
        assert!("1.2.3.4:99999".parse::<ListenEndpoint>().is_err());
    }

    #[test]
    fn display_peer_addresses() {
        let tcp = EndpointAddr::Tcp("[::1]:80".parse().unwrap());
        assert_eq!(tcp.to_string(), "[::1]:80");
        assert_eq!(EndpointAddr::Unix(None).to_string(), "unix:(unnamed)");
    }
}
