//! Listening socket with accept backpressure.
//!
//! # Responsibilities
//! - Bind a TCP address (explicit backlog, `SO_REUSEADDR`) or a Unix path
//! - Accept connections and detach them for hand-off to a worker
//! - Enforce `max_connections` via a semaphore
//! - Retry transient accept errors with backoff

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, UnixListener};
use tokio::sync::{broadcast, Semaphore};

use crate::observability::metrics;
use crate::transport::backoff::{calculate_backoff, is_transient_accept_error};
use crate::transport::endpoint::{BindOptions, EndpointAddr, ListenEndpoint};
use crate::transport::stream::StdSocket;

const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
}

/// A slot in the connection limit, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// A connection taken off the listen queue, not yet bound to any loop.
#[derive(Debug)]
pub struct Accepted {
    pub socket: StdSocket,
    pub peer: EndpointAddr,
    pub local: EndpointAddr,
    pub permit: ConnectionPermit,
}

enum Inner {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

/// A bound listener that limits concurrent connections.
pub struct Listener {
    inner: Inner,
    endpoint: ListenEndpoint,
    connection_limit: Arc<Semaphore>,
    options: BindOptions,
}

fn bind_error(endpoint: &ListenEndpoint) -> impl FnOnce(io::Error) -> ListenerError + '_ {
    move |source| ListenerError::Bind {
        endpoint: endpoint.to_string(),
        source,
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn detach_tcp(stream: tokio::net::TcpStream) -> io::Result<(StdSocket, EndpointAddr)> {
    let local = stream.local_addr()?;
    stream.set_nodelay(true)?;
    Ok((StdSocket::Tcp(stream.into_std()?), EndpointAddr::Tcp(local)))
}

/// Per-connection setup failures cost that connection only.
fn skip_failed_setup<T>(setup: io::Result<T>) -> Option<T> {
    match setup {
        Ok(detached) => Some(detached),
        Err(e) => {
            metrics::accept_error(e.kind());
            tracing::warn!(error = %e, "Dropping connection that failed setup");
            None
        }
    }
}

impl Listener {
    /// Bind `endpoint`. Must be called inside a Tokio runtime.
    pub fn bind(endpoint: &ListenEndpoint, options: BindOptions) -> Result<Self, ListenerError> {
        let inner = match endpoint {
            ListenEndpoint::Tcp(addr) => {
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(bind_error(endpoint))?;
                socket.set_reuseaddr(true).map_err(bind_error(endpoint))?;
                socket.bind(*addr).map_err(bind_error(endpoint))?;
                Inner::Tcp(socket.listen(options.backlog).map_err(bind_error(endpoint))?)
            }
            ListenEndpoint::Unix(path) => {
                remove_stale_socket(path).map_err(bind_error(endpoint))?;
                let listener = UnixListener::bind(path).map_err(bind_error(endpoint))?;
                Inner::Unix {
                    listener,
                    path: path.clone(),
                }
            }
        };

        let listener = Self {
            inner,
            endpoint: endpoint.clone(),
            connection_limit: Arc::new(Semaphore::new(options.max_connections)),
            options,
        };

        tracing::info!(
            endpoint = %listener.local_endpoint(),
            backlog = listener.options.backlog,
            max_connections = listener.options.max_connections,
            tls = listener.options.tls.is_some(),
            "Listener bound"
        );
        Ok(listener)
    }

    /// Accept one connection, waiting for a free slot first.
    ///
    /// A connection that fails setup after leaving the listen queue (peer
    /// reset before `local_addr`, `set_nodelay` or detaching) is dropped and
    /// counted; accepting continues with the next one. Only errors from the
    /// listen socket itself are returned.
    pub async fn accept(&self) -> io::Result<Accepted> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit closed"))?;

        let (socket, peer, local) = loop {
            let setup = match &self.inner {
                Inner::Tcp(listener) => {
                    let (stream, peer) = listener.accept().await?;
                    detach_tcp(stream).map(|(socket, local)| (socket, EndpointAddr::Tcp(peer), local))
                }
                Inner::Unix { listener, path } => {
                    let (stream, peer) = listener.accept().await?;
                    let peer = EndpointAddr::Unix(peer.as_pathname().map(Path::to_path_buf));
                    stream
                        .into_std()
                        .map(|socket| (StdSocket::Unix(socket), peer, EndpointAddr::Unix(Some(path.clone()))))
                }
            };
            if let Some(detached) = skip_failed_setup(setup) {
                break detached;
            }
        };

        let accepted = Accepted {
            socket,
            peer,
            local,
            permit: ConnectionPermit { _permit: permit },
        };
        tracing::debug!(
            peer_addr = %accepted.peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );
        Ok(accepted)
    }

    /// Accept until `shutdown` fires, handing each connection to `dispatch`.
    ///
    /// `dispatch` returning `false` also stops the loop. Transient errors are
    /// retried after a backoff; anything else is returned. Existing
    /// connections are left alone either way.
    pub async fn accept_loop<F>(&self, mut dispatch: F, mut shutdown: broadcast::Receiver<()>) -> Result<u64, ListenerError>
    where
        F: FnMut(Accepted) -> bool,
    {
        let mut accepted_total = 0u64;
        let mut failures = 0u32;

        loop {
            let result = tokio::select! {
                _ = shutdown.recv() => break,
                r = self.accept() => r,
            };

            match result {
                Ok(conn) => {
                    failures = 0;
                    accepted_total += 1;
                    metrics::connection_accepted();
                    if !dispatch(conn) {
                        tracing::warn!("No worker accepted the connection, stopping accept loop");
                        break;
                    }
                }
                Err(e) if is_transient_accept_error(&e) => {
                    failures = failures.saturating_add(1);
                    metrics::accept_error(e.kind());
                    let delay = calculate_backoff(failures, ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Transient accept error, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    metrics::accept_error(e.kind());
                    tracing::error!(error = %e, "Accept failed");
                    return Err(ListenerError::Accept(e));
                }
            }
        }

        tracing::info!(endpoint = %self.endpoint, accepted = accepted_total, "Listener stopped accepting");
        Ok(accepted_total)
    }

    /// Bound address; resolves port 0 for TCP.
    pub fn local_endpoint(&self) -> ListenEndpoint {
        match &self.inner {
            Inner::Tcp(listener) => listener
                .local_addr()
                .map(ListenEndpoint::Tcp)
                .unwrap_or_else(|_| self.endpoint.clone()),
            Inner::Unix { path, .. } => ListenEndpoint::Unix(path.clone()),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.options.max_connections
    }

    pub fn options(&self) -> &BindOptions {
        &self.options
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Inner::Unix { path, .. } = &self.inner {
            let _ = std::fs::remove_file(path);
        }
    }
}
