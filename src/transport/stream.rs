//! Connected byte streams, server and client side.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use crate::native::request::{ConnectRequest, InFlight};
use crate::transport::endpoint::ListenEndpoint;

/// A socket detached from the loop that accepted it, ready to be handed to
/// another thread.
#[derive(Debug)]
pub enum StdSocket {
    Tcp(std::net::TcpStream),
    Unix(std::os::unix::net::UnixStream),
}

impl StdSocket {
    /// Register the socket with the loop of the calling thread.
    ///
    /// Must run inside a task on that loop.
    pub fn into_transport(self) -> io::Result<TransportStream> {
        match self {
            StdSocket::Tcp(s) => TcpStream::from_std(s).map(TransportStream::Tcp),
            StdSocket::Unix(s) => UnixStream::from_std(s).map(TransportStream::Unix),
        }
    }
}

/// A connected stream on the current loop.
#[derive(Debug)]
pub enum TransportStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for TransportStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            TransportStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            TransportStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            TransportStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            TransportStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Dial `endpoint` as a client.
pub async fn connect(endpoint: &ListenEndpoint) -> io::Result<TransportStream> {
    let inflight = InFlight::new();
    let target = match endpoint {
        ListenEndpoint::Tcp(addr) => Some(*addr),
        ListenEndpoint::Unix(_) => None,
    };
    let request = ConnectRequest::begin(&inflight, target).map_err(io::Error::other)?;

    let result = match endpoint {
        ListenEndpoint::Tcp(addr) => TcpStream::connect(addr).await.map(|s| {
            let _ = s.set_nodelay(true);
            TransportStream::Tcp(s)
        }),
        ListenEndpoint::Unix(path) => UnixStream::connect(path).await.map(TransportStream::Unix),
    };

    let stream = request.complete(result)?;
    tracing::debug!(endpoint = %endpoint, "Connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = ListenEndpoint::Tcp(listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).await.unwrap();
            s.write_all(&buf).await.unwrap();
        });

        let mut client = connect(&endpoint).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(connect(&ListenEndpoint::Tcp(addr)).await.is_err());
    }
}
