//! Socket pumps moving bytes between a stream and a connection's pipes.
//!
//! # Data Flow
//! ```text
//! socket ──read pump──▶ input pipe  ──▶ protocol
//! socket ◀─write pump── output pipe ◀── protocol
//! ```
//!
//! The read pump completes the input pipe on FIN and aborts the connection
//! on a reset. A FIN that arrives while a request is being served means the
//! client is gone, so it aborts the connection too. The write pump drains the output pipe through pooled
//! `WriteRequest`s and issues a `ShutdownRequest` once the output completes.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::context::TransportSide;
use crate::connection::pipe::AbortReason;
use crate::connection::tracker::ConnectionId;
use crate::native::request::{BufferPool, InFlight, ShutdownRequest, WriteRequest};

/// Minimum free space requested from the read buffer per socket read.
pub const READ_CHUNK: usize = 4096;

/// How the read side ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Peer sent FIN.
    Eof,
    /// Protocol stopped consuming input.
    ReaderClosed,
    /// Connection was aborted or the socket failed.
    Aborted,
}

/// How the write side ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEnd {
    /// Output completed and the write direction was shut down.
    Shutdown,
    /// Connection was aborted or the socket failed.
    Aborted,
}

/// Byte counts and end states of a finished connection.
#[derive(Debug, Clone, Copy)]
pub struct PumpReport {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_end: ReadEnd,
    pub write_end: WriteEnd,
}

fn abort_reason_for(err: &io::Error) -> AbortReason {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted => {
            AbortReason::ConnectionReset
        }
        _ => AbortReason::Aborted,
    }
}

/// Run both pumps until the connection is fully torn down.
pub async fn run_pumps<S>(
    stream: S,
    side: &TransportSide,
    pool: &BufferPool,
    connection_id: ConnectionId,
) -> PumpReport
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let inflight = InFlight::new();

    let ((bytes_read, read_end), (bytes_written, write_end)) = tokio::join!(
        read_pump(&mut reader, side, connection_id),
        write_pump(&mut writer, side, pool, &inflight, connection_id),
    );

    PumpReport {
        bytes_read,
        bytes_written,
        read_end,
        write_end,
    }
}

async fn read_pump<R>(reader: &mut R, side: &TransportSide, connection_id: ConnectionId) -> (u64, ReadEnd)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut total = 0u64;

    loop {
        buf.reserve(READ_CHUNK);
        let result = tokio::select! {
            r = reader.read_buf(&mut buf) => r,
            _ = side.input.reader_closed() => {
                let end = if side.lifetime.is_aborted() { ReadEnd::Aborted } else { ReadEnd::ReaderClosed };
                return (total, end);
            }
        };

        match result {
            Ok(0) => {
                if side.in_exchange() {
                    tracing::debug!(connection_id = %connection_id, "Client disconnected during request");
                    side.lifetime.abort(AbortReason::ConnectionReset);
                    return (total, ReadEnd::Aborted);
                }
                tracing::trace!(connection_id = %connection_id, "Peer closed write direction");
                side.input.complete();
                return (total, ReadEnd::Eof);
            }
            Ok(n) => {
                total += n as u64;
                // Blocks while the protocol is behind, which stops socket reads.
                if side.input.write(buf.split().freeze()).await.is_err() {
                    let end = if side.lifetime.is_aborted() { ReadEnd::Aborted } else { ReadEnd::ReaderClosed };
                    return (total, end);
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket read failed");
                side.lifetime.abort(abort_reason_for(&e));
                return (total, ReadEnd::Aborted);
            }
        }
    }
}

async fn write_pump<W>(
    writer: &mut W,
    side: &TransportSide,
    pool: &BufferPool,
    inflight: &InFlight,
    connection_id: ConnectionId,
) -> (u64, WriteEnd)
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    loop {
        let Ok(result) = side.output.read().await else {
            return (total, WriteEnd::Aborted);
        };

        let mut offset = 0;
        while offset < result.buffer.len() {
            let request = match WriteRequest::begin(pool, inflight, &result.buffer[offset..]) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "Write request rejected");
                    side.lifetime.abort(AbortReason::Aborted);
                    return (total, WriteEnd::Aborted);
                }
            };

            let io_result = tokio::select! {
                r = writer.write_all(request.buffer()) => r,
                _ = side.lifetime.aborted() => Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            };

            match request.complete(io_result) {
                Ok(n) => {
                    offset += n;
                    total += n as u64;
                    side.output.advance(n);
                }
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Socket write failed");
                    side.lifetime.abort(abort_reason_for(&e));
                    return (total, WriteEnd::Aborted);
                }
            }
        }

        if result.is_completed {
            return (total, shutdown(writer, inflight, connection_id).await);
        }
    }
}

async fn shutdown<W>(writer: &mut W, inflight: &InFlight, connection_id: ConnectionId) -> WriteEnd
where
    W: AsyncWrite + Unpin,
{
    let Ok(request) = ShutdownRequest::begin(inflight) else {
        return WriteEnd::Aborted;
    };
    let result = async {
        writer.flush().await?;
        writer.shutdown().await
    }
    .await;

    match request.complete(result) {
        Ok(()) => WriteEnd::Shutdown,
        Err(e) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "Socket shutdown failed");
            WriteEnd::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::context::{ConnectionContext, PipeSettings};
    use crate::transport::endpoint::EndpointAddr;

    fn context() -> (ConnectionContext, TransportSide) {
        ConnectionContext::new(
            ConnectionId::new(),
            EndpointAddr::Unix(None),
            EndpointAddr::Unix(None),
            PipeSettings::default(),
        )
    }

    #[tokio::test]
    async fn echo_through_pumps() {
        let (client, server) = tokio::io::duplex(64);
        let (ctx, side) = context();
        let pool = BufferPool::new(8);

        let app = async {
            let mut received = Vec::new();
            loop {
                let result = ctx.input().read().await.unwrap();
                received.extend_from_slice(&result.buffer);
                ctx.input().advance(result.buffer.len());
                if result.is_completed {
                    break;
                }
            }
            ctx.output().write(received).await.unwrap();
            ctx.output().complete();
            ctx.input().complete();
        };

        let peer = async {
            let (mut rd, mut wr) = tokio::io::split(client);
            wr.write_all(b"hello over a small pool").await.unwrap();
            wr.shutdown().await.unwrap();
            let mut echoed = Vec::new();
            rd.read_to_end(&mut echoed).await.unwrap();
            echoed
        };

        let (report, (), echoed) = tokio::join!(run_pumps(server, &side, &pool, ctx.id()), app, peer);
        assert_eq!(echoed, b"hello over a small pool");
        assert_eq!(report.read_end, ReadEnd::Eof);
        assert_eq!(report.write_end, WriteEnd::Shutdown);
        assert_eq!(report.bytes_written, 23);
        assert_eq!(pool.checked_out(), 0);
    }

    #[tokio::test]
    async fn fin_during_exchange_aborts_connection() {
        let (client, server) = tokio::io::duplex(64);
        let (ctx, side) = context();
        let pool = BufferPool::default();
        ctx.begin_exchange();

        let peer = async {
            let (_rd, mut wr) = tokio::io::split(client);
            wr.shutdown().await.unwrap();
            ctx.lifetime().aborted().await
        };

        let (report, reason) = tokio::join!(run_pumps(server, &side, &pool, ctx.id()), peer);
        assert_eq!(reason, AbortReason::ConnectionReset);
        assert_eq!(report.read_end, ReadEnd::Aborted);
        assert_eq!(report.write_end, WriteEnd::Aborted);
    }

    #[tokio::test]
    async fn abort_stops_both_pumps() {
        let (_client, server) = tokio::io::duplex(64);
        let (ctx, side) = context();
        let pool = BufferPool::default();

        let abort = async {
            tokio::task::yield_now().await;
            ctx.abort(AbortReason::Aborted);
        };

        let (report, ()) = tokio::join!(run_pumps(server, &side, &pool, ctx.id()), abort);
        assert_eq!(report.read_end, ReadEnd::Aborted);
        assert_eq!(report.write_end, WriteEnd::Aborted);
    }
}
