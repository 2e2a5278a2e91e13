//! Per-connection state shared between the socket pumps and the protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::connection::pipe::{pipe, AbortReason, PipeOptions, PipeReader, PipeWriter};
use crate::connection::tracker::ConnectionId;
use crate::transport::endpoint::EndpointAddr;

/// Cancellation token for one connection.
///
/// The first abort wins; every clone observes it. Aborting also fails all
/// pending and future pipe operations on the connection.
#[derive(Debug, Clone)]
pub struct Lifetime {
    state: Arc<watch::Sender<Option<AbortReason>>>,
    input: PipeWriter,
    output: PipeReader,
}

impl Lifetime {
    /// Abort the connection. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let first = self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            self.input.abort(reason);
            self.output.abort(reason);
        }
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        *self.state.borrow()
    }

    /// Resolves once the connection is aborted.
    pub async fn aborted(&self) -> AbortReason {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `self`, so this is unreachable while
                // `self` is borrowed; park instead of spinning.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Flow-control thresholds for the two pipes of a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeSettings {
    pub input: PipeOptions,
    pub output: PipeOptions,
}

/// Application-side view of a connection.
#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    peer: EndpointAddr,
    local: EndpointAddr,
    input: PipeReader,
    output: PipeWriter,
    lifetime: Lifetime,
    in_exchange: Arc<AtomicBool>,
}

/// Socket-side view of a connection, driven by the pumps.
#[derive(Debug)]
pub struct TransportSide {
    pub input: PipeWriter,
    pub output: PipeReader,
    pub lifetime: Lifetime,
    in_exchange: Arc<AtomicBool>,
}

impl TransportSide {
    /// Whether a request is being served and its response is not finished.
    ///
    /// The peer closing its side during that window means it is gone.
    pub fn in_exchange(&self) -> bool {
        self.in_exchange.load(Ordering::Acquire)
    }
}

impl ConnectionContext {
    /// Create both views of a fresh connection.
    pub fn new(
        id: ConnectionId,
        peer: EndpointAddr,
        local: EndpointAddr,
        settings: PipeSettings,
    ) -> (Self, TransportSide) {
        let (input_writer, input_reader) = pipe(settings.input);
        let (output_writer, output_reader) = pipe(settings.output);
        let (tx, _) = watch::channel(None);
        let in_exchange = Arc::new(AtomicBool::new(false));
        let lifetime = Lifetime {
            state: Arc::new(tx),
            input: input_writer.clone(),
            output: output_reader.clone(),
        };

        let context = Self {
            id,
            peer,
            local,
            input: input_reader,
            output: output_writer,
            lifetime: lifetime.clone(),
            in_exchange: Arc::clone(&in_exchange),
        };
        let side = TransportSide {
            input: input_writer,
            output: output_reader,
            lifetime,
            in_exchange,
        };
        (context, side)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &EndpointAddr {
        &self.peer
    }

    pub fn local(&self) -> &EndpointAddr {
        &self.local
    }

    /// Bytes received from the peer.
    pub fn input(&self) -> &PipeReader {
        &self.input
    }

    /// Bytes to send to the peer.
    pub fn output(&self) -> &PipeWriter {
        &self.output
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Mark the start of a request; a peer FIN now aborts the connection.
    pub fn begin_exchange(&self) {
        self.in_exchange.store(true, Ordering::Release);
    }

    /// Mark the response as finished; a peer FIN is a plain half-close again.
    pub fn end_exchange(&self) {
        self.in_exchange.store(false, Ordering::Release);
    }

    pub fn abort(&self, reason: AbortReason) {
        if self.lifetime.abort(reason) {
            tracing::debug!(connection_id = %self.id, reason = %reason, "Connection aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::pipe::PipeError;

    fn context() -> (ConnectionContext, TransportSide) {
        ConnectionContext::new(
            ConnectionId::new(),
            EndpointAddr::Unix(None),
            EndpointAddr::Unix(None),
            PipeSettings::default(),
        )
    }

    #[tokio::test]
    async fn abort_fails_both_pipes() {
        let (ctx, side) = context();
        ctx.abort(AbortReason::Aborted);

        assert_eq!(
            ctx.input().read().await.unwrap_err(),
            PipeError::Aborted(AbortReason::Aborted)
        );
        assert!(ctx.output().write(&b"late"[..]).await.is_err());
        assert!(side.input.write(&b"late"[..]).await.is_err());
        assert_eq!(side.lifetime.reason(), Some(AbortReason::Aborted));
    }

    #[test]
    fn exchange_flag_is_shared_with_transport() {
        let (ctx, side) = context();
        assert!(!side.in_exchange());
        ctx.begin_exchange();
        assert!(side.in_exchange());
        ctx.end_exchange();
        assert!(!side.in_exchange());
    }

    #[tokio::test]
    async fn first_abort_wins() {
        let (ctx, side) = context();
        assert!(side.lifetime.abort(AbortReason::ConnectionReset));
        assert!(!ctx.lifetime().abort(AbortReason::TimedOut));
        assert_eq!(ctx.lifetime().aborted().await, AbortReason::ConnectionReset);
    }

    #[tokio::test]
    async fn aborted_wakes_waiter() {
        let (ctx, side) = context();
        let lifetime = ctx.lifetime().clone();
        let waiter = tokio::spawn(async move { lifetime.aborted().await });
        tokio::task::yield_now().await;
        side.lifetime.abort(AbortReason::ServerShutdown);
        assert_eq!(waiter.await.unwrap(), AbortReason::ServerShutdown);
    }

    #[tokio::test]
    async fn pipes_complete_independently() {
        let (ctx, side) = context();
        side.input.complete();
        let result = ctx.input().read().await.unwrap();
        assert!(result.is_completed);

        ctx.output().write(&b"still open"[..]).await.unwrap();
        let out = side.output.read().await.unwrap();
        assert_eq!(&out.buffer[..], b"still open");
        assert!(!ctx.lifetime().is_aborted());
    }
}
