//! HTTP/1.x connection protocol.
//!
//! # Data Flow
//! ```text
//! input pipe → RequestParser (head) → HttpContext → Handler
//!                                          ↓
//! output pipe ← Response (head, framed body) ← Handler
//!     → drain unread body → next request (keep-alive) | close
//! ```
//!
//! # Design Decisions
//! - A malformed head is answered with an empty error response and
//!   `Connection: close`; the handler never sees it
//! - A handler error before the response started becomes a 500; after it
//!   started, the connection is aborted
//! - Pipelined bytes that follow a request stay buffered for the next one
//! - A request body that stalls for the keep-alive duration ends the
//!   connection

use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::connection::{AbortReason, ConnectionContext, TimeoutControl, TimeoutKind};
use crate::http::context::{run_completed_hooks, HttpContext, RequestBody, Response};
use crate::http::error::{AppError, ParseError};
use crate::http::parser::{BodyDecoder, RequestParser};
use crate::http::request::{RequestHead, Version};
use crate::http::server::ServiceContext;
use crate::lifecycle::shutdown::drain_requested;
use crate::observability::metrics;

enum HeadOutcome {
    Request(RequestHead),
    Closed,
    Failed(ParseError),
}

/// Serves HTTP/1.x requests on one connection until it closes.
pub struct Http1Connection {
    conn: ConnectionContext,
    service: Arc<ServiceContext>,
    parser: Option<RequestParser>,
    buffer: BytesMut,
    timeouts: TimeoutControl,
    draining: watch::Receiver<bool>,
    requests: u32,
}

impl Http1Connection {
    pub fn new(conn: ConnectionContext, service: Arc<ServiceContext>, draining: watch::Receiver<bool>) -> Self {
        let parser = RequestParser::new(service.limits);
        let timeouts = service.timeouts.clone();
        Self {
            conn,
            service,
            parser: Some(parser),
            buffer: BytesMut::new(),
            timeouts,
            draining,
            requests: 0,
        }
    }

    /// Run until the peer leaves, an error ends the connection, or the
    /// worker drains. Returns the number of requests served.
    pub async fn run(mut self) -> u32 {
        loop {
            match self.read_head().await {
                HeadOutcome::Request(head) => {
                    if !self.serve(head).await {
                        break;
                    }
                }
                HeadOutcome::Closed => break,
                HeadOutcome::Failed(error) => {
                    self.reject(error).await;
                    break;
                }
            }
        }

        self.conn.output().complete();
        self.conn.input().complete();
        self.requests
    }

    async fn read_head(&mut self) -> HeadOutcome {
        let Some(mut parser) = self.parser.take() else {
            return HeadOutcome::Closed;
        };

        if self.buffer.is_empty() {
            self.timeouts.start_keep_alive();
        } else {
            self.timeouts.start_request_headers();
        }

        let outcome = loop {
            match parser.parse_head(&mut self.buffer) {
                Ok(Some(head)) => break HeadOutcome::Request(head),
                Ok(None) => {}
                Err(e) => break HeadOutcome::Failed(e),
            }

            let idle = self.buffer.is_empty() && !parser.head_in_progress();
            if !idle {
                self.timeouts.start_request_headers();
            }

            let read = tokio::select! {
                r = self.timeouts.run(self.conn.input().read()) => Some(r),
                _ = drain_requested(&mut self.draining), if idle => None,
            };
            let Some(read) = read else {
                break HeadOutcome::Closed;
            };

            match read {
                Err(TimeoutKind::KeepAlive) => {
                    tracing::debug!(connection_id = %self.conn.id(), "Keep-alive timeout");
                    break HeadOutcome::Closed;
                }
                Err(TimeoutKind::RequestHeaders) => break HeadOutcome::Failed(ParseError::RequestHeadersTimeout),
                Ok(Err(_)) => break HeadOutcome::Closed,
                Ok(Ok(result)) => {
                    if result.buffer.is_empty() && result.is_completed {
                        break if idle {
                            HeadOutcome::Closed
                        } else {
                            HeadOutcome::Failed(ParseError::UnexpectedEof)
                        };
                    }
                    self.buffer.extend_from_slice(&result.buffer);
                    self.conn.input().advance(result.buffer.len());
                }
            }
        };

        self.timeouts.cancel();
        self.parser = Some(parser);
        outcome
    }

    /// Answer a request that failed to parse, then close.
    async fn reject(&mut self, error: ParseError) {
        metrics::bad_request(error.reason());
        tracing::debug!(
            connection_id = %self.conn.id(),
            peer_addr = %self.conn.peer(),
            error = %error,
            "Rejecting malformed request"
        );

        let mut response = Response::new(
            self.conn.output().clone(),
            Arc::new(AtomicBool::new(false)),
            Version::Http11,
            false,
            false,
            Arc::clone(&self.service.response),
        );
        response.reset_for_error(error.status_code(), false);
        if let Err(e) = response.complete().await {
            tracing::debug!(connection_id = %self.conn.id(), error = %e, "Could not send error response");
        }
    }

    /// Run one exchange. Returns whether the connection stays open.
    async fn serve(&mut self, mut head: RequestHead) -> bool {
        let Some(parser) = self.parser.take() else {
            return false;
        };
        self.requests += 1;
        head.trace_identifier = self.conn.id().trace_identifier(self.requests);
        let started_at = Instant::now();

        if let (Some(max), BodyDecoder::Length { remaining }) = (self.service.max_body_size, parser.body()) {
            if *remaining > max {
                self.parser = Some(parser);
                self.reject(ParseError::BodyTooLarge).await;
                return false;
            }
        }

        self.conn.begin_exchange();
        let keep_alive = head.keep_alive() && !*self.draining.borrow();
        let response_started = Arc::new(AtomicBool::new(false));
        let body = RequestBody::new(
            parser,
            std::mem::take(&mut self.buffer),
            self.conn.input().clone(),
            self.conn.output().clone(),
            Arc::clone(&response_started),
            head.expects_continue(),
            self.service.max_body_size,
        )
        .with_idle_timeout(self.timeouts.keep_alive());
        let response = Response::new(
            self.conn.output().clone(),
            response_started,
            head.version,
            head.is_head(),
            keep_alive,
            Arc::clone(&self.service.response),
        );

        tracing::debug!(
            connection_id = %self.conn.id(),
            trace_id = %head.trace_identifier,
            method = %head.method,
            target = %head.target,
            "Request started"
        );

        let mut ctx = HttpContext::new(
            head,
            body,
            response,
            self.conn.lifetime().clone(),
            self.conn.id(),
            self.conn.peer().clone(),
        );
        let result: Result<(), AppError> = match AssertUnwindSafe(self.service.handler.call(&mut ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err("request handler panicked".into()),
        };
        let (request, mut body, mut response, hooks) = ctx.into_parts();

        let mut persist = match result {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    connection_id = %self.conn.id(),
                    trace_id = %request.trace_identifier,
                    error = %error,
                    "Request handler failed"
                );
                let failure = body.failure().cloned();
                let status = failure.as_ref().map(ParseError::status_code).unwrap_or(500);
                if response.reset_for_error(status, failure.is_none()) {
                    true
                } else {
                    self.conn.abort(AbortReason::Aborted);
                    false
                }
            }
        };

        if self.conn.lifetime().is_aborted() {
            persist = false;
        } else {
            let completed = match response.complete().await {
                Err(error) if !response.has_started() => {
                    tracing::error!(
                        trace_id = %request.trace_identifier,
                        error = %error,
                        "Response could not start"
                    );
                    response.reset_for_error(500, false);
                    response.complete().await
                }
                other => other,
            };
            match completed {
                Ok(keep) => persist &= keep,
                Err(error) => {
                    tracing::debug!(trace_id = %request.trace_identifier, error = %error, "Response did not complete");
                    persist = false;
                }
            }
        }

        self.conn.end_exchange();

        if persist && !body.drain().await {
            if body.failure() == Some(&ParseError::RequestBodyTimeout) {
                tracing::debug!(trace_id = %request.trace_identifier, "Request body stalled, closing");
            }
            persist = false;
        }

        run_completed_hooks(hooks, &request.trace_identifier).await;

        let status = response.status();
        metrics::request_completed(request.method.as_str(), status, started_at.elapsed());
        tracing::info!(
            connection_id = %self.conn.id(),
            trace_id = %request.trace_identifier,
            method = %request.method,
            target = %request.target,
            status,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Request finished"
        );

        let (mut parser, buffer) = body.into_parts();
        parser.reset();
        self.parser = Some(parser);
        self.buffer = buffer;

        persist && !self.conn.lifetime().is_aborted()
    }
}
