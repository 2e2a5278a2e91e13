//! Request/response façade handed to application code.
//!
//! # Responsibilities
//! - Stream the request body, sending `100 Continue` when asked to
//! - Hold the response head until the first write, then lock it
//! - Choose response framing (length, chunked, close-delimited)
//! - Run OnStarting and OnCompleted hooks in reverse registration order
//!
//! # Design Decisions
//! - The head is written lazily so hooks and handlers can keep editing it
//! - Content-Length is enforced: too many bytes fail the write, too few
//!   close the connection after the response
//! - Writes to HEAD responses are discarded, writes to 204/205/304 fail

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;

use crate::connection::pipe::{AbortReason, PipeReader, PipeWriter};
use crate::connection::{ConnectionId, Lifetime};
use crate::http::chunked::{encode_chunk, LAST_CHUNK};
use crate::http::error::{AppError, HttpError, ParseError};
use crate::http::headers::HeaderMap;
use crate::http::parser::{BodyEvent, RequestParser};
use crate::http::request::{RequestHead, Version};
use crate::http::response::{is_bodyless_status, DateCache, ResponseHead, CONTINUE_RESPONSE};
use crate::transport::endpoint::EndpointAddr;

/// Server-wide response settings.
#[derive(Debug)]
pub struct ResponseOptions {
    pub server_header: Option<String>,
    pub add_date_header: bool,
    pub date: DateCache,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            server_header: None,
            add_date_header: false,
            date: DateCache::new(),
        }
    }
}

/// Streaming request body.
pub struct RequestBody {
    parser: RequestParser,
    buffer: BytesMut,
    input: PipeReader,
    eof: bool,
    max_size: Option<u64>,
    received: u64,
    expect_continue: bool,
    output: PipeWriter,
    response_started: Arc<AtomicBool>,
    failure: Option<ParseError>,
    idle_timeout: Option<Duration>,
}

impl RequestBody {
    pub(crate) fn new(
        parser: RequestParser,
        buffer: BytesMut,
        input: PipeReader,
        output: PipeWriter,
        response_started: Arc<AtomicBool>,
        expect_continue: bool,
        max_size: Option<u64>,
    ) -> Self {
        Self {
            parser,
            buffer,
            input,
            eof: false,
            max_size,
            received: 0,
            expect_continue,
            output,
            response_started,
            failure: None,
            idle_timeout: None,
        }
    }

    /// Fail body reads that see no bytes from the peer for `timeout`.
    pub(crate) fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Next chunk of the body, `None` once it has been fully read.
    pub async fn read(&mut self) -> Result<Option<Bytes>, HttpError> {
        if let Some(failure) = &self.failure {
            return Err(HttpError::BadRequest(failure.clone()));
        }
        if self.expect_continue {
            self.expect_continue = false;
            if !self.response_started.load(Ordering::Acquire) && !self.is_complete() {
                self.output.write(Bytes::from_static(CONTINUE_RESPONSE)).await?;
            }
        }

        loop {
            match self.parser.parse_body(&mut self.buffer, self.eof) {
                Ok(BodyEvent::Data(data)) => {
                    self.received += data.len() as u64;
                    if self.max_size.is_some_and(|max| self.received > max) {
                        return Err(self.fail(ParseError::BodyTooLarge));
                    }
                    return Ok(Some(data));
                }
                Ok(BodyEvent::Done) => return Ok(None),
                Ok(BodyEvent::NeedMore) => self.fill().await?,
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Read the whole body, failing once it grows past `limit` bytes.
    pub async fn read_to_end(&mut self, limit: usize) -> Result<Bytes, HttpError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            if body.len() + chunk.len() > limit {
                return Err(self.fail(ParseError::BodyTooLarge));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    async fn fill(&mut self) -> Result<(), HttpError> {
        let read = match self.idle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.input.read()).await {
                Ok(read) => read,
                Err(_) => return Err(self.fail(ParseError::RequestBodyTimeout)),
            },
            None => self.input.read().await,
        };
        let result = read?;
        if result.buffer.is_empty() && result.is_completed {
            self.eof = true;
            return Ok(());
        }
        self.buffer.extend_from_slice(&result.buffer);
        self.input.advance(result.buffer.len());
        Ok(())
    }

    fn fail(&mut self, error: ParseError) -> HttpError {
        self.failure = Some(error.clone());
        HttpError::BadRequest(error)
    }

    /// Whether every body byte has been read.
    pub fn is_complete(&self) -> bool {
        self.parser.body().is_done()
    }

    /// Body bytes delivered so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Trailer fields of a chunked body, once it was fully read.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        if self.is_complete() {
            self.parser.trailers()
        } else {
            None
        }
    }

    /// The error that ended body reading, if any.
    pub fn failure(&self) -> Option<&ParseError> {
        self.failure.as_ref()
    }

    /// Discard the unread rest of the body so the connection can be reused.
    ///
    /// Returns `false` when the body cannot be drained: a read failed, or the
    /// client is still waiting for `100 Continue` and will not send it.
    pub(crate) async fn drain(&mut self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        if self.is_complete() {
            return true;
        }
        if self.expect_continue {
            return false;
        }
        loop {
            match self.read().await {
                Ok(Some(_)) => {}
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    pub(crate) fn into_parts(self) -> (RequestParser, BytesMut) {
        (self.parser, self.buffer)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("received", &self.received)
            .field("buffered", &self.buffer.len())
            .field("eof", &self.eof)
            .finish()
    }
}

type StartingHook = Box<dyn FnOnce(&mut ResponseHead) -> Result<(), AppError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// HEAD response: body writes are dropped.
    Discard,
    /// 1xx/204/205/304: body writes fail.
    Bodyless,
    Length { declared: u64, written: u64 },
    Chunked,
    CloseDelimited,
}

/// Response side of an exchange.
pub struct Response {
    head: ResponseHead,
    output: PipeWriter,
    started: Arc<AtomicBool>,
    on_starting: Vec<StartingHook>,
    framing: Option<Framing>,
    version: Version,
    head_request: bool,
    keep_alive: bool,
    finished: bool,
    body_bytes: u64,
    options: Arc<ResponseOptions>,
}

impl Response {
    pub(crate) fn new(
        output: PipeWriter,
        started: Arc<AtomicBool>,
        version: Version,
        head_request: bool,
        keep_alive: bool,
        options: Arc<ResponseOptions>,
    ) -> Self {
        Self {
            head: ResponseHead::default(),
            output,
            started,
            on_starting: Vec::new(),
            framing: None,
            version,
            head_request,
            keep_alive,
            finished: false,
            body_bytes: 0,
            options,
        }
    }

    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn set_status(&mut self, status: u16) -> Result<(), HttpError> {
        self.ensure_not_started()?;
        if !(100..=999).contains(&status) {
            return Err(HttpError::InvalidOperation("status code must have three digits"));
        }
        self.head.status = status;
        Ok(())
    }

    pub fn set_reason(&mut self, reason: impl Into<String>) -> Result<(), HttpError> {
        self.ensure_not_started()?;
        let reason = reason.into();
        if reason.chars().any(|c| c.is_control() || c as u32 > 0xFF) {
            return Err(HttpError::InvalidOperation("reason phrase contains invalid characters"));
        }
        self.head.reason = Some(reason);
        Ok(())
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Mutable headers. Mutations fail once the response has started.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Register a callback run just before the head is written.
    pub fn on_starting<F>(&mut self, hook: F) -> Result<(), HttpError>
    where
        F: FnOnce(&mut ResponseHead) -> Result<(), AppError> + Send + 'static,
    {
        self.ensure_not_started()?;
        self.on_starting.push(Box::new(hook));
        Ok(())
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the connection may serve another request after this one.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Body bytes accepted so far.
    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    fn ensure_not_started(&self) -> Result<(), HttpError> {
        if self.has_started() {
            return Err(HttpError::InvalidOperation("the response has already started"));
        }
        Ok(())
    }

    /// Write body bytes, sending the head first if needed.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<(), HttpError> {
        let data = data.into();
        self.start(false).await?;
        if self.finished {
            return Err(HttpError::InvalidOperation("the response has already completed"));
        }

        let len = data.len() as u64;
        match &mut self.framing {
            Some(Framing::Discard) | None => return Ok(()),
            Some(Framing::Bodyless) => {
                if len > 0 {
                    return Err(HttpError::InvalidOperation("responses with this status cannot have a body"));
                }
                return Ok(());
            }
            Some(Framing::Length { declared, written }) => {
                if *written + len > *declared {
                    self.keep_alive = false;
                    return Err(HttpError::InvalidOperation("response body exceeds the declared Content-Length"));
                }
                *written += len;
                self.output.write(data).await?;
            }
            Some(Framing::Chunked) => {
                if len > 0 {
                    let mut buf = BytesMut::with_capacity(data.len() + 16);
                    encode_chunk(&data, &mut buf);
                    self.output.write(buf.freeze()).await?;
                }
            }
            Some(Framing::CloseDelimited) => self.output.write(data).await?,
        }
        self.body_bytes += len;
        Ok(())
    }

    /// Send the head if it has not been sent yet.
    pub async fn flush(&mut self) -> Result<(), HttpError> {
        self.start(false).await
    }

    async fn start(&mut self, completing: bool) -> Result<(), HttpError> {
        if self.has_started() {
            return Ok(());
        }

        while let Some(hook) = self.on_starting.pop() {
            hook(&mut self.head).map_err(HttpError::Application)?;
        }

        let framing = self.select_framing(completing)?;
        self.add_connection_headers()?;

        let headers = &mut self.head.headers;
        if self.options.add_date_header && !headers.contains("date") {
            headers.append("Date", self.options.date.now())?;
        }
        if let Some(server) = &self.options.server_header {
            if !headers.contains("server") {
                headers.append("Server", server.clone())?;
            }
        }
        headers.set_read_only();

        let mut buf = BytesMut::with_capacity(256);
        self.head.write_to(&mut buf);
        self.framing = Some(framing);
        self.started.store(true, Ordering::Release);
        self.output.write(buf.freeze()).await?;
        Ok(())
    }

    fn select_framing(&mut self, completing: bool) -> Result<Framing, HttpError> {
        let status = self.head.status;
        let headers = &mut self.head.headers;

        if self.head_request {
            return Ok(Framing::Discard);
        }
        if is_bodyless_status(status) {
            if headers.contains("transfer-encoding") {
                return Err(HttpError::InvalidOperation("Transfer-Encoding is not allowed for this status"));
            }
            return Ok(Framing::Bodyless);
        }
        if headers.contains("transfer-encoding") {
            let chunked = headers
                .tokens("transfer-encoding")
                .last()
                .is_some_and(|t| t.eq_ignore_ascii_case("chunked"));
            if chunked {
                return Ok(Framing::Chunked);
            }
            self.keep_alive = false;
            return Ok(Framing::CloseDelimited);
        }

        match headers.content_length()? {
            Some(declared) => Ok(Framing::Length { declared, written: 0 }),
            None if completing => {
                headers.append("Content-Length", "0")?;
                Ok(Framing::Length { declared: 0, written: 0 })
            }
            None if self.version == Version::Http11 => {
                headers.append("Transfer-Encoding", "chunked")?;
                Ok(Framing::Chunked)
            }
            None => {
                self.keep_alive = false;
                Ok(Framing::CloseDelimited)
            }
        }
    }

    fn add_connection_headers(&mut self) -> Result<(), HttpError> {
        let headers = &mut self.head.headers;
        if headers.has_token("connection", "close") {
            self.keep_alive = false;
        }
        if !self.keep_alive {
            if !headers.has_token("connection", "close") {
                headers.insert("Connection", "close")?;
            }
        } else if self.version == Version::Http10 && !headers.has_token("connection", "keep-alive") {
            headers.insert("Connection", "keep-alive")?;
        }
        Ok(())
    }

    /// Finish the response after the application returned.
    ///
    /// Returns whether the connection may be kept alive.
    pub(crate) async fn complete(&mut self) -> Result<bool, HttpError> {
        if self.finished {
            return Ok(self.keep_alive);
        }
        self.start(true).await?;
        self.finished = true;

        match self.framing {
            Some(Framing::Chunked) => {
                self.output.write(Bytes::from_static(LAST_CHUNK)).await?;
            }
            Some(Framing::Length { declared, written }) if written < declared => {
                tracing::warn!(declared, written, "Response shorter than its Content-Length");
                self.keep_alive = false;
            }
            Some(Framing::CloseDelimited) => self.keep_alive = false,
            _ => {}
        }
        Ok(self.keep_alive)
    }

    /// Replace an unstarted response with an empty error response.
    ///
    /// Returns `false` if the head was already sent.
    pub(crate) fn reset_for_error(&mut self, status: u16, keep_alive: bool) -> bool {
        if self.has_started() {
            return false;
        }
        self.head = ResponseHead::new(status);
        self.on_starting.clear();
        self.keep_alive = self.keep_alive && keep_alive;
        true
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("head", &self.head)
            .field("framing", &self.framing)
            .field("keep_alive", &self.keep_alive)
            .field("finished", &self.finished)
            .finish()
    }
}

pub(crate) type CompletedHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), AppError>> + Send>;

/// One request/response exchange.
pub struct HttpContext {
    request: RequestHead,
    body: RequestBody,
    response: Response,
    on_completed: Vec<CompletedHook>,
    lifetime: Lifetime,
    connection_id: ConnectionId,
    peer: EndpointAddr,
}

impl HttpContext {
    pub(crate) fn new(
        request: RequestHead,
        body: RequestBody,
        response: Response,
        lifetime: Lifetime,
        connection_id: ConnectionId,
        peer: EndpointAddr,
    ) -> Self {
        Self {
            request,
            body,
            response,
            on_completed: Vec::new(),
            lifetime,
            connection_id,
            peer,
        }
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn request_body(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Borrow the request head, body and response at once.
    pub fn split_mut(&mut self) -> (&RequestHead, &mut RequestBody, &mut Response) {
        (&self.request, &mut self.body, &mut self.response)
    }

    pub fn trace_identifier(&self) -> &str {
        &self.request.trace_identifier
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn peer_addr(&self) -> &EndpointAddr {
        &self.peer
    }

    /// Register a callback run after the response finished or the
    /// connection was aborted.
    pub fn on_completed<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.on_completed.push(Box::new(move || Box::pin(hook())));
    }

    /// Token cancelled when the connection is aborted.
    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Abort the underlying connection.
    pub fn abort(&self) {
        self.lifetime.abort(AbortReason::Aborted);
    }

    pub(crate) fn into_parts(self) -> (RequestHead, RequestBody, Response, Vec<CompletedHook>) {
        (self.request, self.body, self.response, self.on_completed)
    }
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("trace_identifier", &self.request.trace_identifier)
            .field("method", &self.request.method)
            .field("target", &self.request.target)
            .finish()
    }
}

/// Run completion hooks newest first; a failing hook does not stop the rest.
pub(crate) async fn run_completed_hooks(mut hooks: Vec<CompletedHook>, trace_identifier: &str) {
    while let Some(hook) = hooks.pop() {
        if let Err(e) = hook().await {
            tracing::error!(trace_id = %trace_identifier, error = %e, "OnCompleted callback failed");
        }
    }
}
