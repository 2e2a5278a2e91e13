//! HTTP error types.

use thiserror::Error;

use crate::connection::pipe::{AbortReason, PipeError};
use crate::http::headers::HeaderError;

/// Error raised by application code.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Malformed or unacceptable input on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("malformed status line")]
    InvalidStatusLine,
    #[error("invalid method token")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("malformed HTTP version")]
    InvalidVersion,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,
    #[error("request line too long")]
    RequestLineTooLong,
    #[error("line terminated by bare LF")]
    BareLineFeed,
    #[error("header line has no colon")]
    MissingColon,
    #[error("invalid header name")]
    InvalidHeaderName,
    #[error("obsolete line folding")]
    ObsoleteLineFolding,
    #[error(transparent)]
    InvalidHeader(HeaderError),
    #[error("header section too large")]
    HeadersTooLarge,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,
    #[error("final transfer coding is not chunked")]
    UnsupportedTransferCoding,
    #[error("malformed chunked encoding")]
    InvalidChunk,
    #[error("request body too large")]
    BodyTooLarge,
    #[error("request headers not received in time")]
    RequestHeadersTimeout,
    #[error("request body stalled")]
    RequestBodyTimeout,
    #[error("connection closed before the message was complete")]
    UnexpectedEof,
}

impl ParseError {
    /// Status code answered to the client for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::UnsupportedVersion => 505,
            ParseError::RequestLineTooLong => 414,
            ParseError::HeadersTooLarge | ParseError::TooManyHeaders => 431,
            ParseError::BodyTooLarge => 413,
            ParseError::RequestHeadersTimeout | ParseError::RequestBodyTimeout => 408,
            _ => 400,
        }
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::InvalidRequestLine => "request_line",
            ParseError::InvalidStatusLine => "status_line",
            ParseError::InvalidMethod => "method",
            ParseError::InvalidTarget => "target",
            ParseError::InvalidVersion | ParseError::UnsupportedVersion => "version",
            ParseError::RequestLineTooLong => "request_line_too_long",
            ParseError::BareLineFeed => "bare_lf",
            ParseError::MissingColon
            | ParseError::InvalidHeaderName
            | ParseError::ObsoleteLineFolding
            | ParseError::InvalidHeader(_) => "header",
            ParseError::HeadersTooLarge | ParseError::TooManyHeaders => "headers_too_large",
            ParseError::InvalidContentLength | ParseError::ConflictingFraming => "framing",
            ParseError::UnsupportedTransferCoding | ParseError::InvalidChunk => "transfer_coding",
            ParseError::BodyTooLarge => "body_too_large",
            ParseError::RequestHeadersTimeout | ParseError::RequestBodyTimeout => "timeout",
            ParseError::UnexpectedEof => "eof",
        }
    }
}

/// Errors surfaced to application code through the façade.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection aborted ({0})")]
    ConnectionAborted(AbortReason),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error(transparent)]
    Header(HeaderError),
    #[error("bad request: {0}")]
    BadRequest(#[from] ParseError),
    #[error("application error: {0}")]
    Application(AppError),
}

impl From<HeaderError> for HttpError {
    fn from(e: HeaderError) -> Self {
        match e {
            HeaderError::ReadOnly => HttpError::InvalidOperation("headers are read-only after the response started"),
            other => HttpError::Header(other),
        }
    }
}

impl From<PipeError> for HttpError {
    fn from(e: PipeError) -> Self {
        match e {
            PipeError::Aborted(reason) => HttpError::ConnectionAborted(reason),
            PipeError::ReaderCompleted | PipeError::WriterCompleted => {
                HttpError::ConnectionAborted(AbortReason::Aborted)
            }
        }
    }
}
