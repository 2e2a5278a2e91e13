//! Incremental HTTP/1.x message parsing.
//!
//! # Data Flow
//! ```text
//! input bytes (BytesMut, appended as they arrive)
//!     → StartLine  (method, target, version | status line)
//!     → Headers    (one CRLF line at a time, limits enforced)
//!     → Body       (BodyDecoder chosen from the framing headers)
//!     → Trailers   (chunked only)
//!     → Complete
//! any failure → Error (terminal until reset)
//! ```
//!
//! Every step consumes whole lines only, so a partial line is left in the
//! buffer for the next call.

use bytes::{Bytes, BytesMut};
use http::Method;

use crate::config::LimitsConfig;
use crate::http::chunked::{parse_field_line, split_line, ChunkEvent, ChunkedDecoder, LineError};
use crate::http::error::ParseError;
use crate::http::headers::{is_token_char, HeaderMap};
use crate::http::request::{RequestHead, TargetForm, Version};

/// Size limits applied while parsing a message head.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_request_line: usize,
    pub max_header_bytes: usize,
    pub max_header_count: usize,
}

impl ParserLimits {
    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self {
            max_request_line: limits.max_request_line_bytes,
            max_header_bytes: limits.max_header_bytes,
            max_header_count: limits.max_header_count,
        }
    }
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self::from_config(&LimitsConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    StartLine,
    Headers,
    Body,
    Trailers,
    Complete,
    Error,
}

/// Output of one body decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyEvent {
    Data(Bytes),
    NeedMore,
    Done,
}

/// Message body framing.
#[derive(Debug)]
pub enum BodyDecoder {
    Empty,
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
    /// Response bodies delimited by connection close.
    UntilClose { done: bool },
}

fn final_coding_is_chunked(headers: &HeaderMap) -> bool {
    headers
        .tokens("transfer-encoding")
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

impl BodyDecoder {
    /// Framing of a request body.
    pub fn for_request(headers: &HeaderMap, max_trailer_bytes: usize) -> Result<Self, ParseError> {
        let length = headers
            .content_length()
            .map_err(|_| ParseError::InvalidContentLength)?;

        if headers.contains("transfer-encoding") {
            if length.is_some() {
                return Err(ParseError::ConflictingFraming);
            }
            if !final_coding_is_chunked(headers) {
                return Err(ParseError::UnsupportedTransferCoding);
            }
            return Ok(BodyDecoder::Chunked(ChunkedDecoder::new(max_trailer_bytes)));
        }

        Ok(match length {
            None | Some(0) => BodyDecoder::Empty,
            Some(n) => BodyDecoder::Length { remaining: n },
        })
    }

    /// Framing of a response body to a request made with `method`.
    pub fn for_response(
        method: &Method,
        status: u16,
        headers: &HeaderMap,
        max_trailer_bytes: usize,
    ) -> Result<Self, ParseError> {
        if *method == Method::HEAD || (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(BodyDecoder::Empty);
        }
        if headers.contains("transfer-encoding") {
            if final_coding_is_chunked(headers) {
                return Ok(BodyDecoder::Chunked(ChunkedDecoder::new(max_trailer_bytes)));
            }
            return Ok(BodyDecoder::UntilClose { done: false });
        }
        match headers
            .content_length()
            .map_err(|_| ParseError::InvalidContentLength)?
        {
            Some(0) => Ok(BodyDecoder::Empty),
            Some(n) => Ok(BodyDecoder::Length { remaining: n }),
            None => Ok(BodyDecoder::UntilClose { done: false }),
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            BodyDecoder::Empty => true,
            BodyDecoder::Length { remaining } => *remaining == 0,
            BodyDecoder::Chunked(chunked) => chunked.is_done(),
            BodyDecoder::UntilClose { done } => *done,
        }
    }

    /// Decode the next piece of body from `src`. `eof` reports that no more
    /// input will arrive.
    pub fn decode(&mut self, src: &mut BytesMut, eof: bool) -> Result<BodyEvent, ParseError> {
        match self {
            BodyDecoder::Empty => Ok(BodyEvent::Done),
            BodyDecoder::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(BodyEvent::Done);
                }
                if src.is_empty() {
                    return if eof { Err(ParseError::UnexpectedEof) } else { Ok(BodyEvent::NeedMore) };
                }
                let take = (*remaining).min(src.len() as u64) as usize;
                *remaining -= take as u64;
                Ok(BodyEvent::Data(src.split_to(take).freeze()))
            }
            BodyDecoder::Chunked(chunked) => match chunked.decode(src)? {
                ChunkEvent::Data(data) => Ok(BodyEvent::Data(data)),
                ChunkEvent::Done => Ok(BodyEvent::Done),
                ChunkEvent::NeedMore if eof => Err(ParseError::UnexpectedEof),
                ChunkEvent::NeedMore => Ok(BodyEvent::NeedMore),
            },
            BodyDecoder::UntilClose { done } => {
                if !src.is_empty() {
                    return Ok(BodyEvent::Data(src.split().freeze()));
                }
                if eof {
                    *done = true;
                    return Ok(BodyEvent::Done);
                }
                Ok(BodyEvent::NeedMore)
            }
        }
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        match self {
            BodyDecoder::Chunked(chunked) => Some(chunked.trailers()),
            _ => None,
        }
    }

    fn in_trailers(&self) -> bool {
        matches!(self, BodyDecoder::Chunked(chunked) if chunked.in_trailers())
    }
}

/// Header section accumulated line by line.
#[derive(Debug, Default)]
struct HeaderSection {
    headers: HeaderMap,
    bytes: usize,
}

impl HeaderSection {
    /// Consume header lines. Returns `true` once the blank line was seen.
    fn parse(&mut self, src: &mut BytesMut, limits: &ParserLimits) -> Result<bool, ParseError> {
        loop {
            let budget = limits.max_header_bytes.saturating_sub(self.bytes);
            let line = match split_line(src, budget) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(false),
                Err(LineError::TooLong) => return Err(ParseError::HeadersTooLarge),
                Err(LineError::BareLineFeed) => return Err(ParseError::BareLineFeed),
            };
            if line.is_empty() {
                return Ok(true);
            }
            self.bytes += line.len() + 2;
            if self.headers.len() >= limits.max_header_count {
                return Err(ParseError::TooManyHeaders);
            }
            let (name, value) = parse_field_line(&line)?;
            self.headers
                .append(name, value)
                .map_err(ParseError::InvalidHeader)?;
        }
    }

    fn take(&mut self) -> HeaderMap {
        self.bytes = 0;
        std::mem::take(&mut self.headers)
    }
}

fn parse_version(raw: &[u8]) -> Result<Version, ParseError> {
    match raw {
        b"HTTP/1.1" => Ok(Version::Http11),
        b"HTTP/1.0" => Ok(Version::Http10),
        [b'H', b'T', b'T', b'P', b'/', major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Err(ParseError::UnsupportedVersion)
        }
        _ => Err(ParseError::InvalidVersion),
    }
}

fn is_authority(raw: &str) -> bool {
    let Some((host, port)) = raw.rsplit_once(':') else {
        return false;
    };
    !host.is_empty()
        && !host.contains(['/', '?', '#', '@'])
        && !port.is_empty()
        && port.len() <= 5
        && port.bytes().all(|b| b.is_ascii_digit())
}

/// Classify and split a request target.
fn parse_target(method: &Method, raw: &str) -> Result<(TargetForm, String, Option<String>), ParseError> {
    if raw.is_empty() || !raw.bytes().all(|b| (0x21..=0x7E).contains(&b)) {
        return Err(ParseError::InvalidTarget);
    }

    if *method == Method::CONNECT {
        return if is_authority(raw) {
            Ok((TargetForm::Authority, String::new(), None))
        } else {
            Err(ParseError::InvalidTarget)
        };
    }

    if raw == "*" {
        return if *method == Method::OPTIONS {
            Ok((TargetForm::Asterisk, String::new(), None))
        } else {
            Err(ParseError::InvalidTarget)
        };
    }

    if raw.starts_with('/') {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (raw, None),
        };
        return Ok((TargetForm::Origin, path.to_string(), query));
    }

    if raw.contains("://") {
        let url = url::Url::parse(raw).map_err(|_| ParseError::InvalidTarget)?;
        if !url.has_host() {
            return Err(ParseError::InvalidTarget);
        }
        return Ok((TargetForm::Absolute, url.path().to_string(), url.query().map(str::to_string)));
    }

    Err(ParseError::InvalidTarget)
}

#[derive(Debug)]
struct StartLine {
    method: Method,
    target: String,
    form: TargetForm,
    path: String,
    query: Option<String>,
    version: Version,
}

fn parse_request_line(line: &[u8]) -> Result<StartLine, ParseError> {
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine);
    };
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(ParseError::InvalidRequestLine);
    }
    if !method.iter().all(|&b| is_token_char(b)) {
        return Err(ParseError::InvalidMethod);
    }
    let method = Method::from_bytes(method).map_err(|_| ParseError::InvalidMethod)?;
    let version = parse_version(version)?;
    let target = std::str::from_utf8(target).map_err(|_| ParseError::InvalidTarget)?;
    let (form, path, query) = parse_target(&method, target)?;

    Ok(StartLine {
        method,
        target: target.to_string(),
        form,
        path,
        query,
        version,
    })
}

/// Parser for requests received on a server connection.
#[derive(Debug)]
pub struct RequestParser {
    limits: ParserLimits,
    max_trailer_bytes: usize,
    state: ParserState,
    start: Option<StartLine>,
    section: HeaderSection,
    body: BodyDecoder,
}

impl RequestParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits,
            max_trailer_bytes: limits.max_header_bytes,
            state: ParserState::StartLine,
            start: None,
            section: HeaderSection::default(),
            body: BodyDecoder::Empty,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Whether part of a request head has been consumed.
    pub fn head_in_progress(&self) -> bool {
        self.state == ParserState::Headers
    }

    /// Prepare for the next request on the connection.
    pub fn reset(&mut self) {
        self.state = ParserState::StartLine;
        self.start = None;
        self.section = HeaderSection::default();
        self.body = BodyDecoder::Empty;
    }

    /// Consume as much of the request head as `src` holds.
    ///
    /// Returns the head once the blank line after the headers was read; the
    /// body framing is validated at the same time.
    pub fn parse_head(&mut self, src: &mut BytesMut) -> Result<Option<RequestHead>, ParseError> {
        match self.parse_head_inner(src) {
            Err(e) => {
                self.state = ParserState::Error;
                Err(e)
            }
            ok => ok,
        }
    }

    fn parse_head_inner(&mut self, src: &mut BytesMut) -> Result<Option<RequestHead>, ParseError> {
        if self.state == ParserState::StartLine {
            // Empty lines before the request line are ignored.
            while src.starts_with(b"\r\n") {
                let _ = src.split_to(2);
            }
            let line = match split_line(src, self.limits.max_request_line) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LineError::TooLong) => return Err(ParseError::RequestLineTooLong),
                Err(LineError::BareLineFeed) => return Err(ParseError::BareLineFeed),
            };
            self.start = Some(parse_request_line(&line)?);
            self.state = ParserState::Headers;
        }

        if self.state != ParserState::Headers {
            return Ok(None);
        }
        if !self.section.parse(src, &self.limits)? {
            return Ok(None);
        }

        let headers = self.section.take();
        let start = self.start.take().ok_or(ParseError::InvalidRequestLine)?;
        self.body = BodyDecoder::for_request(&headers, self.max_trailer_bytes)?;
        self.state = if self.body.is_done() {
            ParserState::Complete
        } else {
            ParserState::Body
        };

        let mut headers = headers;
        headers.set_read_only();
        Ok(Some(RequestHead {
            method: start.method,
            target: start.target,
            form: start.form,
            path: start.path,
            query: start.query,
            version: start.version,
            headers,
            trace_identifier: String::new(),
        }))
    }

    /// Framing of the current request body.
    pub fn body(&self) -> &BodyDecoder {
        &self.body
    }

    /// Decode the next piece of the current request body.
    pub fn parse_body(&mut self, src: &mut BytesMut, eof: bool) -> Result<BodyEvent, ParseError> {
        match self.state {
            ParserState::Body | ParserState::Trailers => {}
            ParserState::Complete => return Ok(BodyEvent::Done),
            _ => return Err(ParseError::InvalidRequestLine),
        }
        match self.body.decode(src, eof) {
            Ok(event) => {
                if event == BodyEvent::Done {
                    self.state = ParserState::Complete;
                } else if self.body.in_trailers() {
                    self.state = ParserState::Trailers;
                }
                Ok(event)
            }
            Err(e) => {
                self.state = ParserState::Error;
                Err(e)
            }
        }
    }

    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.body.trailers()
    }
}

/// A parsed response head.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Parser for responses read by a client connection.
#[derive(Debug)]
pub struct ResponseParser {
    limits: ParserLimits,
    state: ParserState,
    start: Option<(Version, u16, String)>,
    section: HeaderSection,
    body: BodyDecoder,
}

impl ResponseParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits,
            state: ParserState::StartLine,
            start: None,
            section: HeaderSection::default(),
            body: BodyDecoder::Empty,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Parse the response head for a request made with `method`.
    pub fn parse_head(&mut self, src: &mut BytesMut, method: &Method) -> Result<Option<ParsedResponse>, ParseError> {
        let result = self.parse_head_inner(src, method);
        if result.is_err() {
            self.state = ParserState::Error;
        }
        result
    }

    fn parse_head_inner(&mut self, src: &mut BytesMut, method: &Method) -> Result<Option<ParsedResponse>, ParseError> {
        if self.state == ParserState::StartLine {
            let line = match split_line(src, self.limits.max_request_line) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LineError::TooLong) => return Err(ParseError::InvalidStatusLine),
                Err(LineError::BareLineFeed) => return Err(ParseError::BareLineFeed),
            };
            self.start = Some(parse_status_line(&line)?);
            self.state = ParserState::Headers;
        }

        if self.state != ParserState::Headers || !self.section.parse(src, &self.limits)? {
            return Ok(None);
        }

        let (version, status, reason) = self.start.take().ok_or(ParseError::InvalidStatusLine)?;
        let mut headers = self.section.take();
        self.body = BodyDecoder::for_response(method, status, &headers, self.limits.max_header_bytes)?;
        self.state = if self.body.is_done() {
            ParserState::Complete
        } else {
            ParserState::Body
        };
        headers.set_read_only();
        Ok(Some(ParsedResponse {
            version,
            status,
            reason,
            headers,
        }))
    }

    pub fn parse_body(&mut self, src: &mut BytesMut, eof: bool) -> Result<BodyEvent, ParseError> {
        if self.state == ParserState::Complete {
            return Ok(BodyEvent::Done);
        }
        let event = self.body.decode(src, eof).inspect_err(|_| self.state = ParserState::Error)?;
        if event == BodyEvent::Done {
            self.state = ParserState::Complete;
        }
        Ok(event)
    }

    pub fn reset(&mut self) {
        self.state = ParserState::StartLine;
        self.start = None;
        self.section = HeaderSection::default();
        self.body = BodyDecoder::Empty;
    }
}

fn parse_status_line(line: &[u8]) -> Result<(Version, u16, String), ParseError> {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let version = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    let code = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    let reason = parts.next().unwrap_or(&[]);

    let version = parse_version(version)?;
    if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidStatusLine);
    }
    let status = code.iter().fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));
    if status < 100 {
        return Err(ParseError::InvalidStatusLine);
    }
    Ok((version, status, crate::http::headers::latin1_to_string(reason)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(wire: &[u8]) -> Result<Option<RequestHead>, ParseError> {
        let mut parser = RequestParser::new(ParserLimits::default());
        let mut src = BytesMut::from(wire);
        parser.parse_head(&mut src)
    }

    fn body_of(parser: &mut RequestParser, src: &mut BytesMut) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match parser.parse_body(src, false).unwrap() {
                BodyEvent::Data(data) => body.extend_from_slice(&data),
                BodyEvent::Done => return body,
                BodyEvent::NeedMore => panic!("body incomplete"),
            }
        }
    }

    #[test]
    fn parses_simple_get() {
        let head = parse(b"GET /hello?x=1 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/hello?x=1");
        assert_eq!(head.path, "/hello");
        assert_eq!(head.query.as_deref(), Some("x=1"));
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.headers.get("host"), Some("x"));
        assert!(head.headers.is_read_only());
    }

    #[test]
    fn incremental_head_byte_by_byte() {
        let wire = b"POST /upload HTTP/1.0\r\nContent-Length: 3\r\nX-A:  spaced value \t\r\n\r\nabc";
        let mut parser = RequestParser::new(ParserLimits::default());
        let mut src = BytesMut::new();
        let mut head = None;
        for &b in wire.iter() {
            src.extend_from_slice(&[b]);
            if let Some(h) = parser.parse_head(&mut src).unwrap() {
                head = Some(h);
                break;
            }
        }
        let head = head.unwrap();
        assert_eq!(head.headers.get("x-a"), Some("spaced value"));
        assert_eq!(parser.state(), ParserState::Body);

        let mut rest = BytesMut::from(&b"abc"[..]);
        assert_eq!(body_of(&mut parser, &mut rest), b"abc");
        assert_eq!(parser.state(), ParserState::Complete);
    }

    #[test]
    fn chunked_request_body() {
        let mut parser = RequestParser::new(ParserLimits::default());
        let mut src = BytesMut::from(&b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"[..]);
        parser.parse_head(&mut src).unwrap().unwrap();
        assert_eq!(body_of(&mut parser, &mut src), b"hello");
        assert!(src.is_empty());
    }

    #[test]
    fn start_line_errors() {
        assert_eq!(parse(b"GET  / HTTP/1.1\r\n").unwrap_err(), ParseError::InvalidRequestLine);
        assert_eq!(parse(b"GET / HTTP/1.1 extra\r\n").unwrap_err(), ParseError::InvalidRequestLine);
        assert_eq!(parse(b"G(T / HTTP/1.1\r\n").unwrap_err(), ParseError::InvalidMethod);
        assert_eq!(parse(b"GET / HTTP/2.0\r\n").unwrap_err(), ParseError::UnsupportedVersion);
        assert_eq!(parse(b"GET / HTPT/1.1\r\n").unwrap_err(), ParseError::InvalidVersion);
        assert_eq!(parse(b"GET nope HTTP/1.1\r\n").unwrap_err(), ParseError::InvalidTarget);
        assert_eq!(parse(b"GET * HTTP/1.1\r\n").unwrap_err(), ParseError::InvalidTarget);
        assert_eq!(parse(b"CONNECT /x HTTP/1.1\r\n").unwrap_err(), ParseError::InvalidTarget);
        assert_eq!(parse(b"GET / HTTP/1.1\n").unwrap_err(), ParseError::BareLineFeed);
    }

    #[test]
    fn target_forms() {
        let head = parse(b"OPTIONS * HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.form, TargetForm::Asterisk);

        let head = parse(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.form, TargetForm::Authority);

        let head = parse(b"GET http://example.com/a/b?c HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.form, TargetForm::Absolute);
        assert_eq!(head.path, "/a/b");
        assert_eq!(head.query.as_deref(), Some("c"));
    }

    #[test]
    fn header_errors() {
        assert_eq!(
            parse(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").unwrap_err(),
            ParseError::MissingColon
        );
        assert_eq!(
            parse(b"GET / HTTP/1.1\r\nName : v\r\n\r\n").unwrap_err(),
            ParseError::InvalidHeaderName
        );
        assert_eq!(
            parse(b"GET / HTTP/1.1\r\nA: b\r\n  folded\r\n\r\n").unwrap_err(),
            ParseError::ObsoleteLineFolding
        );
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nA: b\x01c\r\n\r\n").unwrap_err(),
            ParseError::InvalidHeader(_)
        ));
    }

    #[test]
    fn framing_errors() {
        assert_eq!(
            parse(b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n").unwrap_err(),
            ParseError::InvalidContentLength
        );
        assert_eq!(
            parse(b"POST / HTTP/1.1\r\nContent-Length: -1\r\n\r\n").unwrap_err(),
            ParseError::InvalidContentLength
        );
        assert_eq!(
            parse(b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap_err(),
            ParseError::ConflictingFraming
        );
        assert_eq!(
            parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked, gzip\r\n\r\n").unwrap_err(),
            ParseError::UnsupportedTransferCoding
        );
    }

    #[test]
    fn limits_enforced() {
        let limits = ParserLimits {
            max_request_line: 16,
            max_header_bytes: 32,
            max_header_count: 2,
        };

        let mut parser = RequestParser::new(limits);
        let mut src = BytesMut::from(&b"GET /a-very-long-path HTTP/1.1"[..]);
        assert_eq!(parser.parse_head(&mut src).unwrap_err(), ParseError::RequestLineTooLong);
        assert_eq!(parser.state(), ParserState::Error);

        let mut parser = RequestParser::new(limits);
        let mut src = BytesMut::from(&b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n"[..]);
        assert_eq!(parser.parse_head(&mut src).unwrap_err(), ParseError::TooManyHeaders);

        let mut parser = RequestParser::new(limits);
        let mut src = BytesMut::from(&b"GET / HTTP/1.1\r\nX-Big: 0123456789012345678901234567890123\r\n\r\n"[..]);
        assert_eq!(parser.parse_head(&mut src).unwrap_err(), ParseError::HeadersTooLarge);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut parser = RequestParser::new(ParserLimits::default());
        let mut src = BytesMut::from(&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc"[..]);
        parser.parse_head(&mut src).unwrap().unwrap();
        assert_eq!(
            parser.parse_body(&mut src, false).unwrap(),
            BodyEvent::Data(Bytes::from_static(b"abc"))
        );
        assert_eq!(parser.parse_body(&mut src, true).unwrap_err(), ParseError::UnexpectedEof);
    }

    #[test]
    fn pipelined_requests_share_the_buffer() {
        let mut parser = RequestParser::new(ParserLimits::default());
        let mut src = BytesMut::from(&b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n"[..]);
        let first = parser.parse_head(&mut src).unwrap().unwrap();
        assert_eq!(parser.state(), ParserState::Complete);
        parser.reset();
        let second = parser.parse_head(&mut src).unwrap().unwrap();
        assert_eq!((first.path.as_str(), second.path.as_str()), ("/a", "/b"));
    }

    #[test]
    fn response_parsing() {
        let mut parser = ResponseParser::new(ParserLimits::default());
        let mut src = BytesMut::from(&b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\nno"[..]);
        let head = parser.parse_head(&mut src, &Method::GET).unwrap().unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(
            parser.parse_body(&mut src, false).unwrap(),
            BodyEvent::Data(Bytes::from_static(b"no"))
        );
        assert_eq!(parser.parse_body(&mut src, false).unwrap(), BodyEvent::Done);

        let mut parser = ResponseParser::new(ParserLimits::default());
        let mut src = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\nuntil close"[..]);
        parser.parse_head(&mut src, &Method::GET).unwrap().unwrap();
        assert_eq!(
            parser.parse_body(&mut src, false).unwrap(),
            BodyEvent::Data(Bytes::from_static(b"until close"))
        );
        assert_eq!(parser.parse_body(&mut src, true).unwrap(), BodyEvent::Done);
    }
}
