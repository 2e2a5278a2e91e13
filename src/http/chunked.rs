//! Chunked transfer coding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::error::ParseError;
use crate::http::headers::{latin1_to_string, HeaderMap};

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SizeLine,
    Data { remaining: u64 },
    DataCrlf,
    Trailers,
    Done,
}

/// Output of one decode step.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    /// Body bytes, possibly part of a chunk.
    Data(Bytes),
    /// More input is required.
    NeedMore,
    /// Last chunk and trailer section consumed.
    Done,
}

/// Incremental chunked body decoder.
///
/// Data is handed out as soon as it arrives rather than per whole chunk.
#[derive(Debug)]
pub struct ChunkedDecoder {
    phase: Phase,
    trailers: HeaderMap,
    trailer_bytes: usize,
    max_trailer_bytes: usize,
}

impl ChunkedDecoder {
    pub fn new(max_trailer_bytes: usize) -> Self {
        Self {
            phase: Phase::SizeLine,
            trailers: HeaderMap::new(),
            trailer_bytes: 0,
            max_trailer_bytes,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Whether the decoder is past the last chunk and reading trailers.
    pub fn in_trailers(&self) -> bool {
        self.phase == Phase::Trailers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<ChunkEvent, ParseError> {
        loop {
            match self.phase {
                Phase::SizeLine => {
                    let line = match split_line(src, MAX_CHUNK_LINE) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(ChunkEvent::NeedMore),
                        Err(LineError::TooLong) => return Err(ParseError::InvalidChunk),
                        Err(LineError::BareLineFeed) => return Err(ParseError::BareLineFeed),
                    };
                    let size = parse_chunk_size(&line)?;
                    self.phase = if size == 0 {
                        Phase::Trailers
                    } else {
                        Phase::Data { remaining: size }
                    };
                }
                Phase::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    let take = remaining.min(src.len() as u64) as usize;
                    let data = src.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.phase = if left == 0 {
                        Phase::DataCrlf
                    } else {
                        Phase::Data { remaining: left }
                    };
                    return Ok(ChunkEvent::Data(data));
                }
                Phase::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(ChunkEvent::NeedMore);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    let _ = src.split_to(2);
                    self.phase = Phase::SizeLine;
                }
                Phase::Trailers => {
                    let budget = self.max_trailer_bytes.saturating_sub(self.trailer_bytes);
                    let line = match split_line(src, budget) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(ChunkEvent::NeedMore),
                        Err(LineError::TooLong) => return Err(ParseError::HeadersTooLarge),
                        Err(LineError::BareLineFeed) => return Err(ParseError::BareLineFeed),
                    };
                    if line.is_empty() {
                        self.trailers.set_read_only();
                        self.phase = Phase::Done;
                        return Ok(ChunkEvent::Done);
                    }
                    self.trailer_bytes += line.len() + 2;
                    let (name, value) = parse_field_line(&line)?;
                    self.trailers
                        .append(name, value)
                        .map_err(ParseError::InvalidHeader)?;
                }
                Phase::Done => return Ok(ChunkEvent::Done),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineError {
    TooLong,
    BareLineFeed,
}

/// Split one CRLF-terminated line of at most `max_len` bytes off `src`.
pub(crate) fn split_line(src: &mut BytesMut, max_len: usize) -> Result<Option<BytesMut>, LineError> {
    let Some(lf) = src.iter().position(|&b| b == b'\n') else {
        if src.len() > max_len {
            return Err(LineError::TooLong);
        }
        return Ok(None);
    };
    if lf == 0 || src[lf - 1] != b'\r' {
        return Err(LineError::BareLineFeed);
    }
    if lf - 1 > max_len {
        return Err(LineError::TooLong);
    }
    let line = src.split_to(lf - 1);
    let _ = src.split_to(2);
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let size_part = match line.iter().position(|&b| b == b';') {
        Some(semi) => &line[..semi],
        None => line,
    };
    let size_part = trim_ows(size_part);
    if size_part.is_empty() || size_part.len() > 16 || !size_part.iter().all(u8::is_ascii_hexdigit) {
        return Err(ParseError::InvalidChunk);
    }
    let text = std::str::from_utf8(size_part).map_err(|_| ParseError::InvalidChunk)?;
    u64::from_str_radix(text, 16).map_err(|_| ParseError::InvalidChunk)
}

pub(crate) fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Parse `name: value` for header and trailer lines.
pub(crate) fn parse_field_line(line: &[u8]) -> Result<(String, String), ParseError> {
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(ParseError::ObsoleteLineFolding);
    }
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::MissingColon)?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| crate::http::headers::is_token_char(b)) {
        return Err(ParseError::InvalidHeaderName);
    }
    let value = trim_ows(&line[colon + 1..]);
    Ok((latin1_to_string(name), latin1_to_string(value)))
}

/// Frame one chunk. Empty input writes nothing, so it can never be
/// mistaken for the last chunk.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.reserve(data.len() + 20);
    dst.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// The last chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
