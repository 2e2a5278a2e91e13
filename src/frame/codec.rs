//! Frame headers, the buffering frame reader, and control frame payloads.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::varint;

/// Defined frame types. Every value fits in a single varint byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    CancelPush = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    GoAway = 0x7,
    MaxPushId = 0xD,
    DuplicatePush = 0xE,
}

impl FrameType {
    pub fn from_u64(value: u64) -> Option<Self> {
        Some(match value {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x3 => FrameType::CancelPush,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x7 => FrameType::GoAway,
            0xD => FrameType::MaxPushId,
            0xE => FrameType::DuplicatePush,
            _ => return None,
        })
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

/// HTTP/2 frame types that must not appear on this transport.
fn is_reserved_h2_type(value: u64) -> bool {
    matches!(value, 0x2 | 0x6 | 0x8 | 0x9)
}

/// Error codes signaled when a stream or connection closes abruptly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ErrorCode {
    NoError = 0x100,
    GeneralProtocolError = 0x101,
    InternalError = 0x102,
    StreamCreationError = 0x103,
    ClosedCriticalStream = 0x104,
    FrameUnexpected = 0x105,
    FrameError = 0x106,
    ExcessiveLoad = 0x107,
    IdError = 0x108,
    SettingsError = 0x109,
    MissingSettings = 0x10A,
    RequestRejected = 0x10B,
    RequestCancelled = 0x10C,
    RequestIncomplete = 0x10D,
    EarlyResponse = 0x10E,
    ConnectError = 0x10F,
    VersionFallback = 0x110,
}

impl ErrorCode {
    const ALL: [ErrorCode; 17] = [
        ErrorCode::NoError,
        ErrorCode::GeneralProtocolError,
        ErrorCode::InternalError,
        ErrorCode::StreamCreationError,
        ErrorCode::ClosedCriticalStream,
        ErrorCode::FrameUnexpected,
        ErrorCode::FrameError,
        ErrorCode::ExcessiveLoad,
        ErrorCode::IdError,
        ErrorCode::SettingsError,
        ErrorCode::MissingSettings,
        ErrorCode::RequestRejected,
        ErrorCode::RequestCancelled,
        ErrorCode::RequestIncomplete,
        ErrorCode::EarlyResponse,
        ErrorCode::ConnectError,
        ErrorCode::VersionFallback,
    ];

    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_u64() == value)
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:x})", self, self.as_u64())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame payload of {length} bytes exceeds the {limit} byte limit")]
    TooLarge { length: u64, limit: u64 },
    #[error("frame type 0x{0:x} is not allowed")]
    Unexpected(u64),
    #[error("malformed {0} frame")]
    Malformed(&'static str),
    #[error("duplicate setting 0x{0:x}")]
    DuplicateSetting(u64),
    #[error("value {0} cannot be encoded as a varint")]
    VarintOverflow(u64),
}

impl FrameError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FrameError::TooLarge { .. } => ErrorCode::ExcessiveLoad,
            FrameError::Unexpected(_) => ErrorCode::FrameUnexpected,
            FrameError::Malformed(_) => ErrorCode::FrameError,
            FrameError::DuplicateSetting(_) => ErrorCode::SettingsError,
            FrameError::VarintOverflow(_) => ErrorCode::InternalError,
        }
    }
}

/// Type and payload length of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type; unknown types are kept so they can be skipped.
    pub frame_type: u64,
    pub length: u64,
}

impl FrameHeader {
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u64(self.frame_type)
    }
}

/// Read a frame header from the front of `buf`.
///
/// `Ok(None)` until the whole type and length prefix is present; nothing is
/// consumed in that case. On success returns the header and the prefix size.
pub fn try_read_frame_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>, FrameError> {
    let Some((frame_type, type_len)) = varint::try_decode(buf) else {
        return Ok(None);
    };
    let Some((length, length_len)) = varint::try_decode(&buf[type_len..]) else {
        return Ok(None);
    };
    if is_reserved_h2_type(frame_type) {
        return Err(FrameError::Unexpected(frame_type));
    }
    Ok(Some((FrameHeader { frame_type, length }, type_len + length_len)))
}

/// Write a frame header to the front of `buf`.
///
/// `None` if `buf` is too small or `length` is not encodable; `buf` is left
/// unmodified.
pub fn try_write_frame_header(frame_type: FrameType, length: u64, buf: &mut [u8]) -> Option<usize> {
    let needed = 1 + varint::encoded_len(length);
    if length > varint::MAX || buf.len() < needed {
        return None;
    }
    buf[0] = frame_type as u8;
    varint::try_encode(length, &mut buf[1..needed])?;
    Some(needed)
}

/// Append a complete frame to `dst`.
pub fn encode_frame(frame_type: FrameType, payload: &[u8], dst: &mut BytesMut) {
    let mut header = [0u8; 9];
    // A slice length always fits in 62 bits.
    if let Some(n) = try_write_frame_header(frame_type, payload.len() as u64, &mut header) {
        dst.reserve(n + payload.len());
        dst.put_slice(&header[..n]);
        dst.put_slice(payload);
    }
}

/// One complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn kind(&self) -> Option<FrameType> {
        self.header.kind()
    }
}

/// Terminal error of one framed stream. The connection carrying the stream
/// is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream aborted with {code}: {error}")]
pub struct StreamAbort {
    pub code: ErrorCode,
    pub error: FrameError,
}

impl From<FrameError> for StreamAbort {
    fn from(error: FrameError) -> Self {
        Self {
            code: error.code(),
            error,
        }
    }
}

/// Reassembles frames from arbitrary byte chunks.
///
/// Partial frames are buffered only up to `max_frame_size` payload bytes; a
/// header announcing more aborts the stream before anything is buffered.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_size: u64,
    pending: Option<(FrameHeader, usize)>,
    aborted: Option<StreamAbort>,
}

impl FrameReader {
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            pending: None,
            aborted: None,
        }
    }

    pub fn max_frame_size(&self) -> u64 {
        self.max_frame_size
    }

    /// Bytes received but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Append received bytes. Ignored once the stream was aborted.
    pub fn extend(&mut self, data: &[u8]) {
        if self.aborted.is_none() {
            self.buffer.extend_from_slice(data);
        }
    }

    fn abort(&mut self, error: FrameError) -> StreamAbort {
        let abort = StreamAbort::from(error);
        tracing::debug!(code = %abort.code, error = %abort.error, "Framed stream aborted");
        self.buffer.clear();
        self.pending = None;
        self.aborted = Some(abort.clone());
        abort
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StreamAbort> {
        if let Some(abort) = &self.aborted {
            return Err(abort.clone());
        }

        let (header, prefix) = match self.pending {
            Some(pending) => pending,
            None => match try_read_frame_header(&self.buffer) {
                Ok(Some(found)) => found,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.abort(e)),
            },
        };

        if header.length > self.max_frame_size {
            return Err(self.abort(FrameError::TooLarge {
                length: header.length,
                limit: self.max_frame_size,
            }));
        }
        self.pending = Some((header, prefix));

        let total = prefix + header.length as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(prefix);
        let payload = self.buffer.split_to(header.length as usize).freeze();
        self.pending = None;
        Ok(Some(Frame { header, payload }))
    }
}

/// Well-known SETTINGS identifiers.
pub mod settings_id {
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x1;
    pub const MAX_FIELD_SECTION_SIZE: u64 = 0x6;
    pub const QPACK_BLOCKED_STREAMS: u64 = 0x7;
}

/// Encode a SETTINGS frame from `(identifier, value)` pairs.
pub fn encode_settings(settings: &[(u64, u64)], dst: &mut BytesMut) -> Result<(), FrameError> {
    let mut payload = BytesMut::new();
    for &(id, value) in settings {
        varint::put(id, &mut payload).ok_or(FrameError::VarintOverflow(id))?;
        varint::put(value, &mut payload).ok_or(FrameError::VarintOverflow(value))?;
    }
    encode_frame(FrameType::Settings, &payload, dst);
    Ok(())
}

/// Decode a SETTINGS payload. Duplicate identifiers are an error.
pub fn decode_settings(mut payload: &[u8]) -> Result<Vec<(u64, u64)>, FrameError> {
    let mut settings: Vec<(u64, u64)> = Vec::new();
    while !payload.is_empty() {
        let (id, n) = varint::try_decode(payload).ok_or(FrameError::Malformed("SETTINGS"))?;
        payload = &payload[n..];
        let (value, n) = varint::try_decode(payload).ok_or(FrameError::Malformed("SETTINGS"))?;
        payload = &payload[n..];

        if settings.iter().any(|(existing, _)| *existing == id) {
            return Err(FrameError::DuplicateSetting(id));
        }
        settings.push((id, value));
    }
    Ok(settings)
}

/// Encode a GOAWAY frame carrying the last stream or push id.
pub fn encode_goaway(id: u64, dst: &mut BytesMut) -> Result<(), FrameError> {
    let mut payload = BytesMut::with_capacity(8);
    varint::put(id, &mut payload).ok_or(FrameError::VarintOverflow(id))?;
    encode_frame(FrameType::GoAway, &payload, dst);
    Ok(())
}

/// Decode a GOAWAY payload, which must hold exactly one varint.
pub fn decode_goaway(payload: &[u8]) -> Result<u64, FrameError> {
    match varint::try_decode(payload) {
        Some((id, n)) if n == payload.len() => Ok(id),
        _ => Err(FrameError::Malformed("GOAWAY")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_needs_full_prefix() {
        // DATA, length 300 (two-byte varint)
        let bytes = [0x00, 0x41, 0x2c];
        assert_eq!(try_read_frame_header(&bytes[..1]).unwrap(), None);
        assert_eq!(try_read_frame_header(&bytes[..2]).unwrap(), None);
        let (header, used) = try_read_frame_header(&bytes).unwrap().unwrap();
        assert_eq!(used, 3);
        assert_eq!(header.kind(), Some(FrameType::Data));
        assert_eq!(header.length, 300);
    }

    #[test]
    fn write_header_leaves_small_buffer_untouched() {
        let mut small = [0xffu8; 2];
        assert_eq!(try_write_frame_header(FrameType::Headers, 300, &mut small), None);
        assert_eq!(small, [0xff, 0xff]);

        let mut buf = [0u8; 3];
        assert_eq!(try_write_frame_header(FrameType::Headers, 300, &mut buf), Some(3));
        assert_eq!(buf, [0x01, 0x41, 0x2c]);
    }

    #[test]
    fn every_defined_type_is_one_byte() {
        for ty in [
            FrameType::Data,
            FrameType::Headers,
            FrameType::CancelPush,
            FrameType::Settings,
            FrameType::PushPromise,
            FrameType::GoAway,
            FrameType::MaxPushId,
            FrameType::DuplicatePush,
        ] {
            assert_eq!(varint::encoded_len(ty.as_u64()), 1);
            assert_eq!(FrameType::from_u64(ty.as_u64()), Some(ty));
        }
    }

    #[test]
    fn error_code_range() {
        assert_eq!(ErrorCode::from_u64(0x100), Some(ErrorCode::NoError));
        assert_eq!(ErrorCode::from_u64(0x110), Some(ErrorCode::VersionFallback));
        assert_eq!(ErrorCode::from_u64(0x111), None);
        assert_eq!(ErrorCode::from_u64(0xff), None);
    }

    #[test]
    fn h2_only_types_are_rejected() {
        let err = try_read_frame_header(&[0x06, 0x00]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FrameUnexpected);
    }

    #[test]
    fn reader_reassembles_split_frames() {
        let mut wire = BytesMut::new();
        encode_frame(FrameType::Headers, b"abc", &mut wire);
        encode_frame(FrameType::Data, b"hello world", &mut wire);

        let mut reader = FrameReader::new(1024);
        let mut frames = Vec::new();
        for byte in wire.iter() {
            reader.extend(&[*byte]);
            while let Some(frame) = reader.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind(), Some(FrameType::Headers));
        assert_eq!(&frames[0].payload[..], b"abc");
        assert_eq!(&frames[1].payload[..], b"hello world");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn oversized_frame_aborts_stream_only() {
        let mut reader = FrameReader::new(8);
        let mut header = [0u8; 9];
        let n = try_write_frame_header(FrameType::Data, 9, &mut header).unwrap();
        reader.extend(&header[..n]);

        let abort = reader.next_frame().unwrap_err();
        assert_eq!(abort.code, ErrorCode::ExcessiveLoad);
        assert!(reader.is_aborted());
        assert_eq!(reader.buffered(), 0);

        reader.extend(b"more");
        assert_eq!(reader.next_frame().unwrap_err(), abort);
    }

    #[test]
    fn unknown_types_pass_through() {
        let mut reader = FrameReader::new(64);
        reader.extend(&[0x21, 0x02, b'h', b'i']);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind(), None);
        assert_eq!(frame.header.frame_type, 0x21);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[test]
    fn settings_payload() {
        let mut wire = BytesMut::new();
        encode_settings(
            &[(settings_id::MAX_FIELD_SECTION_SIZE, 16384), (settings_id::QPACK_BLOCKED_STREAMS, 0)],
            &mut wire,
        )
        .unwrap();

        let mut reader = FrameReader::new(64);
        reader.extend(&wire);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind(), Some(FrameType::Settings));
        assert_eq!(
            decode_settings(&frame.payload).unwrap(),
            vec![(settings_id::MAX_FIELD_SECTION_SIZE, 16384), (settings_id::QPACK_BLOCKED_STREAMS, 0)]
        );

        assert_eq!(decode_settings(&[0x06, 0x01, 0x06, 0x02]), Err(FrameError::DuplicateSetting(6)));
        assert_eq!(decode_settings(&[0x06]), Err(FrameError::Malformed("SETTINGS")));
    }

    #[test]
    fn goaway_payload() {
        let mut wire = BytesMut::new();
        encode_goaway(1000, &mut wire).unwrap();
        let (header, n) = try_read_frame_header(&wire).unwrap().unwrap();
        assert_eq!(header.kind(), Some(FrameType::GoAway));
        assert_eq!(decode_goaway(&wire[n..]).unwrap(), 1000);

        assert!(decode_goaway(&[]).is_err());
        assert!(decode_goaway(&[0x01, 0x02]).is_err());
    }
}
