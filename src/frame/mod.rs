//! Binary frame codec for the framed (HTTP/3 style) transport.
//!
//! # Wire Format
//! ```text
//! [type: varint][length: varint][payload: length bytes] ...
//! ```
//!
//! # Design Decisions
//! - Reading never consumes a partial prefix; callers retry with more bytes
//! - Errors abort the framed stream (`StreamAbort`), never the connection
//! - Buffered frames are capped at `limits.max_frame_size`

pub mod codec;
pub mod varint;

pub use codec::{
    decode_goaway, decode_settings, encode_frame, encode_goaway, encode_settings, try_read_frame_header,
    try_write_frame_header, ErrorCode, Frame, FrameError, FrameHeader, FrameReader, FrameType, StreamAbort,
};
