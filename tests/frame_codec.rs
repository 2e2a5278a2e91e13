//! Framed stream reassembly driven the way a connection feeds it.

use std::sync::Arc;

use bytes::BytesMut;

use spindle::config::ServerConfig;
use spindle::frame::{
    decode_goaway, decode_settings, encode_frame, encode_goaway, encode_settings, ErrorCode, FrameError, FrameType,
};
use spindle::http::{handler_fn, AppError, ServiceContext};

fn service(max_frame_size: u64) -> ServiceContext {
    let mut config = ServerConfig::default();
    config.limits.max_frame_size = max_frame_size;
    let handler = handler_fn(|_ctx| Box::pin(async move { Ok::<(), AppError>(()) }));
    ServiceContext::from_config(&config, Arc::new(handler))
}

fn control_stream() -> BytesMut {
    let mut wire = BytesMut::new();
    encode_settings(&[(0x6, 16384), (0x1, 0)], &mut wire).unwrap();
    encode_frame(FrameType::Headers, b"\x00\x00\xd1\xd7", &mut wire);
    encode_frame(FrameType::Data, b"Hello, frames", &mut wire);
    // Unknown (reserved grease) type passes through.
    wire.extend_from_slice(&[0x21, 0x02, 0xaa, 0xbb]);
    encode_goaway(1000, &mut wire).unwrap();
    wire
}

#[test]
fn reassembles_a_stream_fed_one_byte_at_a_time() {
    let wire = control_stream();
    let mut reader = service(1024).frame_reader();

    let mut frames = Vec::new();
    for byte in wire.iter() {
        reader.extend(std::slice::from_ref(byte));
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
    }
    assert_eq!(reader.buffered(), 0);

    let kinds: Vec<_> = frames.iter().map(|f| f.header.frame_type).collect();
    assert_eq!(kinds, vec![0x4, 0x1, 0x0, 0x21, 0x7]);

    assert_eq!(decode_settings(&frames[0].payload).unwrap(), vec![(0x6, 16384), (0x1, 0)]);
    assert_eq!(&frames[2].payload[..], b"Hello, frames");
    assert_eq!(frames[3].kind(), None);
    assert_eq!(decode_goaway(&frames[4].payload).unwrap(), 1000);
}

#[test]
fn configured_cap_aborts_oversized_frames() {
    let mut wire = BytesMut::new();
    encode_frame(FrameType::Data, &[7u8; 64], &mut wire);
    encode_frame(FrameType::Data, &[8u8; 65], &mut wire);

    let mut reader = service(64).frame_reader();
    assert_eq!(reader.max_frame_size(), 64);
    reader.extend(&wire);

    let first = reader.next_frame().unwrap().unwrap();
    assert_eq!(first.payload.len(), 64);

    let abort = reader.next_frame().unwrap_err();
    assert_eq!(abort.code, ErrorCode::ExcessiveLoad);
    assert_eq!(abort.error, FrameError::TooLarge { length: 65, limit: 64 });
    assert_eq!(reader.buffered(), 0);

    // Terminal: more input is ignored and the same abort is reported.
    reader.extend(&[0x00, 0x01, 0x00]);
    assert_eq!(reader.next_frame().unwrap_err(), abort);
    assert!(reader.is_aborted());
}

#[test]
fn http2_only_types_abort_the_stream() {
    let mut reader = service(1024).frame_reader();
    reader.extend(&[0x08, 0x04, 0, 0, 0, 0]);

    let abort = reader.next_frame().unwrap_err();
    assert_eq!(abort.code, ErrorCode::FrameUnexpected);
    assert_eq!(abort.error, FrameError::Unexpected(0x8));
}

#[test]
fn duplicate_settings_are_rejected() {
    let mut wire = BytesMut::new();
    encode_settings(&[(0x6, 1), (0x6, 2)], &mut wire).unwrap();

    let mut reader = service(1024).frame_reader();
    reader.extend(&wire);
    let frame = reader.next_frame().unwrap().unwrap();

    let err = decode_settings(&frame.payload).unwrap_err();
    assert_eq!(err, FrameError::DuplicateSetting(0x6));
    assert_eq!(err.code(), ErrorCode::SettingsError);
}
