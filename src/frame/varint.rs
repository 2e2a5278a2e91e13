//! QUIC variable-length integers (RFC 9000 Section 16).
//!
//! The two high bits of the first byte give the encoded length: 1, 2, 4 or
//! 8 bytes, leaving 6, 14, 30 or 62 bits for the value.

use bytes::BufMut;

/// Largest encodable value, 2^62 - 1.
pub const MAX: u64 = (1u64 << 62) - 1;

/// Encoded length announced by a first byte.
pub fn len_from_first_byte(first: u8) -> usize {
    1 << (first >> 6)
}

/// Bytes needed to encode `value`.
pub fn encoded_len(value: u64) -> usize {
    if value < 64 {
        1
    } else if value < 16384 {
        2
    } else if value < 1073741824 {
        4
    } else {
        8
    }
}

/// Decode a varint from the front of `data`.
///
/// `None` if `data` does not yet hold the whole integer.
pub fn try_decode(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = len_from_first_byte(first);
    if data.len() < len {
        return None;
    }

    let mut value = u64::from(first & 0x3f);
    for byte in &data[1..len] {
        value = (value << 8) | u64::from(*byte);
    }
    Some((value, len))
}

/// Encode `value` into the front of `buf`.
///
/// `None` if the value exceeds [`MAX`] or `buf` is too small; `buf` is left
/// untouched in both cases.
pub fn try_encode(value: u64, buf: &mut [u8]) -> Option<usize> {
    if value > MAX {
        return None;
    }
    let len = encoded_len(value);
    if buf.len() < len {
        return None;
    }

    let tag: u8 = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        _ => 0xc0,
    };
    let bytes = value.to_be_bytes();
    buf[..len].copy_from_slice(&bytes[8 - len..]);
    buf[0] |= tag;
    Some(len)
}

/// Append `value` to a growable buffer. `None` if it exceeds [`MAX`].
pub fn put<B: BufMut>(value: u64, buf: &mut B) -> Option<usize> {
    let mut tmp = [0u8; 8];
    let len = try_encode(value, &mut tmp)?;
    buf.put_slice(&tmp[..len]);
    Some(len)
}
