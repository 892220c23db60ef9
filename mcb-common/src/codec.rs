//! # Wire Codec
//!
//! Purpose: Translate between `Message` and the binary frame format. Pure
//! functions only; sockets and buffers belong to the caller.
//!
//! ## Design Principles
//!
//! 1. **Derived Lengths**: `key_len`, `extras_len` and `body_len` are always
//!    recomputed from the payload before encoding.
//! 2. **Caller-Owned Buffers**: Encoding appends to a `BytesMut` the caller
//!    reuses; decoding copies key/value out of a borrowed body slice.
//! 3. **Fail Fast**: Any length mismatch is a `ProtocolError`, never a panic.
//!
//! ## Frame Layout
//!
//! ```text
//! +-----------+---------------------+-----------+--------------+
//! | header:24B| extras:extras_len   | key:k_len | value:rest   |
//! +-----------+---------------------+-----------+--------------+
//!              \_____________ body_len ____________________/
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Extra, Header, Message, Width};
use crate::protocol::{HEADER_LEN, MAGIC_REQUEST, MAGIC_RESPONSE, MAX_EXTRAS_LEN, MAX_KEY_LEN};

/// Writes `header` into a fixed 24-byte buffer.
pub fn encode_header(header: &Header, out: &mut [u8; HEADER_LEN]) {
    let mut buf = &mut out[..];
    buf.put_u8(header.magic);
    buf.put_u8(header.opcode);
    buf.put_u16(header.key_len);
    buf.put_u8(header.extras_len);
    buf.put_u8(header.data_type);
    buf.put_u16(header.status);
    buf.put_u32(header.body_len);
    buf.put_u32(header.opaque);
    buf.put_u64(header.cas);
}

/// Parses the first 24 bytes of `bytes` as a frame header.
pub fn decode_header(bytes: &[u8]) -> ProtocolResult<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader(bytes.len()));
    }
    let mut buf = &bytes[..HEADER_LEN];
    let magic = buf.get_u8();
    if magic != MAGIC_REQUEST && magic != MAGIC_RESPONSE {
        return Err(ProtocolError::UnknownMagic(magic));
    }
    let opcode = buf.get_u8();
    let key_len = buf.get_u16();
    let extras_len = buf.get_u8();
    let data_type = buf.get_u8();
    let status = buf.get_u16();
    let body_len = buf.get_u32();
    let opaque = buf.get_u32();
    let cas = buf.get_u64();
    Ok(Header {
        magic,
        opcode,
        key_len,
        extras_len,
        data_type,
        status,
        body_len,
        opaque,
        cas,
    })
}

/// Encodes `msg` as a request frame, appending it to `out`.
///
/// Sets the request magic and recomputes every length field on `msg`.
pub fn encode_request(msg: &mut Message, out: &mut BytesMut) -> ProtocolResult<()> {
    encode_frame(msg, MAGIC_REQUEST, out)
}

/// Encodes `msg` as a response frame. Used by scripted servers in tests
/// and tooling; the client itself only sends requests.
pub fn encode_response(msg: &mut Message, out: &mut BytesMut) -> ProtocolResult<()> {
    encode_frame(msg, MAGIC_RESPONSE, out)
}

fn encode_frame(msg: &mut Message, magic: u8, out: &mut BytesMut) -> ProtocolResult<()> {
    stamp_lengths(msg, magic)?;

    let mut header = [0u8; HEADER_LEN];
    encode_header(&msg.header, &mut header);
    out.reserve(HEADER_LEN + msg.header.body_len as usize);
    out.put_slice(&header);

    for extra in &msg.extras_in {
        match *extra {
            Extra::U8(v) => out.put_u8(v),
            Extra::U16(v) => out.put_u16(v),
            Extra::U32(v) => out.put_u32(v),
            Extra::U64(v) => out.put_u64(v),
        }
    }
    out.put_slice(&msg.key);
    out.put_slice(&msg.value);
    Ok(())
}

fn stamp_lengths(msg: &mut Message, magic: u8) -> ProtocolResult<()> {
    let extras_len = msg.extras_in_len();
    if extras_len > MAX_EXTRAS_LEN {
        return Err(ProtocolError::ExtrasTooLong(extras_len));
    }
    if msg.key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::KeyTooLong(msg.key.len()));
    }
    let body_len = extras_len + msg.key.len() + msg.value.len();
    let body_len_u32 =
        u32::try_from(body_len).map_err(|_| ProtocolError::BodyTooLong(body_len))?;

    msg.header.magic = magic;
    msg.header.extras_len = extras_len as u8;
    msg.header.key_len = msg.key.len() as u16;
    msg.header.body_len = body_len_u32;
    Ok(())
}

/// Decodes a full frame into `msg`: header from `header`, payload from the
/// first `body_len` bytes of `body`.
///
/// `msg.extras_out` must already declare the extras to decode.
pub fn decode(msg: &mut Message, header: &[u8], body: &[u8]) -> ProtocolResult<()> {
    msg.header = decode_header(header)?;
    let expected = msg.header.body_len as usize;
    if body.len() < expected {
        return Err(ProtocolError::TruncatedBody {
            expected,
            available: body.len(),
        });
    }
    decode_body(msg, &body[..expected])
}

/// Splits a body into extras, key and value using the lengths in
/// `msg.header`.
///
/// Extras are written to `msg.extras_out` only when the status is success;
/// otherwise the segment is skipped.
pub fn decode_body(msg: &mut Message, body: &[u8]) -> ProtocolResult<()> {
    msg.clear_extras_out();

    let extras_len = msg.header.extras_len as usize;
    if body.len() < extras_len {
        return Err(ProtocolError::TruncatedExtras {
            needed: extras_len,
            available: body.len(),
        });
    }
    let (mut extras, rest) = body.split_at(extras_len);

    if msg.status().is_success() && extras_len > 0 {
        for slot in msg.extras_out.iter_mut() {
            let needed = slot.width().bytes();
            if extras.remaining() < needed {
                return Err(ProtocolError::TruncatedExtras {
                    needed,
                    available: extras.remaining(),
                });
            }
            let value = match slot.width() {
                Width::U8 => Extra::U8(extras.get_u8()),
                Width::U16 => Extra::U16(extras.get_u16()),
                Width::U32 => Extra::U32(extras.get_u32()),
                Width::U64 => Extra::U64(extras.get_u64()),
            };
            slot.fill(value);
        }
    }

    let key_len = msg.header.key_len as usize;
    if rest.len() < key_len {
        return Err(ProtocolError::TruncatedKey {
            key_len,
            available: rest.len(),
        });
    }
    let (key, value) = rest.split_at(key_len);
    msg.key.clear();
    msg.key.extend_from_slice(key);
    msg.value.clear();
    msg.value.extend_from_slice(value);
    Ok(())
}

/// Reads a big-endian counter from an incr/decr response value.
pub fn decode_counter(value: &[u8]) -> ProtocolResult<u64> {
    if value.len() != 8 {
        return Err(ProtocolError::CounterLength(value.len()));
    }
    let mut buf = value;
    Ok(buf.get_u64())
}
