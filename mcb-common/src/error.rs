//! Codec errors.
//!
//! Every variant means the byte stream can no longer be trusted, so callers
//! treat these like network failures.

use thiserror::Error;

/// Result alias for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Malformed or unencodable frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("truncated header: {0} bytes")]
    TruncatedHeader(usize),

    #[error("unknown magic byte 0x{0:02x}")]
    UnknownMagic(u8),

    #[error("truncated body: expected {expected} bytes, {available} available")]
    TruncatedBody { expected: usize, available: usize },

    #[error("truncated extras: needed {needed} bytes, {available} available")]
    TruncatedExtras { needed: usize, available: usize },

    #[error("truncated key: key length {key_len}, {available} bytes available")]
    TruncatedKey { key_len: usize, available: usize },

    #[error("extras segment too long: {0} bytes")]
    ExtrasTooLong(usize),

    #[error("key too long: {0} bytes")]
    KeyTooLong(usize),

    #[error("body too long: {0} bytes")]
    BodyTooLong(usize),

    #[error("counter value must be 8 bytes, got {0}")]
    CounterLength(usize),
}
