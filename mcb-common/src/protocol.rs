//! # Binary Protocol Tables
//!
//! Purpose: Name the magic bytes, opcodes and status codes of the memcached
//! binary protocol so the rest of the workspace never handles raw numbers.
//!
//! ## Design Principles
//!
//! 1. **Closed Enums**: Opcodes the client issues are a closed set; statuses
//!    keep an `Unknown` escape hatch because servers may add codes.
//! 2. **Const Conversions**: `as_u8`/`from_u8` are `const fn` so tables stay
//!    usable in constant contexts.
//!
//! ## Header Layout
//!
//! ```text
//! Header (24 bytes total, big-endian):
//! +-------+--------+---------+-----------+-----------+----------+
//! | magic | opcode | key_len | extras_len| data_type | status   |
//! | 1B    | 1B     | 2B      | 1B        | 1B        | 2B       |
//! +-------+--------+---------+-----------+-----------+----------+
//! | body_len:4B    | opaque:4B           | cas:8B               |
//! +----------------+---------------------+----------------------+
//! ```

use std::fmt;

/// Size of the fixed request/response header.
pub const HEADER_LEN: usize = 24;

/// Magic byte for client-to-server frames.
pub const MAGIC_REQUEST: u8 = 0x80;

/// Magic byte for server-to-client frames.
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Largest extras segment the 1-byte length field can describe.
pub const MAX_EXTRAS_LEN: usize = u8::MAX as usize;

/// Largest key the 2-byte length field can describe.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Command carried in the opcode byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    Noop = 0x0a,
    Version = 0x0b,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    Touch = 0x1c,
    GetAndTouch = 0x1d,
    AuthList = 0x20,
    AuthStart = 0x21,
    AuthContinue = 0x22,
}

impl Opcode {
    /// Converts the opcode to its wire byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a wire byte back to a known opcode.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Get),
            0x01 => Some(Self::Set),
            0x02 => Some(Self::Add),
            0x03 => Some(Self::Replace),
            0x04 => Some(Self::Delete),
            0x05 => Some(Self::Increment),
            0x06 => Some(Self::Decrement),
            0x07 => Some(Self::Quit),
            0x08 => Some(Self::Flush),
            0x0a => Some(Self::Noop),
            0x0b => Some(Self::Version),
            0x0e => Some(Self::Append),
            0x0f => Some(Self::Prepend),
            0x10 => Some(Self::Stat),
            0x1c => Some(Self::Touch),
            0x1d => Some(Self::GetAndTouch),
            0x20 => Some(Self::AuthList),
            0x21 => Some(Self::AuthStart),
            0x22 => Some(Self::AuthContinue),
            _ => None,
        }
    }

    /// Human-readable command name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Add => "ADD",
            Self::Replace => "REPLACE",
            Self::Delete => "DELETE",
            Self::Increment => "INCREMENT",
            Self::Decrement => "DECREMENT",
            Self::Quit => "QUIT",
            Self::Flush => "FLUSH",
            Self::Noop => "NOOP",
            Self::Version => "VERSION",
            Self::Append => "APPEND",
            Self::Prepend => "PREPEND",
            Self::Stat => "STAT",
            Self::Touch => "TOUCH",
            Self::GetAndTouch => "GAT",
            Self::AuthList => "SASL_LIST_MECHS",
            Self::AuthStart => "SASL_AUTH",
            Self::AuthContinue => "SASL_STEP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response status reported in the header's status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    AuthError,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    /// Code outside the table above.
    Unknown(u16),
}

impl Status {
    /// Maps a wire status to its variant.
    pub const fn from_u16(code: u16) -> Self {
        match code {
            0x0000 => Self::Success,
            0x0001 => Self::KeyNotFound,
            0x0002 => Self::KeyExists,
            0x0003 => Self::ValueTooLarge,
            0x0004 => Self::InvalidArguments,
            0x0005 => Self::ItemNotStored,
            0x0006 => Self::NonNumericValue,
            0x0020 => Self::AuthError,
            0x0021 => Self::AuthContinue,
            0x0081 => Self::UnknownCommand,
            0x0082 => Self::OutOfMemory,
            0x0083 => Self::NotSupported,
            0x0084 => Self::InternalError,
            0x0085 => Self::Busy,
            0x0086 => Self::TemporaryFailure,
            other => Self::Unknown(other),
        }
    }

    /// Converts the status back to its wire code.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Success => 0x0000,
            Self::KeyNotFound => 0x0001,
            Self::KeyExists => 0x0002,
            Self::ValueTooLarge => 0x0003,
            Self::InvalidArguments => 0x0004,
            Self::ItemNotStored => 0x0005,
            Self::NonNumericValue => 0x0006,
            Self::AuthError => 0x0020,
            Self::AuthContinue => 0x0021,
            Self::UnknownCommand => 0x0081,
            Self::OutOfMemory => 0x0082,
            Self::NotSupported => 0x0083,
            Self::InternalError => 0x0084,
            Self::Busy => 0x0085,
            Self::TemporaryFailure => 0x0086,
            Self::Unknown(code) => code,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short description matching the server's error strings.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::KeyNotFound => "key not found",
            Self::KeyExists => "key exists",
            Self::ValueTooLarge => "value too large",
            Self::InvalidArguments => "invalid arguments",
            Self::ItemNotStored => "item not stored",
            Self::NonNumericValue => "incr/decr on non-numeric value",
            Self::AuthError => "authentication error",
            Self::AuthContinue => "authentication continue",
            Self::UnknownCommand => "unknown command",
            Self::OutOfMemory => "out of memory",
            Self::NotSupported => "not supported",
            Self::InternalError => "internal error",
            Self::Busy => "busy",
            Self::TemporaryFailure => "temporary failure",
            Self::Unknown(_) => "unknown status",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown status 0x{:04x}", code),
            other => f.write_str(other.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        let opcodes = [
            Opcode::Get,
            Opcode::Set,
            Opcode::Add,
            Opcode::Replace,
            Opcode::Delete,
            Opcode::Increment,
            Opcode::Decrement,
            Opcode::Quit,
            Opcode::Flush,
            Opcode::Noop,
            Opcode::Version,
            Opcode::Append,
            Opcode::Prepend,
            Opcode::Stat,
            Opcode::Touch,
            Opcode::GetAndTouch,
            Opcode::AuthList,
            Opcode::AuthStart,
            Opcode::AuthContinue,
        ];

        for op in opcodes {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0xff), None);
        assert_eq!(Opcode::from_u8(0x09), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::from_u16(0), Status::Success);
        assert_eq!(Status::from_u16(1), Status::KeyNotFound);
        assert_eq!(Status::from_u16(0x81), Status::UnknownCommand);
        assert_eq!(Status::from_u16(0x7777), Status::Unknown(0x7777));
        assert_eq!(Status::Unknown(0x7777).as_u16(), 0x7777);
        assert_eq!(Status::AuthError.as_u16(), 0x20);
        assert!(Status::Success.is_success());
        assert!(!Status::KeyExists.is_success());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::KeyNotFound.to_string(), "key not found");
        assert_eq!(Status::Unknown(0x99).to_string(), "unknown status 0x0099");
    }
}
