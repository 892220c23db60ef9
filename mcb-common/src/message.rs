//! # Message Model
//!
//! Purpose: Represent one request/response exchange. A `Message` is built as a
//! request and is overwritten in place with the response when it comes back.
//!
//! ## Design Principles
//!
//! 1. **Typed Extras**: Extras are a closed sum of fixed-width integers, so an
//!    unsupported width cannot be constructed.
//! 2. **Slots, Not Maps**: Response extras land in pre-declared `ExtraSlot`s in
//!    declaration order; callers read them back by position.
//! 3. **Owned Snapshots**: `MessageSnapshot` owns copies of every request field,
//!    so a retry never sees state left behind by a failed attempt.

use crate::protocol::{Opcode, Status};

/// Width of a single extras field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    /// Number of bytes the field occupies on the wire.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// A fixed-width extras value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extra {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl Extra {
    #[inline]
    pub const fn width(self) -> Width {
        match self {
            Self::U8(_) => Width::U8,
            Self::U16(_) => Width::U16,
            Self::U32(_) => Width::U32,
            Self::U64(_) => Width::U64,
        }
    }

    /// Widens the value to `u64` regardless of its width.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        match self {
            Self::U8(v) => v as u64,
            Self::U16(v) => v as u64,
            Self::U32(v) => v as u64,
            Self::U64(v) => v,
        }
    }

    /// Returns the value when it was decoded as a 32-bit field.
    pub const fn as_u32(self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }
}

/// Destination for one response extras field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraSlot {
    width: Width,
    value: Option<Extra>,
}

impl ExtraSlot {
    /// Creates an empty slot expecting a field of `width`.
    pub const fn new(width: Width) -> Self {
        ExtraSlot { width, value: None }
    }

    #[inline]
    pub const fn width(&self) -> Width {
        self.width
    }

    /// Value written by the last successful decode, if any.
    #[inline]
    pub const fn value(&self) -> Option<Extra> {
        self.value
    }

    pub(crate) fn fill(&mut self, value: Extra) {
        debug_assert_eq!(value.width(), self.width);
        self.value = Some(value);
    }

    fn clear(&mut self) {
        self.value = None;
    }
}

/// Decoded form of the 24-byte frame header.
///
/// Lengths are derived fields: the codec recomputes them on every encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Header {
    /// Direction discriminant, set by the codec.
    pub magic: u8,
    /// Raw opcode byte.
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    /// Reserved passthrough byte.
    pub data_type: u8,
    /// Status on responses, reserved (zero) on requests.
    pub status: u16,
    pub body_len: u32,
    /// Correlation token echoed by the server.
    pub opaque: u32,
    /// Compare-and-swap token.
    pub cas: u64,
}

/// One request/response unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    /// Values written into the extras segment on send.
    pub extras_in: Vec<Extra>,
    /// Destinations filled from the extras segment on receive.
    pub extras_out: Vec<ExtraSlot>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Message {
    /// Creates an empty request for `opcode`.
    pub fn new(opcode: Opcode) -> Self {
        Message {
            header: Header {
                opcode: opcode.as_u8(),
                ..Header::default()
            },
            extras_in: Vec::new(),
            extras_out: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.header.cas = cas;
        self
    }

    /// Appends request extras in wire order.
    pub fn with_extras(mut self, extras: impl IntoIterator<Item = Extra>) -> Self {
        self.extras_in.extend(extras);
        self
    }

    /// Declares the response extras to decode, in wire order.
    pub fn expect_extras(mut self, widths: &[Width]) -> Self {
        self.extras_out
            .extend(widths.iter().copied().map(ExtraSlot::new));
        self
    }

    /// Known opcode for the current header, if any.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.header.opcode)
    }

    #[inline]
    pub fn status(&self) -> Status {
        Status::from_u16(self.header.status)
    }

    #[inline]
    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    /// Decoded response extra at `index`.
    pub fn extra(&self, index: usize) -> Option<Extra> {
        self.extras_out.get(index).and_then(ExtraSlot::value)
    }

    /// Total width declared by `extras_in`.
    pub fn extras_in_len(&self) -> usize {
        self.extras_in.iter().map(|e| e.width().bytes()).sum()
    }

    /// Captures the request state before an exchange mutates it.
    pub fn snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            header: self.header,
            extras_in: self.extras_in.clone(),
            extras_out: self.extras_out.iter().map(ExtraSlot::width).collect(),
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    /// Puts the message back into the state captured by `snapshot`.
    ///
    /// Buffers are reused where capacity allows; decoded extras are cleared.
    pub fn restore(&mut self, snapshot: &MessageSnapshot) {
        self.header = snapshot.header;
        self.extras_in.clone_from(&snapshot.extras_in);
        self.extras_out.clear();
        self.extras_out
            .extend(snapshot.extras_out.iter().copied().map(ExtraSlot::new));
        self.key.clone_from(&snapshot.key);
        self.value.clone_from(&snapshot.value);
    }

    pub(crate) fn clear_extras_out(&mut self) {
        self.extras_out.iter_mut().for_each(ExtraSlot::clear);
    }
}

/// Owned copy of a message's request fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    header: Header,
    extras_in: Vec<Extra>,
    extras_out: Vec<Width>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MessageSnapshot {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_request() -> Message {
        Message::new(Opcode::Set)
            .with_key("foo")
            .with_value("bar")
            .with_cas(7)
            .with_extras([Extra::U32(0xdead_beef), Extra::U32(3600)])
            .expect_extras(&[Width::U32])
    }

    #[test]
    fn test_width_bytes() {
        assert_eq!(Width::U8.bytes(), 1);
        assert_eq!(Width::U16.bytes(), 2);
        assert_eq!(Width::U32.bytes(), 4);
        assert_eq!(Width::U64.bytes(), 8);
        assert_eq!(Extra::U64(9).width(), Width::U64);
    }

    #[test]
    fn test_extras_in_len() {
        let msg = Message::new(Opcode::Increment).with_extras([
            Extra::U64(1),
            Extra::U64(0),
            Extra::U32(0),
        ]);
        assert_eq!(msg.extras_in_len(), 20);
    }

    #[test]
    fn test_restore_after_receive() {
        let mut msg = set_request();
        let original = msg.clone();
        let snapshot = msg.snapshot();

        // Simulate the response overwriting the request in place.
        msg.header.magic = 0x81;
        msg.header.status = Status::KeyExists.as_u16();
        msg.header.cas = 99;
        msg.header.opaque = 12;
        msg.extras_out[0].fill(Extra::U32(5));
        msg.key.clear();
        msg.value = b"Data exists for key.".to_vec();
        msg.extras_in.push(Extra::U8(1));

        msg.restore(&snapshot);
        assert_eq!(msg, original);
        assert_eq!(msg.extra(0), None);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut msg = set_request();
        let snapshot = msg.snapshot();
        msg.key.push(b'!');
        msg.value.clear();
        assert_eq!(snapshot.key(), b"foo");
        assert_eq!(snapshot.header().cas, 7);
    }

    #[test]
    fn test_extra_accessors() {
        let mut msg = Message::new(Opcode::Get).expect_extras(&[Width::U32, Width::U8]);
        assert_eq!(msg.extra(0), None);
        msg.extras_out[0].fill(Extra::U32(42));
        assert_eq!(msg.extra(0).and_then(Extra::as_u32), Some(42));
        assert_eq!(msg.extra(1), None);
        assert_eq!(msg.extra(2), None);
        msg.clear_extras_out();
        assert_eq!(msg.extra(0), None);
    }
}
