// mcb-common - Wire protocol definitions for the mcb memcached client
//
// This crate holds the binary frame codec and the message model shared by
// the client and by the scripted servers used in tests.

pub mod codec;
pub mod error;
pub mod message;
pub mod protocol;

// Re-export for convenience
pub use error::*;
pub use message::*;
pub use protocol::*;
