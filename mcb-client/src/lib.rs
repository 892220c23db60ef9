//! # mcb Sync Client
//!
//! Purpose: Provide a blocking memcached client speaking the binary protocol,
//! with key routing across a server cluster and failover when a server
//! becomes unreachable.
//!
//! ## Design Principles
//! 1. **One Connection per Server**: Each server gets a single lazily dialed
//!    session; requests to one server are serialized.
//! 2. **Explicit Wire Format**: Frames are encoded and decoded by
//!    `mcb_common::codec`, never by ad hoc byte slicing.
//! 3. **Minimal Allocation**: Response bodies reuse pooled arena buffers.
//! 4. **Pluggable Seams**: Routing (`Router`) and sockets (`Dialer`) are
//!    traits so tests and callers can swap them.

mod arena;
mod client;
mod cluster;
mod config;
mod error;
mod router;
mod session;
mod transport;

#[cfg(test)]
mod testing;

pub use arena::{ArenaBuf, BufferArena};
pub use client::{Client, Counter, Item};
pub use cluster::Cluster;
pub use config::{Config, HasherKind, Scheme, ServerAddr};
pub use error::{ClientError, ClientResult};
pub use router::{build_router, ModuloRouter, RingRouter, Router, RING_POINTS_PER_SERVER};
pub use session::{Phase, Session, Stats};
pub use transport::{Dialer, NetDialer, Transport};

pub use mcb_common::{Extra, Message, Opcode, ProtocolError, Status, Width};
