//! # Client API
//!
//! Purpose: Expose the memcached verbs as blocking calls over the cluster.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides routing, failover and framing.
//! 2. **Borrow-Friendly API**: Keys and values are accepted as `&[u8]`.
//! 3. **Thin Verbs**: Each verb builds a `Message`, dispatches it and reads
//!    typed results back out of the response.

use std::collections::HashMap;
use std::sync::Arc;

use mcb_common::codec::decode_counter;
use mcb_common::{Extra, Message, Opcode, Width};

use crate::cluster::Cluster;
use crate::config::{Config, ServerAddr};
use crate::error::ClientResult;
use crate::session::Stats;
use crate::transport::{Dialer, NetDialer};

/// Value stored under a key, with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: u64,
}

/// Result of an increment or decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub value: u64,
    pub cas: u64,
}

/// Blocking memcached client over a cluster of servers.
///
/// `Client` is `Sync`; share it between threads behind an `Arc`. Calls to
/// different servers proceed in parallel, calls to the same server queue.
pub struct Client {
    cluster: Cluster,
}

impl Client {
    /// Creates a client that dials real sockets.
    pub fn new(config: Config) -> ClientResult<Self> {
        Self::with_dialer(config, Arc::new(NetDialer))
    }

    /// Creates a client with a custom transport dialer.
    pub fn with_dialer(config: Config, dialer: Arc<dyn Dialer>) -> ClientResult<Self> {
        Ok(Client {
            cluster: Cluster::new(config, dialer)?,
        })
    }

    /// Creates a client for a comma separated server list with defaults.
    pub fn connect(servers: &str) -> ClientResult<Self> {
        Self::new(Config::with_servers(ServerAddr::parse_list(servers)?))
    }

    /// Like `connect`, authenticating every connection with SASL PLAIN.
    pub fn connect_with_auth(servers: &str, username: &str, password: &str) -> ClientResult<Self> {
        let config =
            Config::with_servers(ServerAddr::parse_list(servers)?).with_credentials(username, password);
        Self::new(config)
    }

    /// Wraps an already built cluster, e.g. one with a custom router.
    pub fn from_cluster(cluster: Cluster) -> Self {
        Client { cluster }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Fetches a key.
    pub fn get(&self, key: &[u8]) -> ClientResult<Item> {
        let msg = Message::new(Opcode::Get)
            .with_key(key)
            .expect_extras(&[Width::U32]);
        self.run(key, msg).map(item_from)
    }

    /// Fetches a key and resets its expiration.
    pub fn get_and_touch(&self, key: &[u8], exp: u32) -> ClientResult<Item> {
        let msg = Message::new(Opcode::GetAndTouch)
            .with_key(key)
            .with_extras([Extra::U32(exp)])
            .expect_extras(&[Width::U32]);
        self.run(key, msg).map(item_from)
    }

    /// Stores a value unconditionally (or only if `cas` matches when non-zero).
    /// Returns the new CAS.
    pub fn set(&self, key: &[u8], value: &[u8], flags: u32, exp: u32, cas: u64) -> ClientResult<u64> {
        self.store(Opcode::Set, key, value, flags, exp, cas)
    }

    /// Stores a value only if the key does not exist.
    pub fn add(&self, key: &[u8], value: &[u8], flags: u32, exp: u32) -> ClientResult<u64> {
        self.store(Opcode::Add, key, value, flags, exp, 0)
    }

    /// Stores a value only if the key already exists.
    pub fn replace(&self, key: &[u8], value: &[u8], flags: u32, exp: u32, cas: u64) -> ClientResult<u64> {
        self.store(Opcode::Replace, key, value, flags, exp, cas)
    }

    pub fn append(&self, key: &[u8], value: &[u8], cas: u64) -> ClientResult<u64> {
        self.concat(Opcode::Append, key, value, cas)
    }

    pub fn prepend(&self, key: &[u8], value: &[u8], cas: u64) -> ClientResult<u64> {
        self.concat(Opcode::Prepend, key, value, cas)
    }

    pub fn delete(&self, key: &[u8]) -> ClientResult<()> {
        self.delete_cas(key, 0)
    }

    /// Deletes a key only if its CAS matches.
    pub fn delete_cas(&self, key: &[u8], cas: u64) -> ClientResult<()> {
        let msg = Message::new(Opcode::Delete).with_key(key).with_cas(cas);
        self.run(key, msg).map(|_| ())
    }

    /// Increments a counter, creating it with `initial` when missing.
    pub fn incr(&self, key: &[u8], delta: u64, initial: u64, exp: u32, cas: u64) -> ClientResult<Counter> {
        self.counter(Opcode::Increment, key, delta, initial, exp, cas)
    }

    /// Decrements a counter; the server clamps at zero.
    pub fn decr(&self, key: &[u8], delta: u64, initial: u64, exp: u32, cas: u64) -> ClientResult<Counter> {
        self.counter(Opcode::Decrement, key, delta, initial, exp, cas)
    }

    /// Updates the expiration of a key. Returns the CAS.
    pub fn touch(&self, key: &[u8], exp: u32) -> ClientResult<u64> {
        let msg = Message::new(Opcode::Touch)
            .with_key(key)
            .with_extras([Extra::U32(exp)]);
        self.run(key, msg).map(|resp| resp.cas())
    }

    /// Invalidates all items on every server after `when` seconds.
    pub fn flush(&self, when: u32) -> ClientResult<()> {
        let msg = Message::new(Opcode::Flush).with_extras([Extra::U32(when)]);
        self.cluster.broadcast(&msg).map(|_| ())
    }

    /// Round-trips a no-op to every server.
    pub fn noop(&self) -> ClientResult<()> {
        self.cluster.broadcast(&Message::new(Opcode::Noop)).map(|_| ())
    }

    /// Server versions keyed by address.
    pub fn version(&self) -> ClientResult<HashMap<String, String>> {
        let responses = self.cluster.broadcast(&Message::new(Opcode::Version))?;
        Ok(responses
            .into_iter()
            .map(|(addr, msg)| (addr.address, String::from_utf8_lossy(&msg.value).into_owned()))
            .collect())
    }

    /// General statistics keyed by server address.
    pub fn stats(&self) -> ClientResult<HashMap<String, Stats>> {
        self.cluster.stats(None)
    }

    /// Statistics group (`"items"`, `"slabs"`, ...) keyed by server address.
    pub fn stats_with_key(&self, key: &str) -> ClientResult<HashMap<String, Stats>> {
        self.cluster.stats(Some(key.as_bytes()))
    }

    /// Sends quit to connected servers and closes every connection.
    pub fn quit(&self) {
        self.cluster.quit();
    }

    fn store(
        &self,
        op: Opcode,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exp: u32,
        cas: u64,
    ) -> ClientResult<u64> {
        let msg = Message::new(op)
            .with_key(key)
            .with_value(value)
            .with_cas(cas)
            .with_extras([Extra::U32(flags), Extra::U32(exp)]);
        self.run(key, msg).map(|resp| resp.cas())
    }

    fn concat(&self, op: Opcode, key: &[u8], value: &[u8], cas: u64) -> ClientResult<u64> {
        let msg = Message::new(op).with_key(key).with_value(value).with_cas(cas);
        self.run(key, msg).map(|resp| resp.cas())
    }

    fn counter(
        &self,
        op: Opcode,
        key: &[u8],
        delta: u64,
        initial: u64,
        exp: u32,
        cas: u64,
    ) -> ClientResult<Counter> {
        let msg = Message::new(op)
            .with_key(key)
            .with_cas(cas)
            .with_extras([Extra::U64(delta), Extra::U64(initial), Extra::U32(exp)]);
        let resp = self.run(key, msg)?;
        Ok(Counter {
            value: decode_counter(&resp.value)?,
            cas: resp.cas(),
        })
    }

    fn run(&self, key: &[u8], mut msg: Message) -> ClientResult<Message> {
        self.cluster.dispatch(key, &mut msg)?;
        Ok(msg)
    }
}

fn item_from(msg: Message) -> Item {
    Item {
        flags: msg.extra(0).map_or(0, |flags| flags.as_u64() as u32),
        cas: msg.cas(),
        value: msg.value,
    }
}
