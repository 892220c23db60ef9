//! # Server Session
//!
//! Purpose: Own the single connection to one server and run strictly one
//! request/response exchange at a time over it.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: `Disconnected` is a state, not a missing
//!    socket. Every failure path lands back in it.
//! 2. **Lazy Connect**: The socket is dialed (and authenticated) on first use
//!    and re-dialed on the next call after a teardown.
//! 3. **Teardown Once**: `settle` is the only place that closes the link after
//!    an exchange error, and only for network-class errors.
//! 4. **Buffer Reuse**: Requests are encoded into a per-link buffer; response
//!    bodies are read into arena buffers scoped to one receive.
//!
//! ## State Transitions
//!
//! ```text
//! Disconnected --dial--> Connecting --ok--> Authenticating --ok--> Ready
//!      ^                     |                    |                  |
//!      +-----dial error------+------auth error----+---network error--+
//! ```

use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::mem;
use std::sync::Arc;

use bytes::BytesMut;
use mcb_common::codec;
use mcb_common::{Message, Opcode, ProtocolError, Status, HEADER_LEN};
use tracing::debug;

use crate::arena::BufferArena;
use crate::config::{Config, ServerAddr};
use crate::error::{ClientError, ClientResult};
use crate::transport::{Dialer, Transport};

/// Name/value pairs returned by a stats request.
pub type Stats = HashMap<String, String>;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

enum State {
    Disconnected,
    Connecting,
    Authenticating(Link),
    Ready(Link),
}

/// Connection to a single server.
///
/// Not internally synchronized; the cluster wraps each session in a mutex
/// so exactly one exchange is in flight per server.
pub struct Session {
    server: ServerAddr,
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    arena: Arc<BufferArena>,
    state: State,
}

impl Session {
    pub fn new(
        server: ServerAddr,
        config: Arc<Config>,
        dialer: Arc<dyn Dialer>,
        arena: Arc<BufferArena>,
    ) -> Self {
        Session {
            server,
            config,
            dialer,
            arena,
            state: State::Disconnected,
        }
    }

    pub fn server(&self) -> &ServerAddr {
        &self.server
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Disconnected => Phase::Disconnected,
            State::Connecting => Phase::Connecting,
            State::Authenticating(_) => Phase::Authenticating,
            State::Ready(_) => Phase::Ready,
        }
    }

    /// Sends `msg` and overwrites it with the response.
    ///
    /// Returns `ClientError::Status` when the server answers with a
    /// non-success status; the connection stays up in that case.
    pub fn perform(&mut self, msg: &mut Message) -> ClientResult<()> {
        let link = self.ready_link()?;
        let result = link.exchange(msg);
        self.settle(result)
    }

    /// Sends a stats request and collects responses until the empty-key
    /// terminator.
    pub fn perform_stats(&mut self, msg: &mut Message) -> ClientResult<Stats> {
        let link = self.ready_link()?;
        let result = link.collect_stats(msg);
        self.settle(result)
    }

    /// Sends a best-effort quit when connected, then closes the link.
    pub fn quit(&mut self) {
        if let State::Ready(link) = &mut self.state {
            let mut msg = Message::new(Opcode::Quit);
            if let Err(err) = link.exchange(&mut msg) {
                debug!(server = %self.server, error = %err, "quit exchange failed");
            }
        }
        self.teardown();
    }

    fn ready_link(&mut self) -> ClientResult<&mut Link> {
        if !matches!(self.state, State::Ready(_)) {
            self.connect()?;
        }
        match &mut self.state {
            State::Ready(link) => Ok(link),
            _ => Err(ClientError::Network(io::Error::new(
                io::ErrorKind::NotConnected,
                "session is not ready",
            ))),
        }
    }

    fn connect(&mut self) -> ClientResult<()> {
        self.state = State::Connecting;
        debug!(server = %self.server, "dialing");
        let transport = match self.dialer.dial(&self.server, &self.config) {
            Ok(transport) => transport,
            Err(err) => {
                self.state = State::Disconnected;
                return Err(ClientError::Network(err));
            }
        };
        self.state = State::Authenticating(Link::new(
            transport,
            Arc::clone(&self.arena),
            self.config.max_body_size,
        ));

        let auth = match &mut self.state {
            State::Authenticating(link) => authenticate(link, &self.config),
            _ => Ok(()),
        };
        match auth {
            Ok(()) => {}
            Err(ClientError::Status(Status::UnknownCommand)) => {
                debug!(server = %self.server, "server has no SASL support, continuing");
            }
            Err(err) => {
                debug!(server = %self.server, error = %err, "authentication failed");
                self.teardown();
                return Err(err);
            }
        }

        self.state = match mem::replace(&mut self.state, State::Disconnected) {
            State::Authenticating(link) => State::Ready(link),
            other => other,
        };
        Ok(())
    }

    fn settle<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &result {
            if err.is_network() {
                debug!(server = %self.server, error = %err, "tearing down connection");
                self.teardown();
            }
        }
        result
    }

    fn teardown(&mut self) {
        match mem::replace(&mut self.state, State::Disconnected) {
            State::Authenticating(link) | State::Ready(link) => link.close(),
            State::Connecting | State::Disconnected => {}
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Live socket plus its reusable buffers.
struct Link {
    // Buffered reader reduces syscalls; writes go straight to the stream.
    reader: BufReader<Box<dyn Transport>>,
    write_buf: BytesMut,
    header: [u8; HEADER_LEN],
    next_opaque: u32,
    max_body_size: u32,
    arena: Arc<BufferArena>,
}

impl Link {
    fn new(transport: Box<dyn Transport>, arena: Arc<BufferArena>, max_body_size: u32) -> Self {
        Link {
            reader: BufReader::new(transport),
            write_buf: BytesMut::with_capacity(256),
            header: [0u8; HEADER_LEN],
            next_opaque: 0,
            max_body_size,
            arena,
        }
    }

    fn exchange(&mut self, msg: &mut Message) -> ClientResult<()> {
        self.send(msg)?;
        self.recv(msg)
    }

    fn collect_stats(&mut self, msg: &mut Message) -> ClientResult<Stats> {
        self.send(msg)?;
        let mut stats = Stats::new();
        loop {
            self.recv(msg)?;
            if msg.header.key_len == 0 {
                return Ok(stats);
            }
            stats.insert(
                String::from_utf8_lossy(&msg.key).into_owned(),
                String::from_utf8_lossy(&msg.value).into_owned(),
            );
        }
    }

    fn send(&mut self, msg: &mut Message) -> ClientResult<()> {
        msg.header.opaque = self.next_opaque;
        self.write_buf.clear();
        codec::encode_request(msg, &mut self.write_buf).map_err(ClientError::InvalidRequest)?;
        self.next_opaque = self.next_opaque.wrapping_add(1);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, msg: &mut Message) -> ClientResult<()> {
        self.reader.read_exact(&mut self.header)?;
        msg.header = codec::decode_header(&self.header)?;
        if msg.header.body_len > self.max_body_size {
            return Err(ProtocolError::BodyTooLong(msg.header.body_len as usize).into());
        }

        let mut body = self.arena.acquire(msg.header.body_len as usize);
        self.reader.read_exact(&mut body)?;
        codec::decode_body(msg, &body)?;
        drop(body);

        match msg.status() {
            Status::Success => Ok(()),
            status => Err(ClientError::Status(status)),
        }
    }

    fn close(mut self) {
        // Peer may already be gone; nothing useful to do with the error.
        let _ = self.reader.get_mut().shutdown();
    }
}

fn authenticate(link: &mut Link, config: &Config) -> ClientResult<()> {
    if !config.has_credentials() {
        return Ok(());
    }
    let mechanisms = list_mechanisms(link)?;
    if mechanisms.split_whitespace().any(|mech| mech == "PLAIN") {
        return auth_plain(link, &config.username, &config.password);
    }
    Err(ClientError::Auth {
        status: None,
        detail: format!("unsupported mechanisms {:?}", mechanisms),
    })
}

fn list_mechanisms(link: &mut Link) -> ClientResult<String> {
    let mut msg = Message::new(Opcode::AuthList);
    link.exchange(&mut msg).map_err(auth_error)?;
    Ok(String::from_utf8_lossy(&msg.value).into_owned())
}

fn auth_plain(link: &mut Link, username: &str, password: &str) -> ClientResult<()> {
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());

    let mut msg = Message::new(Opcode::AuthStart)
        .with_key("PLAIN")
        .with_value(token);
    link.exchange(&mut msg).map_err(auth_error)
}

// UnknownCommand passes through untouched: the caller treats it as
// "server has no SASL support".
fn auth_error(err: ClientError) -> ClientError {
    match err {
        ClientError::Status(status) if status != Status::UnknownCommand => ClientError::Auth {
            status: Some(status),
            detail: status.to_string(),
        },
        other => other,
    }
}
