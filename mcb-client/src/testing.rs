//! In-memory memcached stand-in used by unit tests.
//!
//! `FakeDialer` hands out `FakeTransport`s wired to shared `FakeServer`s, so
//! sessions and the cluster run their real codec paths without sockets.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use mcb_common::codec;
use mcb_common::{Extra, Message, Opcode, Status, Width, HEADER_LEN};
use parking_lot::Mutex;

use crate::config::{Config, ServerAddr};
use crate::transport::{Dialer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Serves requests normally.
    Up,
    /// Refuses dials and fails reads/writes.
    Down,
    /// Answers with bytes that are not a valid frame.
    Garbage,
}

struct Entry {
    value: Vec<u8>,
    flags: u32,
    cas: u64,
}

#[derive(Default)]
struct Store {
    items: HashMap<Vec<u8>, Entry>,
    next_cas: u64,
}

impl Store {
    fn bump_cas(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }
}

pub struct FakeServer {
    name: String,
    mode: Mutex<Mode>,
    store: Mutex<Store>,
    credentials: Option<(String, String)>,
    sasl: bool,
    log: Mutex<Vec<(u8, u32)>>,
    auth_token: Mutex<Option<Vec<u8>>>,
}

impl FakeServer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, None, true))
    }

    pub fn with_auth(name: &str, username: &str, password: &str) -> Arc<Self> {
        Arc::new(Self::build(
            name,
            Some((username.to_string(), password.to_string())),
            true,
        ))
    }

    pub fn without_sasl(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, None, false))
    }

    fn build(name: &str, credentials: Option<(String, String)>, sasl: bool) -> Self {
        FakeServer {
            name: name.to_string(),
            mode: Mutex::new(Mode::Up),
            store: Mutex::new(Store::default()),
            credentials,
            sasl,
            log: Mutex::new(Vec::new()),
            auth_token: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    /// Opcodes of every request served, in arrival order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.log
            .lock()
            .iter()
            .filter_map(|(op, _)| Opcode::from_u8(*op))
            .collect()
    }

    pub fn opaques(&self) -> Vec<u32> {
        self.log.lock().iter().map(|(_, opaque)| *opaque).collect()
    }

    pub fn last_auth_token(&self) -> Option<Vec<u8>> {
        self.auth_token.lock().clone()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.store.lock().items.contains_key(key)
    }

    fn respond(&self, req: &Message) -> Vec<Message> {
        self.log.lock().push((req.header.opcode, req.header.opaque));

        let Some(op) = req.opcode() else {
            return vec![reply(req, Status::UnknownCommand)];
        };
        let mut store = self.store.lock();
        match op {
            Opcode::Get | Opcode::GetAndTouch => match store.items.get(&req.key) {
                Some(entry) => {
                    let mut resp = reply(req, Status::Success)
                        .with_extras([Extra::U32(entry.flags)])
                        .with_value(entry.value.clone());
                    resp.header.cas = entry.cas;
                    vec![resp]
                }
                None => vec![reply(req, Status::KeyNotFound).with_value("Not found")],
            },
            Opcode::Set | Opcode::Add | Opcode::Replace => {
                let exists = store.items.contains_key(&req.key);
                if op == Opcode::Add && exists {
                    return vec![reply(req, Status::KeyExists)];
                }
                if op == Opcode::Replace && !exists {
                    return vec![reply(req, Status::KeyNotFound)];
                }
                if req.header.cas != 0
                    && store.items.get(&req.key).map(|e| e.cas) != Some(req.header.cas)
                {
                    return vec![reply(req, Status::KeyExists)];
                }
                let flags = req.extra(0).map_or(0, |e| e.as_u64() as u32);
                let cas = store.bump_cas();
                store.items.insert(
                    req.key.clone(),
                    Entry {
                        value: req.value.clone(),
                        flags,
                        cas,
                    },
                );
                vec![reply(req, Status::Success).with_cas(cas)]
            }
            Opcode::Append | Opcode::Prepend => {
                let cas = store.bump_cas();
                match store.items.get_mut(&req.key) {
                    Some(entry) => {
                        if op == Opcode::Append {
                            entry.value.extend_from_slice(&req.value);
                        } else {
                            entry.value.splice(0..0, req.value.iter().copied());
                        }
                        entry.cas = cas;
                        vec![reply(req, Status::Success).with_cas(cas)]
                    }
                    None => vec![reply(req, Status::ItemNotStored)],
                }
            }
            Opcode::Delete => {
                let cas_matches = store
                    .items
                    .get(&req.key)
                    .map(|e| req.header.cas == 0 || e.cas == req.header.cas);
                match cas_matches {
                    Some(true) => {
                        store.items.remove(&req.key);
                        vec![reply(req, Status::Success)]
                    }
                    Some(false) => vec![reply(req, Status::KeyExists)],
                    None => vec![reply(req, Status::KeyNotFound)],
                }
            }
            Opcode::Increment | Opcode::Decrement => {
                let delta = req.extra(0).map_or(0, Extra::as_u64);
                let initial = req.extra(1).map_or(0, Extra::as_u64);
                let cas = store.bump_cas();
                let next = match store.items.get(&req.key) {
                    None => initial,
                    Some(entry) => {
                        let Some(current) = std::str::from_utf8(&entry.value)
                            .ok()
                            .and_then(|text| text.parse::<u64>().ok())
                        else {
                            return vec![reply(req, Status::NonNumericValue)];
                        };
                        if op == Opcode::Increment {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        }
                    }
                };
                store.items.insert(
                    req.key.clone(),
                    Entry {
                        value: next.to_string().into_bytes(),
                        flags: 0,
                        cas,
                    },
                );
                vec![reply(req, Status::Success)
                    .with_cas(cas)
                    .with_value(next.to_be_bytes().to_vec())]
            }
            Opcode::Touch => {
                if store.items.contains_key(&req.key) {
                    vec![reply(req, Status::Success)]
                } else {
                    vec![reply(req, Status::KeyNotFound)]
                }
            }
            Opcode::Flush => {
                store.items.clear();
                vec![reply(req, Status::Success)]
            }
            Opcode::Noop | Opcode::Quit => vec![reply(req, Status::Success)],
            Opcode::Version => vec![reply(req, Status::Success).with_value("1.6.21")],
            Opcode::Stat => {
                let pairs = [("pid", "4242"), ("uptime", "7"), ("name", self.name.as_str())];
                let mut out: Vec<Message> = pairs
                    .iter()
                    .map(|(k, v)| reply(req, Status::Success).with_key(*k).with_value(*v))
                    .collect();
                out.push(reply(req, Status::Success));
                out
            }
            Opcode::AuthList if self.sasl => {
                vec![reply(req, Status::Success).with_value("CRAM-MD5 PLAIN")]
            }
            Opcode::AuthStart if self.sasl => {
                *self.auth_token.lock() = Some(req.value.clone());
                let expected = self.credentials.as_ref().map(|(user, pass)| {
                    let mut token = vec![0u8];
                    token.extend_from_slice(user.as_bytes());
                    token.push(0);
                    token.extend_from_slice(pass.as_bytes());
                    token
                });
                if expected.as_deref() == Some(req.value.as_slice()) {
                    vec![reply(req, Status::Success).with_value("Authenticated")]
                } else {
                    vec![reply(req, Status::AuthError).with_value("Auth failure")]
                }
            }
            _ => vec![reply(req, Status::UnknownCommand)],
        }
    }
}

fn reply(req: &Message, status: Status) -> Message {
    let mut msg = Message::new(Opcode::Noop);
    msg.header.opcode = req.header.opcode;
    msg.header.opaque = req.header.opaque;
    msg.header.status = status.as_u16();
    msg
}

fn request_extras(opcode: u8) -> &'static [Width] {
    match Opcode::from_u8(opcode) {
        Some(Opcode::Set | Opcode::Add | Opcode::Replace) => &[Width::U32, Width::U32],
        Some(Opcode::Increment | Opcode::Decrement) => &[Width::U64, Width::U64, Width::U32],
        Some(Opcode::Touch | Opcode::GetAndTouch | Opcode::Flush) => &[Width::U32],
        _ => &[],
    }
}

/// In-memory stream connected to a `FakeServer`.
pub struct FakeTransport {
    server: Arc<FakeServer>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
}

impl FakeTransport {
    fn check_up(&self) -> io::Result<()> {
        match self.server.mode() {
            Mode::Down => Err(io::Error::new(io::ErrorKind::ConnectionReset, "server down")),
            _ => Ok(()),
        }
    }

    fn process(&mut self) -> io::Result<()> {
        while self.inbound.len() >= HEADER_LEN {
            let header = codec::decode_header(&self.inbound)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            let total = HEADER_LEN + header.body_len as usize;
            if self.inbound.len() < total {
                break;
            }
            let mut req = Message::new(Opcode::Noop).expect_extras(request_extras(header.opcode));
            codec::decode(&mut req, &self.inbound[..HEADER_LEN], &self.inbound[HEADER_LEN..total])
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            self.inbound.drain(..total);

            for mut resp in self.server.respond(&req) {
                let mut out = BytesMut::new();
                codec::encode_response(&mut resp, &mut out)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                self.outbound.extend(out.iter().copied());
            }
        }
        Ok(())
    }
}

impl Read for FakeTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_up()?;
        if self.server.mode() == Mode::Garbage {
            buf.fill(0x42);
            return Ok(buf.len());
        }
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_up()?;
        if self.server.mode() == Mode::Garbage {
            return Ok(buf.len());
        }
        self.inbound.extend_from_slice(buf);
        self.process()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_up()
    }
}

impl Transport for FakeTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        self.inbound.clear();
        self.outbound.clear();
        Ok(())
    }
}

/// Dialer resolving addresses to `FakeServer`s by name.
pub struct FakeDialer {
    servers: HashMap<String, Arc<FakeServer>>,
    dials: Mutex<HashMap<String, usize>>,
}

impl FakeDialer {
    pub fn new(servers: &[Arc<FakeServer>]) -> Self {
        FakeDialer {
            servers: servers
                .iter()
                .map(|server| (server.name().to_string(), server.clone()))
                .collect(),
            dials: Mutex::new(HashMap::new()),
        }
    }

    pub fn dials(&self, address: &str) -> usize {
        self.dials.lock().get(address).copied().unwrap_or(0)
    }
}

impl Dialer for FakeDialer {
    fn dial(&self, server: &ServerAddr, _config: &Config) -> io::Result<Box<dyn Transport>> {
        *self.dials.lock().entry(server.address.clone()).or_insert(0) += 1;
        match self.servers.get(&server.address) {
            Some(fake) if fake.mode() != Mode::Down => Ok(Box::new(FakeTransport {
                server: fake.clone(),
                inbound: Vec::new(),
                outbound: VecDeque::new(),
            })),
            _ => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused connection", server.address),
            )),
        }
    }
}
