//! # Cluster Coordinator
//!
//! Purpose: Own one session per configured server, route each request to a
//! live server and fail over to another one when the chosen server is
//! unreachable.
//!
//! ## Design Principles
//! 1. **Split Locks**: Liveness and routing state sit behind one `RwLock`;
//!    each session has its own `Mutex`. The two are never held together.
//! 2. **Replayable Requests**: A snapshot is taken before the first attempt
//!    and restored before every retry.
//! 3. **Network-Only Failover**: Server status errors are answers, not
//!    failures; only network and protocol errors trigger a retry.
//! 4. **Optimistic Recovery**: A down server rejoins the live set once its
//!    retry delay has passed; the next lazy connect decides whether it stays.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use mcb_common::{Message, Opcode};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::arena::BufferArena;
use crate::config::{Config, ServerAddr};
use crate::error::{ClientError, ClientResult};
use crate::router::{build_router, Router};
use crate::session::{Session, Stats};
use crate::transport::Dialer;

struct ServerEntry {
    addr: ServerAddr,
    session: Mutex<Session>,
}

struct Topology {
    /// Indices into `Cluster::servers`, in configuration order.
    live: Vec<usize>,
    down_until: Vec<Option<Instant>>,
    router: Box<dyn Router>,
}

impl Topology {
    fn rebuild(&mut self, servers: &[ServerEntry]) {
        self.live = (0..servers.len())
            .filter(|&idx| self.down_until[idx].is_none())
            .collect();
        let addrs: Vec<ServerAddr> = self
            .live
            .iter()
            .map(|&idx| servers[idx].addr.clone())
            .collect();
        self.router.update(&addrs);
    }

    fn has_expired(&self, now: Instant) -> bool {
        self.down_until
            .iter()
            .any(|until| matches!(until, Some(at) if *at <= now))
    }

    fn pick(&self, key: &[u8]) -> Option<usize> {
        self.router
            .route(key)
            .and_then(|pos| self.live.get(pos).copied())
    }
}

/// Set of servers plus the routing and failover policy over them.
pub struct Cluster {
    config: Arc<Config>,
    servers: Vec<ServerEntry>,
    topology: RwLock<Topology>,
}

impl Cluster {
    /// Builds a cluster using the router named in `config.hasher`.
    pub fn new(config: Config, dialer: Arc<dyn Dialer>) -> ClientResult<Self> {
        let router = build_router(config.hasher);
        Self::with_router(config, dialer, router)
    }

    /// Builds a cluster with a caller-supplied routing strategy.
    pub fn with_router(
        config: Config,
        dialer: Arc<dyn Dialer>,
        router: Box<dyn Router>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let arena = Arc::new(BufferArena::new());

        let servers: Vec<ServerEntry> = config
            .servers
            .iter()
            .map(|addr| ServerEntry {
                addr: addr.clone(),
                session: Mutex::new(Session::new(
                    addr.clone(),
                    Arc::clone(&config),
                    Arc::clone(&dialer),
                    Arc::clone(&arena),
                )),
            })
            .collect();

        let mut topology = Topology {
            live: Vec::new(),
            down_until: vec![None; servers.len()],
            router,
        };
        topology.rebuild(&servers);

        Ok(Cluster {
            config,
            servers,
            topology: RwLock::new(topology),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All configured servers, live or not.
    pub fn servers(&self) -> impl Iterator<Item = &ServerAddr> {
        self.servers.iter().map(|entry| &entry.addr)
    }

    /// Servers currently eligible for routing.
    pub fn live_servers(&self) -> Vec<ServerAddr> {
        let topology = self.topology.read();
        topology
            .live
            .iter()
            .map(|&idx| self.servers[idx].addr.clone())
            .collect()
    }

    /// Sends `msg` to the server owning `key`, failing over on network errors.
    ///
    /// On success `msg` holds the response. At most one attempt is made per
    /// server that was live when the call started.
    pub fn dispatch(&self, key: &[u8], msg: &mut Message) -> ClientResult<()> {
        self.revive_expired();

        let snapshot = msg.snapshot();
        let attempts = self.topology.read().live.len().max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            let Some(idx) = self.topology.read().pick(key) else {
                break;
            };
            if attempt > 0 {
                msg.restore(&snapshot);
            }

            let entry = &self.servers[idx];
            let result = entry.session.lock().perform(msg);
            match result {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(server = %entry.addr, attempt, "request served after failover");
                    }
                    return Ok(());
                }
                Err(err) if err.is_network() && self.config.failover => {
                    warn!(server = %entry.addr, attempt, error = %err, "request failed, failing over");
                    self.mark_down(idx);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or(ClientError::NoServers))
    }

    /// Collects stats from every server, keyed by server address.
    pub fn stats(&self, key: Option<&[u8]>) -> ClientResult<HashMap<String, Stats>> {
        let results = self.for_each_server(|session| {
            let mut msg = Message::new(Opcode::Stat);
            if let Some(key) = key {
                msg.key = key.to_vec();
            }
            session.perform_stats(&mut msg)
        })?;
        Ok(results
            .into_iter()
            .map(|(addr, stats)| (addr.address, stats))
            .collect())
    }

    /// Sends a copy of `template` to every server and returns the responses.
    pub fn broadcast(&self, template: &Message) -> ClientResult<Vec<(ServerAddr, Message)>> {
        self.for_each_server(|session| {
            let mut msg = template.clone();
            session.perform(&mut msg).map(|()| msg)
        })
    }

    /// Sends quit to every connected server and closes all sessions.
    pub fn quit(&self) {
        for entry in &self.servers {
            entry.session.lock().quit();
        }
    }

    // Servers that fail are skipped; only when none answers is the last
    // error returned.
    fn for_each_server<T>(
        &self,
        mut op: impl FnMut(&mut Session) -> ClientResult<T>,
    ) -> ClientResult<Vec<(ServerAddr, T)>> {
        let mut out = Vec::with_capacity(self.servers.len());
        let mut last_err = None;

        for (idx, entry) in self.servers.iter().enumerate() {
            let result = op(&mut entry.session.lock());
            match result {
                Ok(value) => {
                    self.mark_up(idx);
                    out.push((entry.addr.clone(), value));
                }
                Err(err) => {
                    warn!(server = %entry.addr, error = %err, "server skipped");
                    if err.is_network() {
                        self.mark_down(idx);
                    }
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) if out.is_empty() => Err(err),
            _ => Ok(out),
        }
    }

    fn mark_down(&self, idx: usize) {
        if !self.config.failover {
            return;
        }
        let mut topology = self.topology.write();
        if topology.down_until[idx].is_some() {
            return;
        }
        topology.down_until[idx] = Some(Instant::now() + self.config.down_retry_delay);
        topology.rebuild(&self.servers);
        warn!(
            server = %self.servers[idx].addr,
            retry_in = ?self.config.down_retry_delay,
            live = topology.live.len(),
            "server marked down"
        );
    }

    fn mark_up(&self, idx: usize) {
        if self.topology.read().down_until[idx].is_none() {
            return;
        }
        let mut topology = self.topology.write();
        if topology.down_until[idx].take().is_some() {
            topology.rebuild(&self.servers);
            info!(server = %self.servers[idx].addr, "server answered, marked live");
        }
    }

    fn revive_expired(&self) {
        let now = Instant::now();
        if !self.topology.read().has_expired(now) {
            return;
        }
        let mut topology = self.topology.write();
        let mut revived = false;
        for idx in 0..self.servers.len() {
            if matches!(topology.down_until[idx], Some(at) if at <= now) {
                topology.down_until[idx] = None;
                revived = true;
                info!(server = %self.servers[idx].addr, "retry delay elapsed, server eligible again");
            }
        }
        if revived {
            topology.rebuild(&self.servers);
        }
    }
}
