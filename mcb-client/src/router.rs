//! # Key Routing
//!
//! Purpose: Map a key to one server out of the current live set.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Router` keeps the cluster agnostic of the hashing
//!    scheme; `update` rebuilds state, `route` stays allocation-free.
//! 2. **Pure Lookups**: `route` depends only on the key and the last server
//!    list passed to `update`.
//!
//! ## Notes
//! - `ModuloRouter` reassigns most keys whenever the live set changes. It is
//!   kept as the default for compatibility with other memcached clients;
//!   `RingRouter` only moves the keys owned by the server that changed.

use crate::config::{HasherKind, ServerAddr};

/// Virtual points per server on the ring.
pub const RING_POINTS_PER_SERVER: usize = 160;

/// Routing strategy over the live server list.
pub trait Router: Send + Sync {
    /// Rebuilds routing state for `servers`, in live-list order.
    fn update(&mut self, servers: &[ServerAddr]);

    /// Index into the last `servers` slice, or `None` when it was empty.
    fn route(&self, key: &[u8]) -> Option<usize>;
}

/// Builds the router selected in the configuration.
pub fn build_router(kind: HasherKind) -> Box<dyn Router> {
    match kind {
        HasherKind::Modulo => Box::new(ModuloRouter::default()),
        HasherKind::Ring => Box::new(RingRouter::default()),
    }
}

#[inline]
fn hash_key(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// `crc32(key) mod server_count`.
#[derive(Debug, Default, Clone)]
pub struct ModuloRouter {
    count: usize,
}

impl Router for ModuloRouter {
    fn update(&mut self, servers: &[ServerAddr]) {
        self.count = servers.len();
    }

    fn route(&self, key: &[u8]) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        Some(hash_key(key) as usize % self.count)
    }
}

/// Consistent-hash ring with virtual points.
#[derive(Debug, Default, Clone)]
pub struct RingRouter {
    // Sorted by point; ties broken by server index.
    points: Vec<(u32, usize)>,
}

impl Router for RingRouter {
    fn update(&mut self, servers: &[ServerAddr]) {
        self.points.clear();
        self.points.reserve(servers.len() * RING_POINTS_PER_SERVER);
        for (idx, server) in servers.iter().enumerate() {
            for vnode in 0..RING_POINTS_PER_SERVER {
                let label = format!("{}-{}", server.address, vnode);
                self.points.push((hash_key(label.as_bytes()), idx));
            }
        }
        self.points.sort_unstable();
    }

    fn route(&self, key: &[u8]) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_key(key);
        let pos = self.points.partition_point(|(point, _)| *point < hash);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(idx)
    }
}
