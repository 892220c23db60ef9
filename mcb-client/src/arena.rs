//! # Buffer Arena
//!
//! Purpose: Bound allocation for response bodies by recycling fixed-capacity
//! buffers grouped into three size classes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Each class keeps a bounded free list.
//! 2. **RAII Release**: `ArenaBuf` returns its buffer on drop, so every exit
//!    path of a receive call releases it exactly once.
//! 3. **Minimal Locking**: The class mutex is held only to push or pop.
//!
//! ## Size Classes
//!
//! ```text
//! size <= 256     -> small  (256B buffers)
//! size <= 4096    -> medium (4KB buffers)
//! size <= 65536   -> large  (64KB buffers)
//! size >  65536   -> one-off allocation, never pooled
//! ```

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Capacity of the small class.
pub const SMALL_CLASS: usize = 256;
/// Capacity of the medium class.
pub const MEDIUM_CLASS: usize = 4096;
/// Capacity of the large class.
pub const LARGE_CLASS: usize = 65536;

const CLASS_CAPACITIES: [usize; 3] = [SMALL_CLASS, MEDIUM_CLASS, LARGE_CLASS];

/// Free buffers retained per class.
pub const DEFAULT_MAX_FREE: usize = 64;

struct SizeClass {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// Size-classed pool of reusable byte buffers.
///
/// Safe to share between sessions; acquire and release only touch the
/// mutex of the class involved.
pub struct BufferArena {
    classes: [SizeClass; 3],
    max_free: usize,
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferArena {
    pub fn new() -> Self {
        Self::with_max_free(DEFAULT_MAX_FREE)
    }

    /// Creates an arena keeping at most `max_free` idle buffers per class.
    pub fn with_max_free(max_free: usize) -> Self {
        BufferArena {
            classes: CLASS_CAPACITIES.map(|capacity| SizeClass {
                capacity,
                free: Mutex::new(Vec::new()),
            }),
            max_free,
        }
    }

    /// Returns a buffer whose visible length is exactly `size`.
    pub fn acquire(&self, size: usize) -> ArenaBuf<'_> {
        match class_index(size) {
            Some(idx) => {
                let class = &self.classes[idx];
                let buf = class
                    .free
                    .lock()
                    .pop()
                    .unwrap_or_else(|| vec![0u8; class.capacity]);
                ArenaBuf {
                    arena: self,
                    buf,
                    len: size,
                }
            }
            None => ArenaBuf {
                arena: self,
                buf: vec![0u8; size],
                len: size,
            },
        }
    }

    /// Returns a buffer to the class matching its capacity.
    ///
    /// Buffers whose capacity matches no class are dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        let Some(class) = self.classes.iter().find(|c| c.capacity == buf.capacity()) else {
            return;
        };
        // Pooled buffers always keep their full length so acquire can slice.
        buf.resize(class.capacity, 0);
        let mut free = class.free.lock();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }

    /// Idle buffers currently held for the class serving `size`.
    pub fn idle(&self, size: usize) -> usize {
        class_index(size).map_or(0, |idx| self.classes[idx].free.lock().len())
    }
}

#[inline]
fn class_index(size: usize) -> Option<usize> {
    CLASS_CAPACITIES.iter().position(|&capacity| size <= capacity)
}

/// Buffer borrowed from a `BufferArena` for the duration of one receive.
pub struct ArenaBuf<'a> {
    arena: &'a BufferArena,
    buf: Vec<u8>,
    len: usize,
}

impl ArenaBuf<'_> {
    /// Capacity of the underlying allocation.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl Deref for ArenaBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for ArenaBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for ArenaBuf<'_> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.arena.release(buf);
    }
}
