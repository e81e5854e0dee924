//! Broadcast transaction table.
//!
//! Remembers the `(source, sequence)` pair of every broadcast seen recently
//! so a flood is indicated and relayed at most once per device. Entries age
//! out after a fixed expiry; when the table is full the oldest is dropped.

use std::collections::VecDeque;

use lowmesh_core::ShortAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transaction {
    source: ShortAddr,
    seq: u8,
    expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct BroadcastTable {
    capacity: usize,
    expiry_ms: u64,
    entries: VecDeque<Transaction>,
}

impl BroadcastTable {
    pub fn new(capacity: usize, expiry_ms: u64) -> Self {
        Self {
            capacity,
            expiry_ms,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Check if a live entry exists for this broadcast.
    pub fn contains(&self, source: ShortAddr, seq: u8) -> bool {
        self.entries.iter().any(|t| t.source == source && t.seq == seq)
    }

    /// Record a broadcast and return `true` if it was new (not a duplicate).
    pub fn insert(&mut self, source: ShortAddr, seq: u8, now: u64) -> bool {
        self.cull(now);
        if self.contains(source, seq) {
            return false;
        }
        if self.capacity == 0 {
            return true;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Transaction {
            source,
            seq,
            expires_at: now.saturating_add(self.expiry_ms),
        });
        true
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn cull(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|t| t.expires_at > now);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
