//! Bounded route discovery table.
//!
//! Keyed by (initiator, route request id). Holds at most one entry per key;
//! a full table may replace a live entry according to [`EvictionPolicy`].

use lowmesh_core::{ManyToOne, ShortAddr};
use tracing::trace;

use crate::config::EvictionPolicy;
use crate::error::DiscoveryError;

/// What a route request is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryTarget {
    Device(ShortAddr),
    /// Many-to-one advertisement: the initiator is the collection point.
    Concentrator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEntry {
    pub initiator: ShortAddr,
    pub id: u8,
    /// Previous hop toward the initiator.
    pub sender: ShortAddr,
    pub forward_cost: u8,
    pub residual_cost: u8,
    pub many_to_one: ManyToOne,
    pub target: DiscoveryTarget,
    pub created_at: u64,
    pub expires_at: u64,
}

impl DiscoveryEntry {
    pub fn key(&self) -> (ShortAddr, u8) {
        (self.initiator, self.id)
    }

    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryTable {
    slots: Vec<Option<DiscoveryEntry>>,
    policy: EvictionPolicy,
}

impl DiscoveryTable {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            slots: vec![None; capacity],
            policy,
        }
    }

    fn position(&self, initiator: ShortAddr, id: u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|e| e.key() == (initiator, id)))
    }

    #[must_use]
    pub fn get(&self, initiator: ShortAddr, id: u8) -> Option<&DiscoveryEntry> {
        self.position(initiator, id)
            .and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, initiator: ShortAddr, id: u8) -> Option<&mut DiscoveryEntry> {
        let index = self.position(initiator, id)?;
        self.slots[index].as_mut()
    }

    /// Store `entry`, replacing any entry with the same key.
    ///
    /// Free slots are used first, then slots holding expired entries, then
    /// the eviction policy. Returns the entry that had to make room, if any.
    pub fn insert(
        &mut self,
        entry: DiscoveryEntry,
        now: u64,
    ) -> Result<Option<DiscoveryEntry>, DiscoveryError> {
        let index = self
            .position(entry.initiator, entry.id)
            .or_else(|| self.slots.iter().position(Option::is_none))
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|s| s.as_ref().is_some_and(|e| e.is_expired(now)))
            })
            .or_else(|| self.victim())
            .ok_or(DiscoveryError::OutOfMemory)?;

        let key = entry.key();
        let displaced = self.slots[index].replace(entry).filter(|old| old.key() != key);
        if let Some(old) = &displaced {
            trace!(initiator = %old.initiator, id = old.id, "discovery entry replaced");
        }
        Ok(displaced)
    }

    fn victim(&self) -> Option<usize> {
        let live = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)));
        match self.policy {
            EvictionPolicy::None => None,
            EvictionPolicy::OldestFirst => live.min_by_key(|(_, e)| e.created_at).map(|(i, _)| i),
            EvictionPolicy::HighestCostFirst => live
                .max_by(|(_, a), (_, b)| {
                    a.forward_cost
                        .cmp(&b.forward_cost)
                        .then(b.created_at.cmp(&a.created_at))
                })
                .map(|(i, _)| i),
        }
    }

    pub fn remove(&mut self, initiator: ShortAddr, id: u8) -> Option<DiscoveryEntry> {
        let index = self.position(initiator, id)?;
        self.slots[index].take()
    }

    /// Remove expired entries and return them.
    pub fn cull(&mut self, now: u64) -> Vec<DiscoveryEntry> {
        self.slots
            .iter_mut()
            .filter(|s| s.as_ref().is_some_and(|e| e.is_expired(now)))
            .filter_map(Option::take)
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryEntry> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
