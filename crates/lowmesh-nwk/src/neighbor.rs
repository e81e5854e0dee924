//! Neighbor table seam and the fixed-capacity arena implementation.
//!
//! Entries live in numbered slots. Slot numbers double as bit positions in
//! the passive acknowledgement bitmaps, so a table holds at most
//! [`MAX_NEIGHBOR_SLOTS`] entries.

use lowmesh_core::constants::{MAX_LINK_COST, MIN_LINK_COST};
use lowmesh_core::{ExtAddr, ShortAddr};

use crate::error::NeighborError;

pub const MAX_NEIGHBOR_SLOTS: usize = 64;

/// Index of a neighbor entry; stable until the entry is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighborSlot(pub u8);

impl NeighborSlot {
    pub fn bit(self) -> u64 {
        1u64 << self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Parent,
    Child,
    Sibling,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub short: ShortAddr,
    pub ext: Option<ExtAddr>,
    pub relationship: Relationship,
    pub router: bool,
    pub rx_on_when_idle: bool,
    pub depth: u8,
    pub lqi: u8,
    /// The neighbor's own parent, when known.
    pub parent: Option<ShortAddr>,
    pub last_heard: u64,
}

impl Neighbor {
    pub fn new(short: ShortAddr, relationship: Relationship) -> Self {
        Self {
            short,
            ext: None,
            relationship,
            router: false,
            rx_on_when_idle: false,
            depth: 0,
            lqi: 0,
            parent: None,
            last_heard: 0,
        }
    }

    /// A routing-capable neighbor that keeps its receiver on.
    pub fn router(short: ShortAddr, relationship: Relationship, lqi: u8) -> Self {
        Self {
            router: true,
            rx_on_when_idle: true,
            lqi,
            ..Self::new(short, relationship)
        }
    }

    pub fn with_ext(mut self, ext: ExtAddr) -> Self {
        self.ext = Some(ext);
        self
    }

    pub fn with_parent(mut self, parent: ShortAddr) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn link_cost(&self) -> u8 {
        link_cost_from_lqi(self.lqi)
    }

    /// Whether this neighbor rebroadcasts what it hears.
    pub fn relays_broadcasts(&self) -> bool {
        self.router && self.rx_on_when_idle
    }
}

/// Per-hop cost derived from link quality: 1 for a clean link up to 7.
pub fn link_cost_from_lqi(lqi: u8) -> u8 {
    const STEPS: [u8; 6] = [200, 170, 140, 110, 80, 50];
    let worse = STEPS.iter().take_while(|&&threshold| lqi < threshold).count() as u8;
    (MIN_LINK_COST + worse).min(MAX_LINK_COST)
}

/// Short/extended address resolution, next-hop lookup and child bookkeeping.
pub trait NeighborTable {
    fn slots(&self) -> impl Iterator<Item = (NeighborSlot, &Neighbor)>;

    fn get(&self, short: ShortAddr) -> Option<&Neighbor>;

    fn get_mut(&mut self, short: ShortAddr) -> Option<&mut Neighbor>;

    /// Insert or replace the entry for `neighbor.short`.
    fn upsert(&mut self, neighbor: Neighbor) -> Result<NeighborSlot, NeighborError>;

    fn remove(&mut self, short: ShortAddr) -> Option<Neighbor>;

    fn clear(&mut self);

    fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.slots().map(|(_, n)| n)
    }

    fn slot_of(&self, short: ShortAddr) -> Option<NeighborSlot> {
        self.slots().find(|(_, n)| n.short == short).map(|(s, _)| s)
    }

    fn find_ext(&self, ext: ExtAddr) -> Option<&Neighbor> {
        self.iter().find(|n| n.ext == Some(ext))
    }

    fn contains(&self, short: ShortAddr) -> bool {
        self.get(short).is_some()
    }

    fn parent(&self) -> Option<&Neighbor> {
        self.iter().find(|n| n.relationship == Relationship::Parent)
    }

    fn is_child(&self, short: ShortAddr) -> bool {
        self.get(short)
            .is_some_and(|n| n.relationship == Relationship::Child)
    }

    fn children(&self) -> Vec<ShortAddr> {
        self.iter()
            .filter(|n| n.relationship == Relationship::Child)
            .map(|n| n.short)
            .collect()
    }

    /// Known devices whose parent is `parent`.
    fn children_of(&self, parent: ShortAddr) -> Vec<ShortAddr> {
        self.iter()
            .filter(|n| n.parent == Some(parent) && n.relationship != Relationship::Parent)
            .map(|n| n.short)
            .collect()
    }

    /// (router children, end-device children)
    fn child_counts(&self) -> (usize, usize) {
        self.iter()
            .filter(|n| n.relationship == Relationship::Child)
            .fold((0, 0), |(r, e), n| if n.router { (r + 1, e) } else { (r, e + 1) })
    }

    /// Bitmap of slots holding neighbors expected to rebroadcast.
    fn relay_slots(&self) -> u64 {
        self.slots()
            .filter(|(_, n)| n.relays_broadcasts())
            .fold(0, |acc, (slot, _)| acc | slot.bit())
    }

    fn link_cost(&self, short: ShortAddr) -> Option<u8> {
        self.get(short).map(Neighbor::link_cost)
    }

    /// Refresh link quality for a neighbor we just heard. Returns false if unknown.
    fn heard(&mut self, short: ShortAddr, lqi: u8, now: u64) -> bool {
        match self.get_mut(short) {
            Some(n) => {
                n.lqi = lqi;
                n.last_heard = now;
                true
            }
            None => false,
        }
    }
}

/// Fixed-capacity neighbor table.
#[derive(Debug, Clone)]
pub struct NeighborArena {
    slots: Vec<Option<Neighbor>>,
}

impl NeighborArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.min(MAX_NEIGHBOR_SLOTS)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, short: ShortAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|n| n.short == short))
    }

    /// Least recently heard entry that is neither parent nor child.
    fn replaceable(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|n| (i, n)))
            .filter(|(_, n)| {
                matches!(n.relationship, Relationship::Sibling | Relationship::Unknown)
            })
            .min_by_key(|(_, n)| n.last_heard)
            .map(|(i, _)| i)
    }
}

impl Default for NeighborArena {
    fn default() -> Self {
        Self::new(32)
    }
}

impl NeighborTable for NeighborArena {
    fn slots(&self) -> impl Iterator<Item = (NeighborSlot, &Neighbor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|n| (NeighborSlot(i as u8), n)))
    }

    fn get(&self, short: ShortAddr) -> Option<&Neighbor> {
        self.slots.iter().flatten().find(|n| n.short == short)
    }

    fn get_mut(&mut self, short: ShortAddr) -> Option<&mut Neighbor> {
        self.slots.iter_mut().flatten().find(|n| n.short == short)
    }

    fn upsert(&mut self, neighbor: Neighbor) -> Result<NeighborSlot, NeighborError> {
        let by_ext = neighbor.ext.and_then(|ext| {
            self.slots
                .iter()
                .position(|s| s.as_ref().is_some_and(|n| n.ext == Some(ext)))
        });
        let index = self
            .position(neighbor.short)
            .or(by_ext)
            .or_else(|| self.slots.iter().position(Option::is_none))
            .or_else(|| self.replaceable())
            .ok_or(NeighborError::TableFull)?;
        self.slots[index] = Some(neighbor);
        Ok(NeighborSlot(index as u8))
    }

    fn remove(&mut self, short: ShortAddr) -> Option<Neighbor> {
        let index = self.position(short)?;
        self.slots[index].take()
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(short: u16, router: bool) -> Neighbor {
        Neighbor {
            router,
            rx_on_when_idle: router,
            ..Neighbor::new(ShortAddr(short), Relationship::Child)
        }
        .with_parent(ShortAddr(0))
    }

    #[test]
    fn test_link_cost_bounds() {
        assert_eq!(link_cost_from_lqi(255), 1);
        assert_eq!(link_cost_from_lqi(200), 1);
        assert_eq!(link_cost_from_lqi(199), 2);
        assert_eq!(link_cost_from_lqi(120), 4);
        assert_eq!(link_cost_from_lqi(50), 6);
        assert_eq!(link_cost_from_lqi(0), 7);
    }

    #[test]
    fn test_upsert_reuses_slot() {
        let mut table = NeighborArena::new(4);
        let a = table.upsert(child(0x0010, true)).unwrap();
        let b = table.upsert(child(0x0020, false)).unwrap();
        assert_ne!(a, b);
        let again = table
            .upsert(Neighbor::router(ShortAddr(0x0010), Relationship::Sibling, 90))
            .unwrap();
        assert_eq!(again, a);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(ShortAddr(0x0010)).unwrap().relationship,
            Relationship::Sibling
        );
    }

    #[test]
    fn test_upsert_follows_address_change() {
        let mut table = NeighborArena::new(4);
        let slot = table
            .upsert(child(0x0010, true).with_ext(ExtAddr(0xAA)))
            .unwrap();
        let moved = table
            .upsert(child(0x0099, true).with_ext(ExtAddr(0xAA)))
            .unwrap();
        assert_eq!(slot, moved);
        assert!(!table.contains(ShortAddr(0x0010)));
        assert_eq!(table.find_ext(ExtAddr(0xAA)).unwrap().short, ShortAddr(0x0099));
    }

    #[test]
    fn test_full_table_replaces_stale_unknown() {
        let mut table = NeighborArena::new(2);
        table.upsert(child(1, true)).unwrap();
        let mut stale = Neighbor::new(ShortAddr(2), Relationship::Unknown);
        stale.last_heard = 5;
        table.upsert(stale).unwrap();

        table.upsert(Neighbor::new(ShortAddr(3), Relationship::Unknown)).unwrap();
        assert!(!table.contains(ShortAddr(2)));

        // Only a child is left that could be displaced: refuse.
        let mut full = NeighborArena::new(1);
        full.upsert(child(1, true)).unwrap();
        assert_eq!(
            full.upsert(Neighbor::new(ShortAddr(9), Relationship::Unknown)),
            Err(NeighborError::TableFull)
        );
    }

    #[test]
    fn test_children_and_grandchildren() {
        let mut table = NeighborArena::new(8);
        table.upsert(child(0x0010, true)).unwrap();
        table.upsert(child(0x0020, false)).unwrap();
        table
            .upsert(Neighbor::new(ShortAddr(0x0101), Relationship::Unknown).with_parent(ShortAddr(0x0010)))
            .unwrap();
        table
            .upsert(Neighbor::router(ShortAddr(0), Relationship::Parent, 255))
            .unwrap();

        assert_eq!(table.children(), vec![ShortAddr(0x0010), ShortAddr(0x0020)]);
        assert_eq!(table.children_of(ShortAddr(0x0010)), vec![ShortAddr(0x0101)]);
        assert_eq!(table.child_counts(), (1, 1));
        assert_eq!(table.parent().unwrap().short, ShortAddr(0));
    }

    #[test]
    fn test_relay_slots_bitmap() {
        let mut table = NeighborArena::new(8);
        let r = table.upsert(child(0x0010, true)).unwrap();
        table.upsert(child(0x0020, false)).unwrap();
        let p = table
            .upsert(Neighbor::router(ShortAddr(0), Relationship::Parent, 255))
            .unwrap();
        assert_eq!(table.relay_slots(), r.bit() | p.bit());
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(NeighborArena::new(500).capacity(), MAX_NEIGHBOR_SLOTS);
    }

    #[test]
    fn test_heard_updates_link() {
        let mut table = NeighborArena::new(2);
        table.upsert(child(0x0010, true)).unwrap();
        assert!(table.heard(ShortAddr(0x0010), 120, 42));
        assert_eq!(table.link_cost(ShortAddr(0x0010)), Some(4));
        assert!(!table.heard(ShortAddr(0x0011), 120, 42));
    }
}
