//! Route table: next hop per destination.

use std::collections::HashMap;

use lowmesh_core::ShortAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Active,
    DiscoveryUnderway,
    /// Learned from a many-to-one advertisement and not used yet.
    ValidationUnderway,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: ShortAddr,
    pub next_hop: ShortAddr,
    pub status: RouteStatus,
    pub cost: u8,
    pub many_to_one: bool,
    /// The concentrator keeps no source-route cache; a route record must
    /// precede every frame.
    pub no_route_cache: bool,
    pub route_record_required: bool,
    pub updated_at: u64,
}

impl RouteEntry {
    pub fn active(destination: ShortAddr, next_hop: ShortAddr, cost: u8, now: u64) -> Self {
        Self {
            destination,
            next_hop,
            status: RouteStatus::Active,
            cost,
            many_to_one: false,
            no_route_cache: false,
            route_record_required: false,
            updated_at: now,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            RouteStatus::Active | RouteStatus::ValidationUnderway
        )
    }
}

/// Bounded route table. When full, the least recently updated entry that
/// is not waiting on a discovery makes room.
#[must_use]
pub struct RouteTable {
    entries: HashMap<ShortAddr, RouteEntry>,
    capacity: usize,
    expiry_ms: u64,
}

impl RouteTable {
    pub fn new(capacity: usize, expiry_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            expiry_ms,
        }
    }

    #[must_use]
    pub fn get(&self, destination: ShortAddr) -> Option<&RouteEntry> {
        self.entries.get(&destination)
    }

    pub fn get_mut(&mut self, destination: ShortAddr) -> Option<&mut RouteEntry> {
        self.entries.get_mut(&destination)
    }

    /// Next hop toward `destination` over a usable route.
    #[must_use]
    pub fn next_hop(&self, destination: ShortAddr) -> Option<ShortAddr> {
        self.entries
            .get(&destination)
            .filter(|e| e.is_usable())
            .map(|e| e.next_hop)
    }

    /// Insert or replace. Returns false if the table is full of pending
    /// discoveries and nothing could be displaced.
    pub fn upsert(&mut self, entry: RouteEntry) -> bool {
        if !self.entries.contains_key(&entry.destination) && self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .values()
                .filter(|e| e.status != RouteStatus::DiscoveryUnderway)
                .min_by_key(|e| e.updated_at)
                .map(|e| e.destination);
            match victim {
                Some(dest) => {
                    self.entries.remove(&dest);
                }
                None => return false,
            }
        }
        self.entries.insert(entry.destination, entry);
        true
    }

    /// Record that a discovery for `destination` is running, unless a usable
    /// route already exists.
    pub fn mark_discovery(&mut self, destination: ShortAddr, now: u64) -> bool {
        if self.next_hop(destination).is_some() {
            return true;
        }
        self.upsert(RouteEntry {
            status: RouteStatus::DiscoveryUnderway,
            cost: u8::MAX,
            ..RouteEntry::active(destination, ShortAddr::UNASSIGNED, 0, now)
        })
    }

    pub fn is_discovering(&self, destination: ShortAddr) -> bool {
        self.entries
            .get(&destination)
            .is_some_and(|e| e.status == RouteStatus::DiscoveryUnderway)
    }

    pub fn remove(&mut self, destination: ShortAddr) -> Option<RouteEntry> {
        self.entries.remove(&destination)
    }

    /// Drop every route whose next hop is `neighbor`. Returns the affected destinations.
    pub fn remove_via(&mut self, neighbor: ShortAddr) -> Vec<ShortAddr> {
        let gone: Vec<ShortAddr> = self
            .entries
            .values()
            .filter(|e| e.next_hop == neighbor || e.destination == neighbor)
            .map(|e| e.destination)
            .collect();
        for dest in &gone {
            self.entries.remove(dest);
        }
        gone
    }

    /// Cull routes not refreshed within the expiry. Pending discoveries are
    /// left to the discovery table.
    pub fn cull(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        let expiry = self.expiry_ms;
        self.entries.retain(|_, e| {
            e.status == RouteStatus::DiscoveryUnderway || now <= e.updated_at + expiry
        });
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
