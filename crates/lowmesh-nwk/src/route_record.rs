//! Route records and the source-route cache they feed.
//!
//! A device sending toward a concentrator follows its frame with a route
//! record command. Every relay on the way appends its own short address;
//! once the list is full the record is still forwarded, flagged truncated.
//! The concentrator delivers the finished list upward and, unless
//! truncated, caches it as a source route back to the sender.

use std::collections::{HashMap, VecDeque};

use lowmesh_core::{Command, RouteRecord, ShortAddr, SourceRoute};
use tracing::{debug, trace};

use crate::action::{Action, NwkEvent};
use crate::nib::Nib;
use crate::outbox::{command_frame, transmit};
use crate::transport::{DelayClass, LinkAddr, TxHandle, TxKind};

/// Relay list after this device has handled it.
pub fn append_relay(mut record: RouteRecord, me: ShortAddr, max_relays: usize) -> RouteRecord {
    if record.relays.len() >= max_relays {
        record.truncated = true;
    } else {
        record.relays.push(me);
    }
    record
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRecord {
    handle: TxHandle,
    destination: ShortAddr,
}

#[derive(Debug, Clone)]
pub struct RouteRecorder {
    pending: VecDeque<PendingRecord>,
    max_relays: usize,
}

impl RouteRecorder {
    pub fn new(max_relays: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_relays,
        }
    }

    pub fn max_relays(&self) -> usize {
        self.max_relays
    }

    /// Queue an empty route record toward `destination` via `next_hop`.
    pub fn originate(
        &mut self,
        destination: ShortAddr,
        next_hop: ShortAddr,
        radius: u8,
        nib: &mut Nib,
    ) -> Action {
        let frame = command_frame(
            nib,
            destination,
            radius,
            Command::RouteRecord(RouteRecord::default()),
        );
        let (handle, action) = transmit(
            nib,
            LinkAddr::Short(next_hop),
            frame,
            TxKind::RouteRecord { destination },
            DelayClass::UnicastCommand,
        );
        trace!(%handle, dst = %destination, "route record queued");
        self.pending.push_back(PendingRecord {
            handle,
            destination,
        });
        action
    }

    /// Drop the pending record matching `handle`. Unknown handles are ignored.
    pub fn on_confirm(&mut self, handle: TxHandle) -> bool {
        match self.pending.iter().position(|p| p.handle == handle) {
            Some(i) => {
                self.pending.remove(i);
                true
            }
            None => false,
        }
    }

    /// A record addressed to us arrived: report it and cache the route back.
    pub fn deliver(
        &self,
        source: ShortAddr,
        record: RouteRecord,
        cache: &mut SourceRouteCache,
        now: u64,
    ) -> Action {
        debug!(src = %source, relays = record.relays.len(), truncated = record.truncated, "route record delivered");
        if !record.truncated {
            cache.insert(source, record.relays.clone(), now);
        }
        Action::Notify(NwkEvent::RouteRecordDelivered {
            source,
            relays: record.relays,
            truncated: record.truncated,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// No record transmissions outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedRoute {
    /// Relays as recorded, nearest the recorded source first.
    relays: Vec<ShortAddr>,
    updated_at: u64,
}

/// Source routes learned from route records, keyed by destination.
#[derive(Debug, Clone)]
pub struct SourceRouteCache {
    entries: HashMap<ShortAddr, CachedRoute>,
    capacity: usize,
}

impl SourceRouteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, destination: ShortAddr, relays: Vec<ShortAddr>, now: u64) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&destination) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, r)| r.updated_at)
                .map(|(d, _)| *d)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            destination,
            CachedRoute {
                relays,
                updated_at: now,
            },
        );
    }

    /// Recorded relay list for `destination`.
    pub fn relays(&self, destination: ShortAddr) -> Option<&[ShortAddr]> {
        self.entries.get(&destination).map(|r| r.relays.as_slice())
    }

    /// Source-route subframe from this device to `destination`, or `None`
    /// when unknown or when the destination is a direct neighbor.
    pub fn source_route(&self, destination: ShortAddr) -> Option<SourceRoute> {
        let cached = self.entries.get(&destination)?;
        if cached.relays.is_empty() {
            return None;
        }
        let outbound: Vec<ShortAddr> = cached.relays.iter().rev().copied().collect();
        Some(SourceRoute::new(outbound))
    }

    pub fn remove(&mut self, destination: ShortAddr) -> bool {
        self.entries.remove(&destination).is_some()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nib::DeviceRole;
    use lowmesh_core::ExtAddr;

    fn addrs(v: &[u16]) -> Vec<ShortAddr> {
        v.iter().copied().map(ShortAddr).collect()
    }

    #[test]
    fn test_append_until_full_then_truncate() {
        let record = RouteRecord::default();
        let record = append_relay(record, ShortAddr(1), 2);
        let record = append_relay(record, ShortAddr(2), 2);
        assert!(!record.truncated);
        let record = append_relay(record, ShortAddr(3), 2);
        assert!(record.truncated);
        assert_eq!(record.relays, addrs(&[1, 2]));
    }

    #[test]
    fn test_truncated_record_delivered_not_cached() {
        let recorder = RouteRecorder::new(3);
        let mut cache = SourceRouteCache::new(4);
        let record = append_relay(
            RouteRecord {
                truncated: false,
                relays: addrs(&[1, 2, 3]),
            },
            ShortAddr(4),
            recorder.max_relays(),
        );
        let action = recorder.deliver(ShortAddr(0x0042), record, &mut cache, 0);
        assert_eq!(
            action,
            Action::Notify(NwkEvent::RouteRecordDelivered {
                source: ShortAddr(0x0042),
                relays: addrs(&[1, 2, 3]),
                truncated: true,
            })
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delivery_fills_source_route_cache() {
        let recorder = RouteRecorder::new(8);
        let mut cache = SourceRouteCache::new(4);
        let record = RouteRecord {
            truncated: false,
            relays: addrs(&[0x11, 0x22]),
        };
        recorder.deliver(ShortAddr(0x0042), record, &mut cache, 0);
        assert_eq!(cache.relays(ShortAddr(0x0042)), Some(addrs(&[0x11, 0x22]).as_slice()));

        let route = cache.source_route(ShortAddr(0x0042)).unwrap();
        assert_eq!(route.relays, addrs(&[0x22, 0x11]));
        assert_eq!(route.current_relay(), Some(ShortAddr(0x22)));
    }

    #[test]
    fn test_pending_until_confirmed() {
        let mut nib = Nib::new(ExtAddr(1), DeviceRole::Router);
        nib.short_addr = ShortAddr(0x0042);
        let mut recorder = RouteRecorder::new(8);
        assert!(recorder.is_idle());

        let action = recorder.originate(ShortAddr(0), ShortAddr(0x0011), 30, &mut nib);
        let Action::Transmit { handle, frame, .. } = action else {
            panic!("expected transmit");
        };
        assert_eq!(frame.next_hop, LinkAddr::Short(ShortAddr(0x0011)));
        assert_eq!(frame.frame.header.dst, ShortAddr(0));
        assert!(!recorder.is_idle());

        assert!(!recorder.on_confirm(TxHandle(9999)));
        assert!(recorder.on_confirm(handle));
        assert!(recorder.is_idle());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = SourceRouteCache::new(2);
        cache.insert(ShortAddr(1), addrs(&[5]), 10);
        cache.insert(ShortAddr(2), addrs(&[5]), 20);
        cache.insert(ShortAddr(3), addrs(&[5]), 30);
        assert_eq!(cache.len(), 2);
        assert!(cache.relays(ShortAddr(1)).is_none());
        // direct neighbor: nothing to source-route
        cache.insert(ShortAddr(4), Vec::new(), 40);
        assert!(cache.source_route(ShortAddr(4)).is_none());
    }
}
