//! Route request and route reply processing.
//!
//! Mesh discovery floods a route request, keeps one discovery entry per
//! (initiator, id) holding the cheapest reverse hop seen so far, and sends
//! the reply back hop by hop along those reverse hops. Many-to-one requests
//! advertise a concentrator: every router installs a route toward it and
//! keeps flooding, and nobody replies.

use lowmesh_core::constants::{MAX_LINK_COST, UNKNOWN_PATH_COST};
use lowmesh_core::{Command, Frame, ManyToOne, NwkHeader, RouteReply, RouteRequest, ShortAddr};
use tracing::{debug, trace};

use crate::action::{Action, NwkEvent};
use crate::config::NwkConfig;
use crate::error::DiscoveryError;
use crate::neighbor::{NeighborTable, Relationship, link_cost_from_lqi};
use crate::nib::Nib;
use crate::outbox::{command_frame, transmit};
use crate::transport::{DelayClass, LinkAddr, RxMeta, TxKind};

use super::routes::{RouteEntry, RouteStatus, RouteTable};
use super::table::{DiscoveryEntry, DiscoveryTable, DiscoveryTarget};

/// Cost of the hop a frame just arrived over.
fn incoming_link_cost<N: NeighborTable>(neighbors: &N, rx: RxMeta) -> u8 {
    neighbors
        .link_cost(rx.link_source)
        .unwrap_or_else(|| link_cost_from_lqi(rx.lqi))
}

#[must_use]
pub struct RouteDiscovery {
    table: DiscoveryTable,
    routes: RouteTable,
    expiry_ms: u64,
    radius: u8,
}

impl RouteDiscovery {
    pub fn new(config: &NwkConfig) -> Self {
        Self {
            table: DiscoveryTable::new(config.discovery_table_size, config.eviction_policy),
            routes: RouteTable::new(config.route_table_size, config.route_expiry_ms),
            expiry_ms: config.discovery_expiry_ms,
            radius: config.radius(),
        }
    }

    pub fn table(&self) -> &DiscoveryTable {
        &self.table
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Drop all routing state.
    pub fn clear(&mut self) {
        self.table.clear();
        self.routes.clear();
    }

    /// Upper-layer route request: answer from the neighbor or route table,
    /// otherwise start a mesh discovery.
    pub fn request_route<N: NeighborTable>(
        &mut self,
        destination: ShortAddr,
        nib: &mut Nib,
        neighbors: &N,
        now: u64,
    ) -> Result<Vec<Action>, DiscoveryError> {
        if !nib.joined {
            return Err(DiscoveryError::NotJoined);
        }
        if destination == nib.short_addr {
            return Ok(Vec::new());
        }
        if let Some(n) = neighbors.get(destination) {
            return Ok(vec![discovered(destination, destination, n.link_cost())]);
        }
        if let Some(route) = self.routes.get(destination).filter(|r| r.is_usable()) {
            return Ok(vec![discovered(destination, route.next_hop, route.cost)]);
        }
        if !nib.role.is_router() {
            // End devices hand everything to their parent.
            let parent = neighbors.parent().ok_or(DiscoveryError::NotARouter)?;
            return Ok(vec![discovered(destination, parent.short, parent.link_cost())]);
        }
        if self.routes.is_discovering(destination) {
            trace!(dst = %destination, "route discovery already underway");
            return Ok(Vec::new());
        }
        self.originate(DiscoveryTarget::Device(destination), ManyToOne::None, nib, now)
    }

    /// Flood a new route request from this device.
    pub fn originate(
        &mut self,
        target: DiscoveryTarget,
        many_to_one: ManyToOne,
        nib: &mut Nib,
        now: u64,
    ) -> Result<Vec<Action>, DiscoveryError> {
        if !nib.joined {
            return Err(DiscoveryError::NotJoined);
        }
        if !nib.role.is_router() {
            return Err(DiscoveryError::NotARouter);
        }

        let me = nib.short_addr;
        let (destination, many_to_one) = match target {
            DiscoveryTarget::Device(dst) => (dst, ManyToOne::None),
            DiscoveryTarget::Concentrator if many_to_one.is_many_to_one() => {
                (ShortAddr::BROADCAST_ROUTERS, many_to_one)
            }
            DiscoveryTarget::Concentrator => {
                (ShortAddr::BROADCAST_ROUTERS, ManyToOne::WithRouteCache)
            }
        };
        let id = nib.next_route_request_id();
        let displaced = self.table.insert(
            DiscoveryEntry {
                initiator: me,
                id,
                sender: me,
                forward_cost: 0,
                residual_cost: UNKNOWN_PATH_COST,
                many_to_one,
                target,
                created_at: now,
                expires_at: now + self.expiry_ms,
            },
            now,
        )?;

        let mut actions: Vec<Action> = displaced
            .and_then(|old| self.retire(old, me))
            .into_iter()
            .collect();
        if let DiscoveryTarget::Device(dst) = target {
            self.routes.mark_discovery(dst, now);
        }

        let header = NwkHeader::command(ShortAddr::BROADCAST_ROUTERS, me, self.radius, nib.next_seq());
        let request = Command::RouteRequest(RouteRequest {
            many_to_one,
            multicast: false,
            id,
            destination,
            path_cost: 0,
            destination_ext: None,
        });
        debug!(id, dst = %destination, ?many_to_one, "originating route request");
        let (_, action) = transmit(
            nib,
            LinkAddr::Short(ShortAddr::BROADCAST_ALL),
            Frame::command(header, request),
            TxKind::RouteRequest {
                initiator: me,
                id,
                originated: true,
            },
            DelayClass::InitialBroadcast,
        );
        actions.push(action);
        Ok(actions)
    }

    /// Handle a route request overheard from `rx.link_source`.
    pub fn on_route_request<N: NeighborTable>(
        &mut self,
        header: &NwkHeader,
        request: &RouteRequest,
        rx: RxMeta,
        nib: &mut Nib,
        neighbors: &N,
        now: u64,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if !nib.joined || !nib.role.is_router() || header.src == nib.short_addr {
            return actions;
        }

        let initiator = header.src;
        let sender = rx.link_source;
        let cost = request
            .path_cost
            .saturating_add(incoming_link_cost(neighbors, rx));
        let target = if request.many_to_one.is_many_to_one() {
            DiscoveryTarget::Concentrator
        } else {
            DiscoveryTarget::Device(request.destination)
        };

        let best = self
            .table
            .get(initiator, request.id)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.forward_cost);
        match best {
            Some(best) if cost >= best => {
                trace!(initiator = %initiator, id = request.id, cost, best, "redundant route request");
                return actions;
            }
            Some(_) => {
                if let Some(entry) = self.table.get_mut(initiator, request.id) {
                    entry.sender = sender;
                    entry.forward_cost = cost;
                }
            }
            None => {
                let entry = DiscoveryEntry {
                    initiator,
                    id: request.id,
                    sender,
                    forward_cost: cost,
                    residual_cost: UNKNOWN_PATH_COST,
                    many_to_one: request.many_to_one,
                    target,
                    created_at: now,
                    expires_at: now + self.expiry_ms,
                };
                match self.table.insert(entry, now) {
                    Ok(displaced) => {
                        actions.extend(displaced.and_then(|old| self.retire(old, nib.short_addr)));
                    }
                    Err(_) => {
                        debug!(initiator = %initiator, id = request.id, "discovery table full, dropping relay");
                        return actions;
                    }
                }
            }
        }
        trace!(initiator = %initiator, id = request.id, sender = %sender, cost, "route request accepted");

        match target {
            DiscoveryTarget::Concentrator => {
                self.install_many_to_one(initiator, sender, cost, request.many_to_one, now);
                if header.radius > 1 {
                    actions.push(self.relay_request(header, request, cost, nib));
                }
            }
            DiscoveryTarget::Device(dst) if dst == nib.short_addr => {
                self.routes
                    .upsert(RouteEntry::active(initiator, sender, cost, now));
                actions.extend(self.reply(initiator, request.id, dst, 0, nib));
            }
            DiscoveryTarget::Device(dst)
                if neighbors
                    .get(dst)
                    .is_some_and(|n| n.relationship == Relationship::Child && !n.router) =>
            {
                // Answer for an end-device child, which does not route.
                let child_cost = neighbors.link_cost(dst).unwrap_or(MAX_LINK_COST);
                actions.extend(self.reply(initiator, request.id, dst, child_cost, nib));
            }
            DiscoveryTarget::Device(dst) => {
                if header.radius > 1 {
                    self.routes.mark_discovery(dst, now);
                    actions.push(self.relay_request(header, request, cost, nib));
                }
            }
        }
        actions
    }

    /// Handle a route reply addressed to this device.
    pub fn on_route_reply<N: NeighborTable>(
        &mut self,
        reply: &RouteReply,
        rx: RxMeta,
        nib: &mut Nib,
        neighbors: &N,
        now: u64,
    ) -> Vec<Action> {
        let Some(entry) = self.table.get(reply.originator, reply.id).cloned() else {
            trace!(originator = %reply.originator, id = reply.id, "route reply for unknown discovery");
            return Vec::new();
        };
        let next_hop = rx.link_source;
        let cost = reply
            .path_cost
            .saturating_add(incoming_link_cost(neighbors, rx));
        if cost >= entry.residual_cost {
            trace!(id = reply.id, cost, residual = entry.residual_cost, "route reply not better");
            return Vec::new();
        }

        self.routes
            .upsert(RouteEntry::active(reply.responder, next_hop, cost, now));

        if reply.originator == nib.short_addr {
            self.table.remove(reply.originator, reply.id);
            debug!(dst = %reply.responder, next_hop = %next_hop, cost, "route discovered");
            return vec![discovered(reply.responder, next_hop, cost)];
        }

        if let Some(e) = self.table.get_mut(reply.originator, reply.id) {
            e.residual_cost = cost;
        }
        self.routes.upsert(RouteEntry::active(
            reply.originator,
            entry.sender,
            entry.forward_cost,
            now,
        ));
        let frame = command_frame(
            nib,
            entry.sender,
            self.radius,
            Command::RouteReply(RouteReply {
                path_cost: cost,
                ..*reply
            }),
        );
        let (_, action) = transmit(
            nib,
            LinkAddr::Short(entry.sender),
            frame,
            TxKind::RouteReply {
                originator: reply.originator,
                id: reply.id,
            },
            DelayClass::RouteReply,
        );
        vec![action]
    }

    /// Expire discovery entries and stale routes.
    pub fn cull(&mut self, nib: &Nib, now: u64) -> Vec<Action> {
        let expired = self.table.cull(now);
        let actions = expired
            .into_iter()
            .filter_map(|entry| self.retire(entry, nib.short_addr))
            .collect();
        self.routes.cull(now);
        actions
    }

    /// Clean up after an entry left the table without a reply reaching us.
    fn retire(&mut self, entry: DiscoveryEntry, me: ShortAddr) -> Option<Action> {
        let DiscoveryTarget::Device(dst) = entry.target else {
            return None;
        };
        if self.routes.is_discovering(dst) {
            self.routes.remove(dst);
        }
        if entry.initiator != me {
            return None;
        }
        debug!(dst = %dst, id = entry.id, "route discovery failed");
        Some(Action::Notify(NwkEvent::RouteDiscoveryFailed { destination: dst }))
    }

    fn install_many_to_one(
        &mut self,
        concentrator: ShortAddr,
        next_hop: ShortAddr,
        cost: u8,
        mode: ManyToOne,
        now: u64,
    ) {
        let entry = RouteEntry {
            destination: concentrator,
            next_hop,
            status: RouteStatus::ValidationUnderway,
            cost,
            many_to_one: true,
            no_route_cache: mode == ManyToOne::NoRouteCache,
            route_record_required: true,
            updated_at: now,
        };
        if !self.routes.upsert(entry) {
            debug!(concentrator = %concentrator, "route table full, many-to-one route not installed");
        }
    }

    fn relay_request(
        &self,
        header: &NwkHeader,
        request: &RouteRequest,
        cost: u8,
        nib: &mut Nib,
    ) -> Action {
        let mut relayed = header.clone();
        relayed.radius -= 1;
        let frame = Frame::command(
            relayed,
            Command::RouteRequest(RouteRequest {
                path_cost: cost,
                ..*request
            }),
        );
        transmit(
            nib,
            LinkAddr::Short(ShortAddr::BROADCAST_ALL),
            frame,
            TxKind::RouteRequest {
                initiator: header.src,
                id: request.id,
                originated: false,
            },
            DelayClass::RetriedRouteRequest,
        )
        .1
    }

    fn reply(
        &mut self,
        initiator: ShortAddr,
        id: u8,
        responder: ShortAddr,
        cost: u8,
        nib: &mut Nib,
    ) -> Option<Action> {
        let entry = self.table.get_mut(initiator, id)?;
        entry.residual_cost = cost;
        let sender = entry.sender;
        let frame = command_frame(
            nib,
            sender,
            self.radius,
            Command::RouteReply(RouteReply {
                id,
                originator: initiator,
                responder,
                path_cost: cost,
            }),
        );
        trace!(initiator = %initiator, id, via = %sender, "sending route reply");
        let (_, action) = transmit(
            nib,
            LinkAddr::Short(sender),
            frame,
            TxKind::RouteReply {
                originator: initiator,
                id,
            },
            DelayClass::RouteReply,
        );
        Some(action)
    }
}

fn discovered(destination: ShortAddr, next_hop: ShortAddr, cost: u8) -> Action {
    Action::Notify(NwkEvent::RouteDiscovered {
        destination,
        next_hop,
        cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionPolicy;
    use crate::neighbor::{Neighbor, NeighborArena};
    use crate::nib::DeviceRole;
    use crate::transport::OutgoingFrame;
    use lowmesh_core::{ExtAddr, FrameBody};

    const ME: ShortAddr = ShortAddr(0x000B);
    const A: ShortAddr = ShortAddr(0x000A);

    fn joined_router(short: ShortAddr) -> Nib {
        let mut nib = Nib::new(ExtAddr(short.0 as u64), DeviceRole::Router);
        nib.short_addr = short;
        nib.joined = true;
        nib
    }

    fn neighbors(addrs: &[u16]) -> NeighborArena {
        let mut table = NeighborArena::new(16);
        for a in addrs {
            table
                .upsert(Neighbor::router(ShortAddr(*a), Relationship::Sibling, 255))
                .unwrap();
        }
        table
    }

    fn engine(table_size: usize) -> RouteDiscovery {
        RouteDiscovery::new(&NwkConfig {
            discovery_table_size: table_size,
            ..Default::default()
        })
    }

    fn rreq_header(initiator: ShortAddr, radius: u8, seq: u8) -> NwkHeader {
        NwkHeader::command(ShortAddr::BROADCAST_ROUTERS, initiator, radius, seq)
    }

    fn rreq(id: u8, dst: ShortAddr, cost: u8, many_to_one: ManyToOne) -> RouteRequest {
        RouteRequest {
            many_to_one,
            multicast: false,
            id,
            destination: dst,
            path_cost: cost,
            destination_ext: None,
        }
    }

    fn rx(from: u16) -> RxMeta {
        RxMeta {
            link_source: ShortAddr(from),
            lqi: 255,
        }
    }

    fn transmitted(actions: &[Action]) -> Vec<&OutgoingFrame> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit { frame, .. } => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn command_of(frame: &OutgoingFrame) -> &Command {
        match &frame.frame.body {
            FrameBody::Command(cmd) => cmd,
            FrameBody::Data(_) => panic!("expected a command frame"),
        }
    }

    #[test]
    fn test_many_to_one_keeps_cheapest_relay() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101, 0x0102, 0x0103]);
        let header = rreq_header(A, 10, 1);

        // link cost 1 each: arriving costs 3, 1, 2
        for (from, cost) in [(0x0101, 2), (0x0102, 0), (0x0103, 1)] {
            let req = rreq(7, ShortAddr::BROADCAST_ROUTERS, cost, ManyToOne::WithRouteCache);
            engine.on_route_request(&header, &req, rx(from), &mut nib, &table, 0);
        }

        assert_eq!(engine.table().len(), 1);
        let entry = engine.table().get(A, 7).unwrap();
        assert_eq!(entry.forward_cost, 1);
        assert_eq!(entry.sender, ShortAddr(0x0102));

        let route = engine.routes().get(A).unwrap();
        assert_eq!(route.next_hop, ShortAddr(0x0102));
        assert!(route.many_to_one);
        assert!(route.route_record_required);

        // Freed only on expiry.
        assert!(engine.cull(&nib, 9_999).is_empty());
        assert_eq!(engine.table().len(), 1);
        assert!(engine.cull(&nib, 10_000).is_empty());
        assert!(engine.table().is_empty());
    }

    #[test]
    fn test_many_to_one_is_relayed_not_answered() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        let req = rreq(7, ShortAddr::BROADCAST_ROUTERS, 2, ManyToOne::NoRouteCache);
        let actions = engine.on_route_request(&rreq_header(A, 5, 42), &req, rx(0x0101), &mut nib, &table, 0);

        let frames = transmitted(&actions);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_broadcast());
        let relayed = &frames[0].frame;
        assert_eq!(relayed.header.src, A);
        assert_eq!(relayed.header.seq, 42);
        assert_eq!(relayed.header.radius, 4);
        match command_of(frames[0]) {
            Command::RouteRequest(r) => {
                assert_eq!(r.path_cost, 3);
                assert_eq!(r.many_to_one, ManyToOne::NoRouteCache);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(engine.routes().get(A).unwrap().no_route_cache);
    }

    #[test]
    fn test_equal_cost_first_received_wins() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101, 0x0102]);
        let header = rreq_header(A, 10, 1);
        let req = rreq(1, ShortAddr(0x0999), 1, ManyToOne::None);

        let first = engine.on_route_request(&header, &req, rx(0x0101), &mut nib, &table, 0);
        assert_eq!(transmitted(&first).len(), 1);
        let second = engine.on_route_request(&header, &req, rx(0x0102), &mut nib, &table, 1);
        assert!(second.is_empty());
        assert_eq!(engine.table().get(A, 1).unwrap().sender, ShortAddr(0x0101));
    }

    #[test]
    fn test_radius_exhausted_not_relayed() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        let req = rreq(1, ShortAddr(0x0999), 0, ManyToOne::None);
        let actions = engine.on_route_request(&rreq_header(A, 1, 1), &req, rx(0x0101), &mut nib, &table, 0);
        assert!(actions.is_empty());
        assert_eq!(engine.table().len(), 1);
    }

    #[test]
    fn test_destination_replies_along_best_reverse_hop() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101, 0x0102]);
        let header = rreq_header(A, 10, 1);

        let worse = engine.on_route_request(&header, &rreq(3, ME, 4, ManyToOne::None), rx(0x0101), &mut nib, &table, 0);
        let better = engine.on_route_request(&header, &rreq(3, ME, 1, ManyToOne::None), rx(0x0102), &mut nib, &table, 1);

        let frames = transmitted(&worse);
        assert_eq!(frames[0].next_hop, LinkAddr::Short(ShortAddr(0x0101)));
        let frames = transmitted(&better);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].next_hop, LinkAddr::Short(ShortAddr(0x0102)));
        assert_eq!(
            command_of(frames[0]),
            &Command::RouteReply(RouteReply {
                id: 3,
                originator: A,
                responder: ME,
                path_cost: 0,
            })
        );
        assert_eq!(engine.routes().next_hop(A), Some(ShortAddr(0x0102)));
    }

    #[test]
    fn test_parent_answers_for_end_device_child() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let mut table = neighbors(&[0x0101]);
        let mut child = Neighbor::new(ShortAddr(0x0C01), Relationship::Child);
        child.lqi = 255;
        table.upsert(child).unwrap();

        let actions = engine.on_route_request(
            &rreq_header(A, 10, 1),
            &rreq(5, ShortAddr(0x0C01), 2, ManyToOne::None),
            rx(0x0101),
            &mut nib,
            &table,
            0,
        );
        let frames = transmitted(&actions);
        assert_eq!(frames.len(), 1);
        match command_of(frames[0]) {
            Command::RouteReply(r) => {
                assert_eq!(r.responder, ShortAddr(0x0C01));
                assert_eq!(r.path_cost, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reply_is_forwarded_toward_originator() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101, 0x0201]);
        let dst = ShortAddr(0x0999);
        engine.on_route_request(&rreq_header(A, 10, 1), &rreq(4, dst, 2, ManyToOne::None), rx(0x0101), &mut nib, &table, 0);

        let reply = RouteReply {
            id: 4,
            originator: A,
            responder: dst,
            path_cost: 2,
        };
        let actions = engine.on_route_reply(&reply, rx(0x0201), &mut nib, &table, 5);
        let frames = transmitted(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].next_hop, LinkAddr::Short(ShortAddr(0x0101)));
        assert_eq!(frames[0].frame.header.dst, ShortAddr(0x0101));
        match command_of(frames[0]) {
            Command::RouteReply(r) => assert_eq!(r.path_cost, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.routes().next_hop(dst), Some(ShortAddr(0x0201)));
        assert_eq!(engine.routes().next_hop(A), Some(ShortAddr(0x0101)));
        assert_eq!(engine.table().get(A, 4).unwrap().residual_cost, 3);

        // a worse reply afterwards changes nothing
        let worse = RouteReply { path_cost: 6, ..reply };
        assert!(engine.on_route_reply(&worse, rx(0x0201), &mut nib, &table, 6).is_empty());
    }

    #[test]
    fn test_originator_completes_on_first_reply() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        let dst = ShortAddr(0x0999);

        let actions = engine.request_route(dst, &mut nib, &table, 0).unwrap();
        let frames = transmitted(&actions);
        assert_eq!(frames.len(), 1);
        let id = match command_of(frames[0]) {
            Command::RouteRequest(r) => r.id,
            other => panic!("unexpected {other:?}"),
        };
        assert!(engine.routes().is_discovering(dst));
        // second request while underway does nothing
        assert!(engine.request_route(dst, &mut nib, &table, 1).unwrap().is_empty());

        let reply = RouteReply {
            id,
            originator: ME,
            responder: dst,
            path_cost: 4,
        };
        let actions = engine.on_route_reply(&reply, rx(0x0101), &mut nib, &table, 10);
        assert_eq!(
            actions,
            vec![discovered(dst, ShortAddr(0x0101), 5)]
        );
        assert!(engine.table().is_empty());
        assert_eq!(engine.routes().next_hop(dst), Some(ShortAddr(0x0101)));
    }

    #[test]
    fn test_request_route_to_neighbor_is_immediate() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        let actions = engine
            .request_route(ShortAddr(0x0101), &mut nib, &table, 0)
            .unwrap();
        assert_eq!(actions, vec![discovered(ShortAddr(0x0101), ShortAddr(0x0101), 1)]);
        assert!(engine.table().is_empty());
    }

    #[test]
    fn test_expired_discovery_reports_failure() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        let table = neighbors(&[]);
        let dst = ShortAddr(0x0999);
        engine.request_route(dst, &mut nib, &table, 0).unwrap();

        let actions = engine.cull(&nib, 10_000);
        assert_eq!(
            actions,
            vec![Action::Notify(NwkEvent::RouteDiscoveryFailed { destination: dst })]
        );
        assert!(!engine.routes().is_discovering(dst));
    }

    #[test]
    fn test_table_full_originate_fails_relay_drops() {
        let mut engine = engine(1);
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        engine
            .originate(DiscoveryTarget::Concentrator, ManyToOne::WithRouteCache, &mut nib, 0)
            .unwrap();

        assert_eq!(
            engine.originate(DiscoveryTarget::Device(ShortAddr(5)), ManyToOne::None, &mut nib, 1),
            Err(DiscoveryError::OutOfMemory)
        );
        let relayed = engine.on_route_request(
            &rreq_header(A, 10, 1),
            &rreq(1, ShortAddr(0x0999), 0, ManyToOne::None),
            rx(0x0101),
            &mut nib,
            &table,
            2,
        );
        assert!(relayed.is_empty());
        assert_eq!(engine.table().len(), 1);
    }

    #[test]
    fn test_eviction_policy_makes_room_for_relay() {
        let mut engine = RouteDiscovery::new(&NwkConfig {
            discovery_table_size: 1,
            eviction_policy: EvictionPolicy::OldestFirst,
            ..Default::default()
        });
        let mut nib = joined_router(ME);
        let table = neighbors(&[0x0101]);
        engine
            .request_route(ShortAddr(0x0999), &mut nib, &table, 0)
            .unwrap();
        let actions = engine.on_route_request(
            &rreq_header(A, 10, 1),
            &rreq(1, ShortAddr(0x0888), 0, ManyToOne::None),
            rx(0x0101),
            &mut nib,
            &table,
            2,
        );
        assert!(actions.contains(&Action::Notify(NwkEvent::RouteDiscoveryFailed {
            destination: ShortAddr(0x0999)
        })));
        assert!(engine.table().get(A, 1).is_some());
    }

    #[test]
    fn test_end_device_cannot_originate() {
        let mut engine = engine(4);
        let mut nib = joined_router(ME);
        nib.role = DeviceRole::EndDevice;
        assert_eq!(
            engine.originate(DiscoveryTarget::Device(A), ManyToOne::None, &mut nib, 0),
            Err(DiscoveryError::NotARouter)
        );
        let mut parent_table = NeighborArena::new(4);
        parent_table
            .upsert(Neighbor::router(ShortAddr(0), Relationship::Parent, 255))
            .unwrap();
        let actions = engine.request_route(A, &mut nib, &parent_table, 0).unwrap();
        assert_eq!(actions, vec![discovered(A, ShortAddr(0), 1)]);
    }
}
