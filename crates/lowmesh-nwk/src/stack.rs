//! The network layer engine.
//!
//! [`NwkStack`] owns every control-plane component and is the only thing a
//! host talks to. It never performs I/O: each entry point takes the current
//! time and returns the [`Action`]s the host must carry out. Every entry
//! point leaves all tables consistent before returning, since the next one
//! may be a confirm, a timer or a received frame in any order.

use std::collections::HashMap;

use lowmesh_core::{
    ChannelMask, Command, ExtAddr, Frame, FrameBody, NetworkStatus, NetworkStatusCode, NwkHeader,
    PanId, ShortAddr,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, trace, warn};

use crate::action::{Action, Beacon, LinkRequest, NwkEvent};
use crate::broadcast::BroadcastTable;
use crate::config::NwkConfig;
use crate::discovery::{DiscoveryTarget, RouteDiscovery, RouteTable};
use crate::error::{DiscoveryError, NwkError};
use crate::join::{JoinManager, JoinMode, JoinState};
use crate::leave::{LeaveManager, LeaveRequest, LeaveState, LeaveTarget};
use crate::neighbor::{NeighborArena, NeighborTable};
use crate::nib::{DeviceRole, Nib};
use crate::outbox::{command_frame, transmit};
use crate::parent;
use crate::passive_ack::{PassiveAckPoll, PassiveAckTracker};
use crate::route_record::{RouteRecorder, SourceRouteCache, append_relay};
use crate::transport::{DelayClass, LinkAddr, RxMeta, TxHandle, TxKind, TxStatus};

/// Attempts used when a leave asks us to rejoin.
const REJOIN_ATTEMPTS: u8 = 3;

pub struct NwkStack<N: NeighborTable = NeighborArena> {
    config: NwkConfig,
    nib: Nib,
    neighbors: N,
    join: JoinManager,
    discovery: RouteDiscovery,
    passive_ack: PassiveAckTracker,
    broadcasts: BroadcastTable,
    recorder: RouteRecorder,
    source_routes: SourceRouteCache,
    leave: LeaveManager,
    /// Owner of every transmission the facade has not confirmed yet.
    inflight: HashMap<TxHandle, TxKind>,
    rng: StdRng,
    published_beacon: Option<Beacon>,
    next_concentrator_at: Option<u64>,
}

impl NwkStack<NeighborArena> {
    pub fn new(config: NwkConfig, ext_addr: ExtAddr, role: DeviceRole) -> Self {
        let neighbors = NeighborArena::new(config.neighbor_table_size);
        Self::with_neighbors(config, ext_addr, role, neighbors)
    }
}

impl<N: NeighborTable> NwkStack<N> {
    /// Build a stack around an existing (possibly persisted) neighbor table.
    pub fn with_neighbors(config: NwkConfig, ext_addr: ExtAddr, role: DeviceRole, neighbors: N) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            nib: Nib::new(ext_addr, role),
            neighbors,
            join: JoinManager::new(&config),
            discovery: RouteDiscovery::new(&config),
            passive_ack: PassiveAckTracker::new(
                config.passive_ack_table_size,
                config.broadcast_retries,
                config.broadcast_retry_interval_ms,
            ),
            broadcasts: BroadcastTable::new(config.broadcast_table_size, config.broadcast_expiry_ms),
            recorder: RouteRecorder::new(config.max_route_record_relays),
            source_routes: SourceRouteCache::new(config.source_route_cache_size),
            leave: LeaveManager::new(config.leave_queue_size),
            inflight: HashMap::new(),
            rng,
            published_beacon: None,
            next_concentrator_at: None,
            config,
        }
    }

    // ---- accessors ----

    pub fn config(&self) -> &NwkConfig {
        &self.config
    }

    pub fn nib(&self) -> &Nib {
        &self.nib
    }

    pub fn neighbors(&self) -> &N {
        &self.neighbors
    }

    pub fn neighbors_mut(&mut self) -> &mut N {
        &mut self.neighbors
    }

    pub fn routes(&self) -> &RouteTable {
        self.discovery.routes()
    }

    pub fn discovery(&self) -> &RouteDiscovery {
        &self.discovery
    }

    pub fn passive_ack(&self) -> &PassiveAckTracker {
        &self.passive_ack
    }

    pub fn broadcasts(&self) -> &BroadcastTable {
        &self.broadcasts
    }

    pub fn source_routes(&self) -> &SourceRouteCache {
        &self.source_routes
    }

    pub fn join_state(&self) -> &JoinState {
        self.join.state()
    }

    pub fn leave_state(&self) -> LeaveState {
        self.leave.state()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// No join, leave, route record or tracked broadcast outstanding.
    pub fn is_idle(&self) -> bool {
        self.join.is_idle() && self.leave.is_idle() && self.recorder.is_idle() && self.passive_ack.is_empty()
    }

    /// Beacon contents a router advertises, `None` when not joined or not routing.
    pub fn beacon(&self, now: u64) -> Option<Beacon> {
        if !self.nib.joined || !self.nib.role.is_router() {
            return None;
        }
        let (routers, end_devices) = self.neighbors.child_counts();
        let depth_room = self.nib.depth < self.config.max_depth;
        Some(Beacon {
            pan_id: self.nib.pan_id,
            channel: self.nib.channel,
            short: self.nib.short_addr,
            ext: self.nib.ext_addr,
            depth: self.nib.depth,
            router_capacity: depth_room && routers < self.config.max_router_children,
            end_device_capacity: depth_room && end_devices < self.config.max_end_device_children,
            permit_joining: self.nib.permit_joining(now),
            lqi: 0,
        })
    }

    // ---- upper layer ----

    /// Start a network as coordinator.
    pub fn form_network(&mut self, pan_id: PanId, channel: u8, now: u64) -> Result<Vec<Action>, NwkError> {
        if self.nib.role != DeviceRole::Coordinator {
            return Err(NwkError::Formation("only a coordinator forms a network"));
        }
        if self.nib.joined {
            return Err(NwkError::Formation("network already formed"));
        }
        self.nib.short_addr = ShortAddr::COORDINATOR;
        self.nib.pan_id = pan_id;
        self.nib.channel = channel;
        self.nib.depth = 0;
        self.nib.joined = true;
        self.next_concentrator_at = None;
        info!(pan = %pan_id, channel, "network formed");

        let mut actions = vec![Action::Link(LinkRequest::Start {
            pan_id,
            channel,
            short: ShortAddr::COORDINATOR,
        })];
        actions.extend(self.refresh_beacon(now));
        actions.push(Action::Notify(NwkEvent::NetworkFormed { pan_id, channel }));
        Ok(actions)
    }

    /// Open joining for `duration_ms`. Zero closes it.
    pub fn permit_joining(&mut self, duration_ms: u64, now: u64) -> Vec<Action> {
        self.nib.permit_joining_until = if duration_ms == 0 { 0 } else { now + duration_ms };
        debug!(duration_ms, "permit joining");
        self.refresh_beacon(now).into_iter().collect()
    }

    pub fn request_join(&mut self, attempts: u8, channels: ChannelMask, now: u64) -> Result<Vec<Action>, NwkError> {
        let actions = self.join.start(JoinMode::Associate, attempts, channels, &self.nib)?;
        Ok(self.settle(actions, None, now))
    }

    /// Rejoin the previous network, e.g. after losing the parent.
    pub fn request_rejoin(&mut self, attempts: u8, channels: ChannelMask, now: u64) -> Result<Vec<Action>, NwkError> {
        let actions = self.join.start(JoinMode::Rejoin, attempts, channels, &self.nib)?;
        Ok(self.settle(actions, None, now))
    }

    /// Leave the network (`target` `None` or our own address) or remove a device.
    pub fn request_leave(
        &mut self,
        target: Option<ShortAddr>,
        rejoin: bool,
        remove_children: bool,
        silent: bool,
        now: u64,
    ) -> Result<Vec<Action>, NwkError> {
        let target = match target {
            Some(short) if short != self.nib.short_addr => LeaveTarget::Device(short),
            _ => LeaveTarget::Local,
        };
        self.leave.request(
            LeaveRequest {
                target,
                rejoin,
                remove_children,
                silent,
            },
            &self.nib,
        )?;
        let actions = self.leave.process(&mut self.nib, &mut self.neighbors);
        Ok(self.settle(actions, None, now))
    }

    /// Resolve a route, starting a discovery if none is known.
    pub fn request_route_to(&mut self, destination: ShortAddr, now: u64) -> Result<Vec<Action>, NwkError> {
        let actions = self
            .discovery
            .request_route(destination, &mut self.nib, &self.neighbors, now)?;
        Ok(self.settle(actions, None, now))
    }

    /// Send an application payload. A many-to-one route that asks for it is
    /// followed by a route record.
    pub fn send_data(&mut self, destination: ShortAddr, payload: Vec<u8>, now: u64) -> Result<Vec<Action>, NwkError> {
        if !self.nib.joined {
            return Err(DiscoveryError::NotJoined.into());
        }
        let radius = self.config.radius();
        let mut header = NwkHeader::data(destination, self.nib.short_addr, radius, self.nib.next_seq());

        let seq = header.seq;
        let next_hop = if destination.is_broadcast() {
            self.broadcasts.insert(self.nib.short_addr, seq, now);
            destination
        } else if let Some(route) = self.source_routes.source_route(destination) {
            let first = route.current_relay().ok_or(NwkError::NoRoute(destination))?;
            header = header.with_source_route(route);
            first
        } else {
            self.next_hop(destination).ok_or(NwkError::NoRoute(destination))?
        };

        let delay = if destination.is_broadcast() {
            DelayClass::InitialBroadcast
        } else {
            DelayClass::UnicastCommand
        };
        let (_, action) = transmit(
            &mut self.nib,
            LinkAddr::Short(next_hop),
            Frame::data(header, payload),
            TxKind::Data { destination },
            delay,
        );
        let mut actions = vec![action];

        let record = self
            .discovery
            .routes()
            .get(destination)
            .filter(|r| r.many_to_one && r.route_record_required)
            .map(|r| r.no_route_cache);
        if let Some(no_route_cache) = record {
            actions.push(self.recorder.originate(destination, next_hop, radius, &mut self.nib));
            if !no_route_cache
                && let Some(route) = self.discovery.routes_mut().get_mut(destination)
            {
                route.route_record_required = false;
            }
        }
        Ok(self.settle(actions, None, now))
    }

    // ---- link layer ----

    /// Results of a scan requested with [`LinkRequest::Scan`].
    pub fn on_scan_complete(&mut self, beacons: &[Beacon], now: u64) -> Vec<Action> {
        let actions = self
            .join
            .on_scan_complete(beacons, &mut self.nib, &mut self.neighbors, now);
        self.settle(actions, None, now)
    }

    /// Final delivery status of a transmission.
    pub fn on_tx_confirm(&mut self, handle: TxHandle, status: TxStatus, now: u64) -> Vec<Action> {
        self.passive_ack.release(handle);
        let Some(kind) = self.inflight.remove(&handle) else {
            trace!(%handle, "confirm for unknown transmission");
            return Vec::new();
        };
        trace!(%handle, ?kind, ?status, "tx confirm");
        let actions = match kind {
            TxKind::AssociationRequest { .. } | TxKind::RejoinRequest { .. } => {
                self.join.on_tx_confirm(handle, status, &mut self.nib, now)
            }
            TxKind::Leave { .. } => self
                .leave
                .on_tx_confirm(handle, status, &mut self.nib, &mut self.neighbors),
            TxKind::RouteRecord { destination } => {
                if !self.recorder.on_confirm(handle) {
                    trace!(%handle, dst = %destination, "stale route record confirm");
                }
                Vec::new()
            }
            TxKind::Relay { destination } | TxKind::Data { destination } if !status.is_success() => {
                debug!(dst = %destination, ?status, "unicast delivery failed");
                Vec::new()
            }
            _ => Vec::new(),
        };
        self.settle(actions, None, now)
    }

    /// A network frame arrived from the link layer.
    pub fn on_frame_received(&mut self, raw: &[u8], rx: RxMeta, now: u64) -> Result<Vec<Action>, NwkError> {
        let frame = Frame::parse(raw)?;
        self.neighbors.heard(rx.link_source, rx.lqi, now);

        let mut actions = Vec::new();
        if frame.header.is_broadcast()
            && let Some(slot) = self.neighbors.slot_of(rx.link_source)
        {
            for handle in self
                .passive_ack
                .observed_relay(slot, frame.header.src, frame.header.seq)
            {
                actions.push(Action::StopRetries { handle });
            }
        }
        if frame.header.src == self.nib.short_addr && self.nib.joined {
            trace!(seq = frame.header.seq, "own frame echoed back");
            return Ok(self.settle(actions, Some(rx), now));
        }

        actions.extend(self.dispatch(frame, rx, now));
        Ok(self.settle(actions, Some(rx), now))
    }

    fn dispatch(&mut self, frame: Frame, rx: RxMeta, now: u64) -> Vec<Action> {
        let Frame { header, body } = frame;
        let me = self.nib.short_addr;
        let for_me = header.dst == me || header.dst_ext == Some(self.nib.ext_addr);

        let command = match body {
            FrameBody::Data(payload) => {
                if !self.nib.joined {
                    return Vec::new();
                }
                if header.is_broadcast() {
                    return self.on_broadcast_data(header, payload, now);
                }
                if for_me {
                    trace!(src = %header.src, len = payload.len(), "data indication");
                    return vec![Action::Notify(NwkEvent::DataIndication {
                        source: header.src,
                        payload,
                    })];
                }
                return self.forward(Frame { header, body: FrameBody::Data(payload) }, rx);
            }
            FrameBody::Command(command) => command,
        };

        if !self.nib.joined
            && !matches!(command, Command::AssociationResponse(_) | Command::RejoinResponse(_))
        {
            trace!(id = ?command.id(), "not joined, ignoring command");
            return Vec::new();
        }

        match command {
            Command::RouteRequest(request) => self.discovery.on_route_request(
                &header,
                &request,
                rx,
                &mut self.nib,
                &self.neighbors,
                now,
            ),
            Command::RouteReply(reply) if for_me => {
                self.discovery
                    .on_route_reply(&reply, rx, &mut self.nib, &self.neighbors, now)
            }
            Command::RouteReply(_) => Vec::new(),
            Command::NetworkStatus(status) if for_me => {
                self.on_network_status(header.src, status)
            }
            Command::RouteRecord(record) if for_me => {
                vec![self.recorder.deliver(header.src, record, &mut self.source_routes, now)]
            }
            Command::Leave(leave) => {
                let src = header.src;
                let actions = self
                    .leave
                    .on_leave_command(&header, leave, &mut self.nib, &mut self.neighbors);
                if !self.neighbors.contains(src) {
                    self.forget_routes_via(src);
                }
                actions
            }
            Command::AssociationRequest(capability) | Command::RejoinRequest(capability) => {
                let rejoin = matches!(command, Command::RejoinRequest(_));
                let mut actions = parent::on_join_request(
                    &header,
                    capability,
                    rejoin,
                    rx,
                    &mut self.nib,
                    &mut self.neighbors,
                    &self.config,
                    &mut self.rng,
                    now,
                );
                actions.extend(self.refresh_beacon(now));
                actions
            }
            Command::AssociationResponse(response) | Command::RejoinResponse(response) => {
                let rejoin = matches!(command, Command::RejoinResponse(_));
                self.join.on_response(
                    &header,
                    response,
                    rejoin,
                    &mut self.nib,
                    &mut self.neighbors,
                    now,
                )
            }
            command @ (Command::NetworkStatus(_) | Command::RouteRecord(_)) => {
                self.forward(Frame::command(header, command), rx)
            }
        }
    }

    fn on_network_status(&mut self, source: ShortAddr, status: NetworkStatus) -> Vec<Action> {
        debug!(src = %source, code = ?status.code, dst = %status.destination, "network status");
        if matches!(
            status.code,
            NetworkStatusCode::NoRouteAvailable
                | NetworkStatusCode::TreeLinkFailure
                | NetworkStatusCode::NonTreeLinkFailure
                | NetworkStatusCode::SourceRouteFailure
                | NetworkStatusCode::ManyToOneRouteFailure
        ) {
            self.discovery.routes_mut().remove(status.destination);
            self.source_routes.remove(status.destination);
        }
        vec![Action::Notify(NwkEvent::NetworkStatus {
            source,
            code: status.code,
            destination: status.destination,
        })]
    }

    // ---- forwarding ----

    fn next_hop(&self, destination: ShortAddr) -> Option<ShortAddr> {
        if self.neighbors.contains(destination) {
            return Some(destination);
        }
        if let Some(hop) = self.discovery.routes().next_hop(destination) {
            return Some(hop);
        }
        if !self.nib.role.is_router() {
            return self.neighbors.parent().map(|p| p.short);
        }
        None
    }

    /// Indicate a broadcast once and, on routers, pass it on with one less hop.
    fn on_broadcast_data(&mut self, mut header: NwkHeader, payload: Vec<u8>, now: u64) -> Vec<Action> {
        let source = header.src;
        if !self.broadcasts.insert(source, header.seq, now) {
            trace!(src = %source, seq = header.seq, "duplicate broadcast dropped");
            return Vec::new();
        }
        let router = self.nib.role.is_router();
        let mut actions = Vec::new();
        if router && header.radius > 1 {
            header.radius -= 1;
            let destination = header.dst;
            trace!(src = %source, seq = header.seq, radius = header.radius, "relaying broadcast");
            let (_, action) = transmit(
                &mut self.nib,
                LinkAddr::Short(destination),
                Frame::data(header.clone(), payload.clone()),
                TxKind::Relay { destination },
                DelayClass::InitialBroadcast,
            );
            actions.push(action);
        }
        if header.dst != ShortAddr::BROADCAST_ROUTERS || router {
            trace!(src = %source, len = payload.len(), "broadcast data indication");
            actions.push(Action::Notify(NwkEvent::DataIndication { source, payload }));
        }
        actions
    }

    /// Relay a unicast frame that is not addressed to us.
    fn forward(&mut self, mut frame: Frame, rx: RxMeta) -> Vec<Action> {
        let destination = frame.header.dst;
        if destination.is_broadcast() || !self.nib.role.is_router() {
            return Vec::new();
        }
        if frame.header.radius <= 1 {
            trace!(dst = %destination, src = %frame.header.src, "radius exhausted, dropping");
            return Vec::new();
        }
        frame.header.radius -= 1;

        let me = self.nib.short_addr;
        let mut next_hop = None;
        if let Some(route) = frame.header.source_route.as_mut()
            && route.current_relay() == Some(me)
        {
            if route.relay_index == 0 {
                next_hop = Some(destination);
            } else {
                route.relay_index -= 1;
                next_hop = route.current_relay();
            }
        }
        let Some(next_hop) = next_hop.or_else(|| self.next_hop(destination)) else {
            return self.no_route(&frame, rx);
        };

        if let FrameBody::Command(Command::RouteRecord(record)) = &mut frame.body {
            *record = append_relay(std::mem::take(record), me, self.recorder.max_relays());
        }
        trace!(dst = %destination, next_hop = %next_hop, "forwarding");
        let (_, action) = transmit(
            &mut self.nib,
            LinkAddr::Short(next_hop),
            frame,
            TxKind::Relay { destination },
            DelayClass::UnicastCommand,
        );
        vec![action]
    }

    /// Tell the source that `frame` could not be forwarded.
    fn no_route(&mut self, frame: &Frame, rx: RxMeta) -> Vec<Action> {
        let destination = frame.header.dst;
        let source = frame.header.src;
        debug!(dst = %destination, src = %source, "no route, reporting to source");
        if matches!(frame.body, FrameBody::Command(Command::NetworkStatus(_))) {
            return Vec::new();
        }
        let back = self.next_hop(source).unwrap_or(rx.link_source);
        let status = Command::NetworkStatus(NetworkStatus {
            code: NetworkStatusCode::NoRouteAvailable,
            destination,
        });
        let radius = self.config.radius();
        let report = command_frame(&mut self.nib, source, radius, status);
        let (_, action) = transmit(
            &mut self.nib,
            LinkAddr::Short(back),
            report,
            TxKind::NetworkStatus { destination: source },
            DelayClass::UnicastCommand,
        );
        vec![action]
    }

    fn forget_routes_via(&mut self, neighbor: ShortAddr) {
        let lost = self.discovery.routes_mut().remove_via(neighbor);
        self.discovery.routes_mut().remove(neighbor);
        self.source_routes.remove(neighbor);
        if !lost.is_empty() {
            debug!(%neighbor, routes = lost.len(), "routes via departed neighbor dropped");
        }
    }

    // ---- timers ----

    /// Periodic processing: timeouts, broadcast retries, queued leaves,
    /// concentrator advertisements and expiry.
    pub fn task(&mut self, now: u64) -> Vec<Action> {
        let mut actions = self.join.task(&mut self.nib, now);
        actions.extend(self.leave.process(&mut self.nib, &mut self.neighbors));
        actions.extend(self.discovery.cull(&self.nib, now));
        self.broadcasts.cull(now);

        for poll in self.passive_ack.poll(now) {
            actions.push(match poll {
                PassiveAckPoll::Retransmit(handle) => Action::Retransmit { handle },
                PassiveAckPoll::Stop(handle) => Action::StopRetries { handle },
            });
        }

        if let Some(concentrator) = self.config.concentrator
            && self.nib.joined
            && self.nib.role.is_router()
            && self.next_concentrator_at.is_none_or(|at| now >= at)
        {
            self.next_concentrator_at = Some(now + concentrator.interval_ms);
            match self
                .discovery
                .originate(DiscoveryTarget::Concentrator, concentrator.mode, &mut self.nib, now)
            {
                Ok(advert) => actions.extend(advert),
                Err(e) => warn!(error = %e, "many-to-one advertisement failed"),
            }
        }

        actions.extend(self.refresh_beacon(now));
        self.settle(actions, None, now)
    }

    /// Publish the beacon again if its contents changed.
    fn refresh_beacon(&mut self, now: u64) -> Option<Action> {
        let beacon = self.beacon(now);
        if beacon == self.published_beacon {
            return None;
        }
        self.published_beacon = beacon;
        beacon.map(|b| Action::Link(LinkRequest::UpdateBeacon(b)))
    }

    // ---- bookkeeping ----

    /// Finish component handoffs and register outgoing transmissions.
    fn settle(&mut self, mut actions: Vec<Action>, rx: Option<RxMeta>, now: u64) -> Vec<Action> {
        if matches!(self.join.state(), JoinState::FinalizeBeacon { .. }) {
            let beacon = self.beacon(now);
            self.published_beacon = beacon;
            self.next_concentrator_at = None;
            actions.extend(self.join.finalize(beacon, &self.nib));
        }

        if let Some(rejoin) = self.leave.pending_reset() {
            let previous = self.nib.short_addr;
            actions.extend(self.leave.reset_link(&mut self.nib, &mut self.neighbors));
            self.discovery.clear();
            self.passive_ack.clear();
            self.broadcasts.clear();
            self.recorder.clear();
            self.source_routes.clear();
            self.published_beacon = None;
            if rejoin {
                // Ask the new parent for the address we had.
                self.nib.short_addr = previous;
                let channels = ChannelMask::single(self.nib.channel);
                match self.join.start(JoinMode::Rejoin, REJOIN_ATTEMPTS, channels, &self.nib) {
                    Ok(start) => actions.extend(start),
                    Err(e) => warn!(error = %e, "rejoin after leave not started"),
                }
            }
        }

        for action in &actions {
            if let Action::Notify(NwkEvent::LeaveComplete {
                address,
                is_self: false,
                ..
            }) = action
            {
                self.forget_routes_via(*address);
            }
        }

        for action in actions.iter_mut() {
            let Action::Transmit { handle, frame, profile } = action else {
                continue;
            };
            self.inflight.insert(*handle, profile.kind);
            if !frame.is_broadcast() || frame.frame.header.radius <= 1 {
                continue;
            }
            let mut expected = self.neighbors.relay_slots();
            for heard_from in [rx.map(|r| r.link_source), Some(frame.frame.header.src)]
                .into_iter()
                .flatten()
            {
                if let Some(slot) = self.neighbors.slot_of(heard_from) {
                    expected &= !slot.bit();
                }
            }
            if expected == 0 {
                continue;
            }
            match self.passive_ack.begin_tracking(
                *handle,
                frame.frame.header.src,
                frame.frame.header.seq,
                expected,
                now,
            ) {
                Ok(()) => profile.tracked = true,
                Err(e) => warn!(%handle, error = %e, "broadcast sent without passive ack"),
            }
        }
        actions
    }
}
