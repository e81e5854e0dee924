//! Join and rejoin state machine.
//!
//! ```text
//! Idle -> Discovery -> SelectCandidate -> Associating | Rejoining
//!      -> AssignAddress -> FinalizeBeacon -> Idle
//! ```
//! Scans and association/rejoin sub-requests are each bounded by the
//! `attempts` given to [`JoinManager::start`]. Every started join ends in
//! exactly one `NetworkEntered` or `JoinFailed` notification.

use std::cmp::Reverse;

use lowmesh_core::{
    ChannelMask, Command, JoinResponse, JoinStatus, NwkHeader, ShortAddr,
};
use tracing::{debug, info, trace};

use crate::action::{Action, Beacon, LinkRequest, NwkEvent};
use crate::config::NwkConfig;
use crate::error::JoinError;
use crate::neighbor::{Neighbor, NeighborTable, Relationship};
use crate::nib::{DeviceRole, Nib};
use crate::outbox::{command_frame, transmit};
use crate::transport::{DelayClass, LinkAddr, TxHandle, TxKind, TxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Associate,
    Rejoin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    Discovery,
    SelectCandidate,
    Associating {
        parent: Beacon,
        handle: TxHandle,
        deadline: u64,
    },
    Rejoining {
        parent: Beacon,
        handle: TxHandle,
        deadline: u64,
    },
    AssignAddress,
    /// Joined; waiting for the stack to publish our beacon.
    FinalizeBeacon {
        parent: ShortAddr,
    },
}

/// Candidate ordering: router capacity, open for joining, link quality,
/// then lowest channel and lowest address.
pub fn rank_candidates(candidates: &mut [Beacon]) {
    candidates.sort_by_key(|b| {
        (
            Reverse(b.router_capacity),
            Reverse(b.permit_joining),
            Reverse(b.lqi),
            b.channel,
            b.short,
        )
    });
}

#[derive(Debug, Clone)]
pub struct JoinManager {
    state: JoinState,
    mode: JoinMode,
    attempts: u8,
    scans: u8,
    requests: u8,
    channels: ChannelMask,
    candidates: Vec<Beacon>,
    scan_duration: u8,
    response_timeout_ms: u64,
    max_depth: u8,
}

impl JoinManager {
    pub fn new(config: &NwkConfig) -> Self {
        Self {
            state: JoinState::Idle,
            mode: JoinMode::Associate,
            attempts: 0,
            scans: 0,
            requests: 0,
            channels: ChannelMask(0),
            candidates: Vec::new(),
            scan_duration: config.scan_duration,
            response_timeout_ms: config.association_timeout_ms,
            max_depth: config.max_depth,
        }
    }

    pub fn state(&self) -> &JoinState {
        &self.state
    }

    pub fn mode(&self) -> JoinMode {
        self.mode
    }

    pub fn is_idle(&self) -> bool {
        self.state == JoinState::Idle
    }

    /// Number of association or rejoin requests sent for the current join.
    pub fn requests_sent(&self) -> u8 {
        self.requests
    }

    pub fn start(
        &mut self,
        mode: JoinMode,
        attempts: u8,
        channels: ChannelMask,
        nib: &Nib,
    ) -> Result<Vec<Action>, JoinError> {
        if !self.is_idle() {
            return Err(JoinError::AlreadyInProgress);
        }
        if nib.role == DeviceRole::Coordinator {
            return Err(JoinError::InvalidRole("coordinator forms networks, it does not join"));
        }
        match mode {
            JoinMode::Associate if nib.joined => return Err(JoinError::AlreadyJoined),
            JoinMode::Rejoin if nib.pan_id.0 == 0xFFFF => return Err(JoinError::NotJoined),
            _ => {}
        }

        self.mode = mode;
        self.attempts = attempts.max(1);
        self.scans = 0;
        self.requests = 0;
        self.channels = channels;
        self.candidates.clear();
        info!(?mode, attempts = self.attempts, channels = channels.0, "join started");
        Ok(vec![self.scan()])
    }

    fn scan(&mut self) -> Action {
        self.state = JoinState::Discovery;
        let duration = self.scan_duration.saturating_add(self.scans);
        self.scans += 1;
        debug!(scan = self.scans, duration, "network discovery scan");
        Action::Link(LinkRequest::Scan {
            channels: self.channels,
            duration,
        })
    }

    fn joinable(&self, beacon: &Beacon, nib: &Nib) -> bool {
        let capacity = if nib.role.is_router() {
            beacon.router_capacity
        } else {
            beacon.end_device_capacity
        };
        let reachable = beacon.depth < self.max_depth && self.channels.contains(beacon.channel);
        match self.mode {
            JoinMode::Associate => beacon.permit_joining && capacity && reachable,
            JoinMode::Rejoin => beacon.pan_id == nib.pan_id && capacity && reachable,
        }
    }

    /// Scan results arrived.
    pub fn on_scan_complete<N: NeighborTable>(
        &mut self,
        beacons: &[Beacon],
        nib: &mut Nib,
        neighbors: &mut N,
        now: u64,
    ) -> Vec<Action> {
        if self.state != JoinState::Discovery {
            trace!("scan result outside discovery, ignoring");
            return Vec::new();
        }

        for b in beacons {
            if b.short == nib.short_addr && b.pan_id == nib.pan_id {
                continue;
            }
            let known = Neighbor {
                ext: Some(b.ext),
                depth: b.depth,
                last_heard: now,
                ..Neighbor::router(b.short, Relationship::Unknown, b.lqi)
            };
            if neighbors.get(b.short).is_none_or(|n| n.relationship == Relationship::Unknown) {
                // The candidate list below does not depend on it.
                if let Err(e) = neighbors.upsert(known) {
                    trace!(short = %b.short, error = %e, "candidate not recorded as neighbor");
                }
            }
        }

        self.candidates = beacons
            .iter()
            .filter(|b| self.joinable(b, nib))
            .copied()
            .collect();
        rank_candidates(&mut self.candidates);
        debug!(found = beacons.len(), candidates = self.candidates.len(), "scan complete");

        if self.candidates.is_empty() {
            if self.scans < self.attempts {
                return vec![self.scan()];
            }
            return self.fail("no suitable parent found");
        }
        self.state = JoinState::SelectCandidate;
        self.try_next(nib, now)
    }

    /// Send a request to the best remaining candidate. With the candidate
    /// list used up, scan again while both budgets allow it.
    fn try_next(&mut self, nib: &mut Nib, now: u64) -> Vec<Action> {
        if self.requests >= self.attempts {
            return self.fail("join attempts exhausted");
        }
        if self.candidates.is_empty() {
            if self.scans < self.attempts {
                debug!(requests = self.requests, "candidates exhausted, scanning again");
                return vec![self.scan()];
            }
            return self.fail("join attempts exhausted");
        }
        let parent = self.candidates.remove(0);
        self.requests += 1;

        let capability = nib.capability();
        let (command, kind) = match self.mode {
            JoinMode::Associate => (
                Command::AssociationRequest(capability),
                TxKind::AssociationRequest {
                    parent: parent.short,
                },
            ),
            JoinMode::Rejoin => (
                Command::RejoinRequest(capability),
                TxKind::RejoinRequest {
                    parent: parent.short,
                },
            ),
        };
        let mut frame = command_frame(nib, parent.short, 1, command);
        frame.header = frame.header.with_src_ext(nib.ext_addr);
        let (handle, action) = transmit(
            nib,
            LinkAddr::Short(parent.short),
            frame,
            kind,
            DelayClass::UnicastCommand,
        );
        let deadline = now + self.response_timeout_ms;
        debug!(parent = %parent.short, attempt = self.requests, %handle, "requesting membership");
        self.state = match self.mode {
            JoinMode::Associate => JoinState::Associating {
                parent,
                handle,
                deadline,
            },
            JoinMode::Rejoin => JoinState::Rejoining {
                parent,
                handle,
                deadline,
            },
        };
        vec![action]
    }

    fn pending(&self) -> Option<(Beacon, TxHandle, u64)> {
        match self.state {
            JoinState::Associating {
                parent,
                handle,
                deadline,
            }
            | JoinState::Rejoining {
                parent,
                handle,
                deadline,
            } => Some((parent, handle, deadline)),
            _ => None,
        }
    }

    fn fail(&mut self, reason: &str) -> Vec<Action> {
        info!(reason, mode = ?self.mode, "join failed");
        self.state = JoinState::Idle;
        self.candidates.clear();
        vec![Action::Notify(NwkEvent::JoinFailed {
            rejoin: self.mode == JoinMode::Rejoin,
        })]
    }

    /// Delivery status of our association or rejoin request.
    pub fn on_tx_confirm(
        &mut self,
        handle: TxHandle,
        status: TxStatus,
        nib: &mut Nib,
        now: u64,
    ) -> Vec<Action> {
        match self.pending() {
            Some((parent, pending, _)) if pending == handle => {
                if status.is_success() {
                    return Vec::new();
                }
                debug!(parent = %parent.short, ?status, "membership request not delivered");
                self.try_next(nib, now)
            }
            _ => Vec::new(),
        }
    }

    /// Association or rejoin response from a prospective parent.
    pub fn on_response<N: NeighborTable>(
        &mut self,
        header: &NwkHeader,
        response: JoinResponse,
        rejoin: bool,
        nib: &mut Nib,
        neighbors: &mut N,
        now: u64,
    ) -> Vec<Action> {
        let Some((parent, _, _)) = self.pending() else {
            trace!("unsolicited join response");
            return Vec::new();
        };
        let expected_mode = if rejoin {
            JoinMode::Rejoin
        } else {
            JoinMode::Associate
        };
        if self.mode != expected_mode
            || header.src != parent.short
            || header.dst_ext.is_some_and(|ext| ext != nib.ext_addr)
        {
            trace!(src = %header.src, "join response from unexpected parent");
            return Vec::new();
        }
        if response.status != JoinStatus::Success || !response.short.is_unicast() {
            debug!(parent = %parent.short, status = ?response.status, "membership refused");
            return self.try_next(nib, now);
        }

        self.state = JoinState::AssignAddress;
        nib.short_addr = response.short;
        nib.pan_id = parent.pan_id;
        nib.channel = parent.channel;
        nib.depth = parent.depth + 1;
        nib.joined = true;

        let stale_parents: Vec<ShortAddr> = neighbors
            .iter()
            .filter(|n| n.relationship == Relationship::Parent && n.short != parent.short)
            .map(|n| n.short)
            .collect();
        for old in stale_parents {
            neighbors.remove(old);
        }
        let entry = Neighbor {
            ext: Some(parent.ext),
            depth: parent.depth,
            last_heard: now,
            ..Neighbor::router(parent.short, Relationship::Parent, parent.lqi)
        };
        if neighbors.upsert(entry).is_err() {
            debug!(parent = %parent.short, "neighbor table full, parent not recorded");
        }

        self.candidates.clear();
        self.state = JoinState::FinalizeBeacon {
            parent: parent.short,
        };
        vec![Action::Link(LinkRequest::Start {
            pan_id: nib.pan_id,
            channel: nib.channel,
            short: nib.short_addr,
        })]
    }

    /// Complete a successful join. Routers publish `beacon`.
    pub fn finalize(&mut self, beacon: Option<Beacon>, nib: &Nib) -> Vec<Action> {
        let JoinState::FinalizeBeacon { parent } = self.state else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        if let Some(beacon) = beacon {
            actions.push(Action::Link(LinkRequest::UpdateBeacon(beacon)));
        }
        info!(short = %nib.short_addr, parent = %parent, pan = %nib.pan_id, "network entered");
        actions.push(Action::Notify(NwkEvent::NetworkEntered {
            short: nib.short_addr,
            parent,
            pan_id: nib.pan_id,
            channel: nib.channel,
            rejoined: self.mode == JoinMode::Rejoin,
        }));
        self.state = JoinState::Idle;
        actions
    }

    /// Response timeout handling.
    pub fn task(&mut self, nib: &mut Nib, now: u64) -> Vec<Action> {
        match self.pending() {
            Some((parent, _, deadline)) if now >= deadline => {
                debug!(parent = %parent.short, "membership response timed out");
                self.try_next(nib, now)
            }
            _ => Vec::new(),
        }
    }
}
