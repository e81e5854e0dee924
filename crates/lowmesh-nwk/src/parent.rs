//! Parent side of association and rejoin.

use lowmesh_core::{Capability, Command, ExtAddr, Frame, JoinResponse, JoinStatus, NwkHeader, ShortAddr};
use rand::Rng;
use tracing::{debug, info, trace};

use crate::action::{Action, NwkEvent};
use crate::config::NwkConfig;
use crate::neighbor::{Neighbor, NeighborTable, Relationship};
use crate::nib::Nib;
use crate::outbox::transmit;
use crate::transport::{DelayClass, LinkAddr, RxMeta, TxKind};

const RANDOM_ADDRESS_TRIES: usize = 32;

/// Pick an unused short address for a new child.
pub fn allocate_address<N: NeighborTable, R: Rng>(rng: &mut R, nib: &Nib, neighbors: &N) -> Option<ShortAddr> {
    let free = |candidate: ShortAddr| candidate != nib.short_addr && !neighbors.contains(candidate);
    for _ in 0..RANDOM_ADDRESS_TRIES {
        let candidate = ShortAddr(rng.gen_range(0x0001..=ShortAddr::MAX_ASSIGNABLE.0));
        if free(candidate) {
            return Some(candidate);
        }
    }
    (0x0001..=ShortAddr::MAX_ASSIGNABLE.0).map(ShortAddr).find(|&c| free(c))
}

fn admit<N: NeighborTable>(
    capability: Capability,
    existing: Option<ShortAddr>,
    rejoin: bool,
    nib: &Nib,
    neighbors: &N,
    config: &NwkConfig,
    now: u64,
) -> JoinStatus {
    if existing.is_some() {
        return JoinStatus::Success;
    }
    if !rejoin && !nib.permit_joining(now) {
        return JoinStatus::PanAccessDenied;
    }
    let (routers, end_devices) = neighbors.child_counts();
    let full = if capability.router {
        routers >= config.max_router_children
    } else {
        end_devices >= config.max_end_device_children
    };
    if full || nib.depth >= config.max_depth {
        return JoinStatus::PanAtCapacity;
    }
    JoinStatus::Success
}

/// Answer an association or rejoin request from a prospective child.
#[allow(clippy::too_many_arguments)]
pub fn on_join_request<N: NeighborTable, R: Rng>(
    header: &NwkHeader,
    capability: Capability,
    rejoin: bool,
    rx: RxMeta,
    nib: &mut Nib,
    neighbors: &mut N,
    config: &NwkConfig,
    rng: &mut R,
    now: u64,
) -> Vec<Action> {
    if !nib.joined || !nib.role.is_router() {
        trace!("not a joined router, ignoring membership request");
        return Vec::new();
    }
    let Some(ext) = header.src_ext else {
        debug!(src = %header.src, "membership request without extended source");
        return Vec::new();
    };

    let existing = neighbors
        .find_ext(ext)
        .filter(|n| n.relationship == Relationship::Child)
        .map(|n| n.short);
    let mut status = admit(capability, existing, rejoin, nib, &*neighbors, config, now);

    let mut short = ShortAddr::UNASSIGNED;
    if status == JoinStatus::Success {
        let reclaimed = existing.or_else(|| {
            let keep = header.src;
            (rejoin && keep.is_unicast() && keep != nib.short_addr && !neighbors.contains(keep)).then_some(keep)
        });
        match reclaimed.or_else(|| allocate_address(rng, nib, &*neighbors)) {
            Some(addr) => {
                let child = Neighbor {
                    ext: Some(ext),
                    router: capability.router,
                    rx_on_when_idle: capability.rx_on_when_idle,
                    depth: nib.depth + 1,
                    lqi: rx.lqi,
                    parent: Some(nib.short_addr),
                    last_heard: now,
                    ..Neighbor::new(addr, Relationship::Child)
                };
                if neighbors.upsert(child).is_ok() {
                    short = addr;
                } else {
                    status = JoinStatus::PanAtCapacity;
                }
            }
            None => status = JoinStatus::PanAtCapacity,
        }
    }

    let response = JoinResponse { short, status };
    let (command, kind) = if rejoin {
        (Command::RejoinResponse(response), TxKind::RejoinResponse { child: ext })
    } else {
        (Command::AssociationResponse(response), TxKind::AssociationResponse { child: ext })
    };
    let header = NwkHeader::command(short, nib.short_addr, 1, nib.next_seq()).with_dst_ext(ext);
    let (handle, action) = transmit(
        nib,
        LinkAddr::Ext(ext),
        Frame::command(header, command),
        kind,
        DelayClass::UnicastCommand,
    );

    let mut actions = vec![action];
    if status == JoinStatus::Success {
        info!(%short, %ext, rejoin, %handle, "child admitted");
        actions.push(Action::Notify(NwkEvent::ChildJoined {
            short,
            ext,
            rejoined: rejoin,
        }));
    } else {
        debug!(%ext, ?status, "membership refused");
    }
    actions
}

/// Known child with the given extended address.
pub fn child_by_ext<N: NeighborTable>(neighbors: &N, ext: ExtAddr) -> Option<ShortAddr> {
    neighbors
        .find_ext(ext)
        .filter(|n| n.relationship == Relationship::Child)
        .map(|n| n.short)
}
