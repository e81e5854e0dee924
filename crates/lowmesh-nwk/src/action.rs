//! Outputs of the engine: transmissions, link-layer requests and
//! upper-layer notifications.

use lowmesh_core::{ChannelMask, ExtAddr, NetworkStatusCode, PanId, ShortAddr};

use crate::transport::{OutgoingFrame, TxHandle, TxProfile};

/// Beacon payload as published by a router and collected by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub pan_id: PanId,
    pub channel: u8,
    pub short: ShortAddr,
    pub ext: ExtAddr,
    pub depth: u8,
    pub router_capacity: bool,
    pub end_device_capacity: bool,
    pub permit_joining: bool,
    /// Link quality the scanning device measured for this beacon.
    pub lqi: u8,
}

/// Requests to the link layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// Collect beacons on `channels`; results arrive via `on_scan_complete`.
    Scan { channels: ChannelMask, duration: u8 },
    /// Adopt a network identity after formation or join.
    Start {
        pan_id: PanId,
        channel: u8,
        short: ShortAddr,
    },
    UpdateBeacon(Beacon),
    /// Drop the association state (leave).
    Reset,
}

/// Upper-layer notifications. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwkEvent {
    NetworkFormed {
        pan_id: PanId,
        channel: u8,
    },
    NetworkEntered {
        short: ShortAddr,
        parent: ShortAddr,
        pan_id: PanId,
        channel: u8,
        rejoined: bool,
    },
    JoinFailed {
        rejoin: bool,
    },
    ChildJoined {
        short: ShortAddr,
        ext: ExtAddr,
        rejoined: bool,
    },
    RouteDiscovered {
        destination: ShortAddr,
        next_hop: ShortAddr,
        cost: u8,
    },
    RouteDiscoveryFailed {
        destination: ShortAddr,
    },
    RouteRecordDelivered {
        source: ShortAddr,
        relays: Vec<ShortAddr>,
        truncated: bool,
    },
    NetworkStatus {
        source: ShortAddr,
        code: NetworkStatusCode,
        destination: ShortAddr,
    },
    DataIndication {
        source: ShortAddr,
        payload: Vec<u8>,
    },
    LeaveComplete {
        address: ShortAddr,
        is_self: bool,
        rejoin: bool,
    },
    ParentLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Transmit {
        handle: TxHandle,
        frame: OutgoingFrame,
        profile: TxProfile,
    },
    /// Repeat a held broadcast.
    Retransmit { handle: TxHandle },
    /// Release a held broadcast; the facade confirms it.
    StopRetries { handle: TxHandle },
    Link(LinkRequest),
    Notify(NwkEvent),
}
