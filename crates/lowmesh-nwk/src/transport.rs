//! Frame transport seam: handles, transmission profiles and delivery status.
//!
//! The engine never transmits by itself. It hands an [`OutgoingFrame`] and a
//! [`TxProfile`] to the frame transport facade and later receives exactly one
//! confirmation per handle through `NwkStack::on_tx_confirm`.

use core::fmt;

use lowmesh_core::{ExtAddr, Frame, ShortAddr};

/// Opaque identifier of one queued transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHandle(pub u32);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Link-layer destination of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkAddr {
    Short(ShortAddr),
    /// Used before the peer owns a short address (association).
    Ext(ExtAddr),
}

impl LinkAddr {
    pub fn is_broadcast(self) -> bool {
        matches!(self, LinkAddr::Short(s) if s.is_broadcast())
    }
}

/// Jitter class the facade applies before putting a frame on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayClass {
    UnicastCommand,
    InitialBroadcast,
    BroadcastRetry,
    RetriedRouteRequest,
    RouteReply,
}

impl DelayClass {
    /// Inclusive jitter window in milliseconds.
    pub fn jitter_window_ms(self) -> (u64, u64) {
        match self {
            DelayClass::UnicastCommand => (0, 4),
            DelayClass::InitialBroadcast => (0, 64),
            DelayClass::BroadcastRetry => (0, 64),
            DelayClass::RetriedRouteRequest => (2, 128),
            DelayClass::RouteReply => (0, 16),
        }
    }
}

/// What a transmission is for. Carries what the owner needs to interpret
/// the confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    RouteRequest {
        initiator: ShortAddr,
        id: u8,
        originated: bool,
    },
    RouteReply {
        originator: ShortAddr,
        id: u8,
    },
    RouteRecord {
        destination: ShortAddr,
    },
    /// `child` is `None` for our own leave announcement.
    Leave {
        child: Option<ShortAddr>,
    },
    AssociationRequest {
        parent: ShortAddr,
    },
    RejoinRequest {
        parent: ShortAddr,
    },
    AssociationResponse {
        child: ExtAddr,
    },
    RejoinResponse {
        child: ExtAddr,
    },
    NetworkStatus {
        destination: ShortAddr,
    },
    /// A unicast frame forwarded on behalf of another device.
    /// Data frame originated here.
    Data {
        destination: ShortAddr,
    },
    /// Unicast frame forwarded on behalf of another device.
    Relay {
        destination: ShortAddr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxProfile {
    pub kind: TxKind,
    pub delay: DelayClass,
    /// Set on broadcasts that passive acknowledgement follows. The facade
    /// holds such frames for `Retransmit`/`StopRetries` instead of
    /// confirming right after the first transmission.
    pub tracked: bool,
}

impl TxProfile {
    pub fn new(kind: TxKind, delay: DelayClass) -> Self {
        Self {
            kind,
            delay,
            tracked: false,
        }
    }
}

/// Final delivery status reported by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    NoAck,
    ChannelAccessFailure,
    /// Dropped before transmission (queue flush, reset).
    Dropped,
}

impl TxStatus {
    pub fn is_success(self) -> bool {
        self == TxStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub next_hop: LinkAddr,
    pub frame: Frame,
}

impl OutgoingFrame {
    pub fn new(next_hop: LinkAddr, frame: Frame) -> Self {
        Self { next_hop, frame }
    }

    pub fn is_broadcast(&self) -> bool {
        self.next_hop.is_broadcast()
    }
}

/// Link-layer metadata accompanying a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxMeta {
    /// Link-layer sender, `UNASSIGNED` when the sender had no short address.
    pub link_source: ShortAddr,
    pub lqi: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_addr_broadcast() {
        assert!(LinkAddr::Short(ShortAddr::BROADCAST_ALL).is_broadcast());
        assert!(LinkAddr::Short(ShortAddr::BROADCAST_ROUTERS).is_broadcast());
        assert!(!LinkAddr::Short(ShortAddr(0x0001)).is_broadcast());
        assert!(!LinkAddr::Ext(ExtAddr(0xFFFF)).is_broadcast());
    }

    #[test]
    fn test_jitter_windows_are_ordered() {
        for class in [
            DelayClass::UnicastCommand,
            DelayClass::InitialBroadcast,
            DelayClass::BroadcastRetry,
            DelayClass::RetriedRouteRequest,
            DelayClass::RouteReply,
        ] {
            let (lo, hi) = class.jitter_window_ms();
            assert!(lo <= hi, "{class:?}");
        }
    }
}
