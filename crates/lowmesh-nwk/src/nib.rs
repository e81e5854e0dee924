//! Network information base: this device's identity and counters.

use lowmesh_core::{Capability, ExtAddr, PanId, ShortAddr};

use crate::transport::TxHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Coordinator,
    Router,
    EndDevice,
}

impl DeviceRole {
    /// Coordinators and routers relay frames and take part in route discovery.
    pub fn is_router(self) -> bool {
        matches!(self, DeviceRole::Coordinator | DeviceRole::Router)
    }
}

#[derive(Debug, Clone)]
pub struct Nib {
    pub ext_addr: ExtAddr,
    pub role: DeviceRole,
    pub short_addr: ShortAddr,
    pub pan_id: PanId,
    pub channel: u8,
    pub depth: u8,
    pub joined: bool,
    /// Joining is permitted until this time (ms). Zero means closed.
    pub permit_joining_until: u64,
    seq: u8,
    route_request_id: u8,
    next_handle: u32,
}

impl Nib {
    pub fn new(ext_addr: ExtAddr, role: DeviceRole) -> Self {
        Self {
            ext_addr,
            role,
            short_addr: ShortAddr::UNASSIGNED,
            pan_id: PanId(0xFFFF),
            channel: 0,
            depth: 0,
            joined: false,
            permit_joining_until: 0,
            seq: 0,
            route_request_id: 0,
            next_handle: 1,
        }
    }

    /// Next network-header sequence number.
    pub fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn next_route_request_id(&mut self) -> u8 {
        self.route_request_id = self.route_request_id.wrapping_add(1);
        self.route_request_id
    }

    pub fn next_handle(&mut self) -> TxHandle {
        let handle = TxHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    pub fn capability(&self) -> Capability {
        Capability {
            router: self.role.is_router(),
            mains_powered: self.role.is_router(),
            rx_on_when_idle: self.role.is_router(),
        }
    }

    pub fn permit_joining(&self, now: u64) -> bool {
        self.joined && self.role.is_router() && now < self.permit_joining_until
    }

    /// Forget the current membership. The PAN id and channel survive so a
    /// later rejoin knows where to look.
    pub fn reset(&mut self) {
        self.short_addr = ShortAddr::UNASSIGNED;
        self.depth = 0;
        self.joined = false;
        self.permit_joining_until = 0;
    }
}
