//! Command frame payloads.
//!
//! Every command payload starts with its one-byte [`CommandId`]. Payload
//! layouts (little-endian):
//! ```text
//! ROUTE_REQUEST   0x01 options(1) id(1) dst(2) path_cost(1) [dst_ieee(8)]
//! ROUTE_REPLY     0x02 options(1) id(1) originator(2) responder(2) path_cost(1)
//! NETWORK_STATUS  0x03 code(1) dst(2)
//! LEAVE           0x04 options(1)
//! ROUTE_RECORD    0x05 options(1) relay_count(1) relays(2 * relay_count)
//! REJOIN_REQ      0x06 capability(1)
//! REJOIN_RSP      0x07 short(2) status(1)
//! ASSOC_REQ       0x0C capability(1)
//! ASSOC_RSP       0x0D short(2) status(1)
//! ```

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{CommandId, EXT_ADDR_SIZE, JoinStatus, NetworkStatusCode};
use crate::error::{FrameError, ensure_len};
use crate::types::{ExtAddr, ShortAddr};

const RREQ_MANY_TO_ONE_SHIFT: u8 = 3;
const RREQ_MANY_TO_ONE_MASK: u8 = 0x18;
const RREQ_DST_IEEE: u8 = 1 << 5;
const RREQ_MULTICAST: u8 = 1 << 6;

const LEAVE_REJOIN: u8 = 1 << 5;
const LEAVE_REQUEST: u8 = 1 << 6;
const LEAVE_REMOVE_CHILDREN: u8 = 1 << 7;

const ROUTE_RECORD_TRUNCATED: u8 = 1 << 0;

const CAP_ROUTER: u8 = 1 << 1;
const CAP_MAINS_POWERED: u8 = 1 << 2;
const CAP_RX_ON_WHEN_IDLE: u8 = 1 << 3;
const CAP_ALLOCATE_ADDRESS: u8 = 1 << 7;

/// Many-to-one mode of a route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ManyToOne {
    /// Ordinary mesh route request toward a single destination.
    None = 0,
    /// Concentrator keeps a source-route cache.
    WithRouteCache = 1,
    /// Concentrator has no room for source routes; relays must not expect records.
    NoRouteCache = 2,
}

impl ManyToOne {
    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(ManyToOne::None),
            1 => Ok(ManyToOne::WithRouteCache),
            2 => Ok(ManyToOne::NoRouteCache),
            _ => Err(FrameError::InvalidManyToOne(v)),
        }
    }

    pub fn is_many_to_one(self) -> bool {
        self != ManyToOne::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub many_to_one: ManyToOne,
    pub multicast: bool,
    pub id: u8,
    pub destination: ShortAddr,
    pub path_cost: u8,
    pub destination_ext: Option<ExtAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReply {
    pub id: u8,
    pub originator: ShortAddr,
    pub responder: ShortAddr,
    pub path_cost: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatus {
    pub code: NetworkStatusCode,
    pub destination: ShortAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaveCommand {
    pub rejoin: bool,
    /// Set when a parent asks the receiver to leave; clear when the sender announces its own leave.
    pub request: bool,
    pub remove_children: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteRecord {
    pub truncated: bool,
    pub relays: Vec<ShortAddr>,
}

/// Device capability advertised in association and rejoin requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability {
    pub router: bool,
    pub mains_powered: bool,
    pub rx_on_when_idle: bool,
}

impl Capability {
    pub fn to_byte(self) -> u8 {
        CAP_ALLOCATE_ADDRESS
            | if self.router { CAP_ROUTER } else { 0 }
            | if self.mains_powered { CAP_MAINS_POWERED } else { 0 }
            | if self.rx_on_when_idle { CAP_RX_ON_WHEN_IDLE } else { 0 }
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            router: b & CAP_ROUTER != 0,
            mains_powered: b & CAP_MAINS_POWERED != 0,
            rx_on_when_idle: b & CAP_RX_ON_WHEN_IDLE != 0,
        }
    }
}

/// Payload of association and rejoin responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinResponse {
    pub short: ShortAddr,
    pub status: JoinStatus,
}

/// A decoded network command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    NetworkStatus(NetworkStatus),
    Leave(LeaveCommand),
    RouteRecord(RouteRecord),
    RejoinRequest(Capability),
    RejoinResponse(JoinResponse),
    AssociationRequest(Capability),
    AssociationResponse(JoinResponse),
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::RouteRequest(_) => CommandId::RouteRequest,
            Command::RouteReply(_) => CommandId::RouteReply,
            Command::NetworkStatus(_) => CommandId::NetworkStatus,
            Command::Leave(_) => CommandId::Leave,
            Command::RouteRecord(_) => CommandId::RouteRecord,
            Command::RejoinRequest(_) => CommandId::RejoinRequest,
            Command::RejoinResponse(_) => CommandId::RejoinResponse,
            Command::AssociationRequest(_) => CommandId::AssociationRequest,
            Command::AssociationResponse(_) => CommandId::AssociationResponse,
        }
    }

    /// Append the encoded payload (including the command identifier) to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.id() as u8);
        match self {
            Command::RouteRequest(req) => {
                let mut options = (req.many_to_one as u8) << RREQ_MANY_TO_ONE_SHIFT;
                if req.destination_ext.is_some() {
                    options |= RREQ_DST_IEEE;
                }
                if req.multicast {
                    options |= RREQ_MULTICAST;
                }
                out.push(options);
                out.push(req.id);
                out.extend_from_slice(&req.destination.to_le_bytes());
                out.push(req.path_cost);
                if let Some(ext) = req.destination_ext {
                    out.extend_from_slice(&ext.to_le_bytes());
                }
            }
            Command::RouteReply(rep) => {
                out.push(0);
                out.push(rep.id);
                out.extend_from_slice(&rep.originator.to_le_bytes());
                out.extend_from_slice(&rep.responder.to_le_bytes());
                out.push(rep.path_cost);
            }
            Command::NetworkStatus(status) => {
                out.push(status.code.to_u8());
                out.extend_from_slice(&status.destination.to_le_bytes());
            }
            Command::Leave(leave) => {
                let mut options = 0;
                if leave.rejoin {
                    options |= LEAVE_REJOIN;
                }
                if leave.request {
                    options |= LEAVE_REQUEST;
                }
                if leave.remove_children {
                    options |= LEAVE_REMOVE_CHILDREN;
                }
                out.push(options);
            }
            Command::RouteRecord(record) => {
                out.push(if record.truncated {
                    ROUTE_RECORD_TRUNCATED
                } else {
                    0
                });
                out.push(record.relays.len() as u8);
                for relay in &record.relays {
                    out.extend_from_slice(&relay.to_le_bytes());
                }
            }
            Command::RejoinRequest(cap) | Command::AssociationRequest(cap) => {
                out.push(cap.to_byte());
            }
            Command::RejoinResponse(rsp) | Command::AssociationResponse(rsp) => {
                out.extend_from_slice(&rsp.short.to_le_bytes());
                out.push(rsp.status as u8);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Decode a command payload. Trailing bytes beyond the layout are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        ensure_len(payload, 1)?;
        let id = CommandId::from_u8(payload[0])?;
        let body = &payload[1..];
        let short_at = |i: usize| ShortAddr::from_le_bytes([body[i], body[i + 1]]);

        let command = match id {
            CommandId::RouteRequest => {
                ensure_len(payload, 6)?;
                let options = body[0];
                let many_to_one =
                    ManyToOne::from_u8((options & RREQ_MANY_TO_ONE_MASK) >> RREQ_MANY_TO_ONE_SHIFT)?;
                let destination_ext = if options & RREQ_DST_IEEE != 0 {
                    ensure_len(payload, 6 + EXT_ADDR_SIZE)?;
                    let bytes: [u8; 8] = body[5..13].try_into().expect("slice is exactly 8 bytes");
                    Some(ExtAddr::from_le_bytes(bytes))
                } else {
                    None
                };
                Command::RouteRequest(RouteRequest {
                    many_to_one,
                    multicast: options & RREQ_MULTICAST != 0,
                    id: body[1],
                    destination: short_at(2),
                    path_cost: body[4],
                    destination_ext,
                })
            }
            CommandId::RouteReply => {
                ensure_len(payload, 8)?;
                Command::RouteReply(RouteReply {
                    id: body[1],
                    originator: short_at(2),
                    responder: short_at(4),
                    path_cost: body[6],
                })
            }
            CommandId::NetworkStatus => {
                ensure_len(payload, 4)?;
                Command::NetworkStatus(NetworkStatus {
                    code: NetworkStatusCode::from_u8(body[0]),
                    destination: short_at(1),
                })
            }
            CommandId::Leave => {
                ensure_len(payload, 2)?;
                let options = body[0];
                Command::Leave(LeaveCommand {
                    rejoin: options & LEAVE_REJOIN != 0,
                    request: options & LEAVE_REQUEST != 0,
                    remove_children: options & LEAVE_REMOVE_CHILDREN != 0,
                })
            }
            CommandId::RouteRecord => {
                ensure_len(payload, 3)?;
                let count = body[1] as usize;
                ensure_len(payload, 3 + 2 * count)?;
                let relays = body[2..2 + 2 * count]
                    .chunks_exact(2)
                    .map(|c| ShortAddr::from_le_bytes([c[0], c[1]]))
                    .collect();
                Command::RouteRecord(RouteRecord {
                    truncated: body[0] & ROUTE_RECORD_TRUNCATED != 0,
                    relays,
                })
            }
            CommandId::RejoinRequest | CommandId::AssociationRequest => {
                ensure_len(payload, 2)?;
                let cap = Capability::from_byte(body[0]);
                if id == CommandId::RejoinRequest {
                    Command::RejoinRequest(cap)
                } else {
                    Command::AssociationRequest(cap)
                }
            }
            CommandId::RejoinResponse | CommandId::AssociationResponse => {
                ensure_len(payload, 4)?;
                let rsp = JoinResponse {
                    short: short_at(0),
                    status: JoinStatus::from_u8(body[2]),
                };
                if id == CommandId::RejoinResponse {
                    Command::RejoinResponse(rsp)
                } else {
                    Command::AssociationResponse(rsp)
                }
            }
        };
        Ok(command)
    }
}
