//! Protocol constants and enumerations for the network layer.

use crate::error::FrameError;

// Wire format sizes
pub const PROTOCOL_VERSION: u8 = 2;
/// frame control(2) + dst(2) + src(2) + radius(1) + seq(1)
pub const HEADER_MIN_SIZE: usize = 8;
pub const EXT_ADDR_SIZE: usize = 8;
pub const MAX_FRAME_SIZE: usize = 127;

// Topology defaults
pub const DEFAULT_MAX_DEPTH: u8 = 15;
/// Flood radius: twice the maximum tree depth.
pub const DEFAULT_RADIUS: u8 = 2 * DEFAULT_MAX_DEPTH;

// Path cost
pub const MIN_LINK_COST: u8 = 1;
pub const MAX_LINK_COST: u8 = 7;
/// Residual cost of a discovery entry that has not seen a reply yet.
pub const UNKNOWN_PATH_COST: u8 = u8::MAX;

/// Upper bound on relays carried by a route record or source-route subframe.
pub const MAX_SOURCE_ROUTE_RELAYS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    Command = 1,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Command),
            _ => Err(FrameError::InvalidFrameType(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoverRoute {
    Suppress = 0,
    Enable = 1,
}

impl DiscoverRoute {
    pub fn from_bits(v: u8) -> Self {
        if v & 0x03 == 0 {
            DiscoverRoute::Suppress
        } else {
            DiscoverRoute::Enable
        }
    }
}

/// Network command identifiers (first byte of a command payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    RouteRequest = 0x01,
    RouteReply = 0x02,
    NetworkStatus = 0x03,
    Leave = 0x04,
    RouteRecord = 0x05,
    RejoinRequest = 0x06,
    RejoinResponse = 0x07,
    AssociationRequest = 0x0C,
    AssociationResponse = 0x0D,
}

impl CommandId {
    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0x01 => Ok(CommandId::RouteRequest),
            0x02 => Ok(CommandId::RouteReply),
            0x03 => Ok(CommandId::NetworkStatus),
            0x04 => Ok(CommandId::Leave),
            0x05 => Ok(CommandId::RouteRecord),
            0x06 => Ok(CommandId::RejoinRequest),
            0x07 => Ok(CommandId::RejoinResponse),
            0x0C => Ok(CommandId::AssociationRequest),
            0x0D => Ok(CommandId::AssociationResponse),
            _ => Err(FrameError::UnknownCommand(v)),
        }
    }
}

/// Status carried by association and rejoin responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinStatus {
    Success = 0x00,
    PanAtCapacity = 0x01,
    PanAccessDenied = 0x02,
}

impl JoinStatus {
    /// Unknown codes are treated as a denial.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => JoinStatus::Success,
            0x01 => JoinStatus::PanAtCapacity,
            _ => JoinStatus::PanAccessDenied,
        }
    }
}

/// Status codes of the network status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatusCode {
    NoRouteAvailable,
    TreeLinkFailure,
    NonTreeLinkFailure,
    SourceRouteFailure,
    ManyToOneRouteFailure,
    AddressConflict,
    Other(u8),
}

impl NetworkStatusCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => NetworkStatusCode::NoRouteAvailable,
            0x01 => NetworkStatusCode::TreeLinkFailure,
            0x02 => NetworkStatusCode::NonTreeLinkFailure,
            0x0B => NetworkStatusCode::SourceRouteFailure,
            0x0C => NetworkStatusCode::ManyToOneRouteFailure,
            0x0D => NetworkStatusCode::AddressConflict,
            other => NetworkStatusCode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            NetworkStatusCode::NoRouteAvailable => 0x00,
            NetworkStatusCode::TreeLinkFailure => 0x01,
            NetworkStatusCode::NonTreeLinkFailure => 0x02,
            NetworkStatusCode::SourceRouteFailure => 0x0B,
            NetworkStatusCode::ManyToOneRouteFailure => 0x0C,
            NetworkStatusCode::AddressConflict => 0x0D,
            NetworkStatusCode::Other(v) => v,
        }
    }
}
