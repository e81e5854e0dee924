//! Addressing, protocol constants and wire formats for the lowmesh network layer.
//!
//! This crate defines the short/extended address newtypes, the network frame
//! header (frame control, optional IEEE addresses, source-route subframe) and
//! the command frame codec shared by every control-plane component.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod frame;
pub mod types;

pub use constants::{CommandId, DiscoverRoute, FrameType, JoinStatus, NetworkStatusCode};
pub use error::FrameError;
pub use frame::command::{
    Capability, Command, JoinResponse, LeaveCommand, ManyToOne, NetworkStatus, RouteRecord,
    RouteReply, RouteRequest,
};
pub use frame::control::FrameControl;
pub use frame::header::{NwkHeader, SourceRoute};
pub use frame::wire::{Frame, FrameBody};
pub use types::{ChannelMask, ExtAddr, PanId, ShortAddr};
