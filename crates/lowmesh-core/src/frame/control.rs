//! Frame control field encoding and decoding.
//!
//! The 16-bit frame control field, little-endian on the wire:
//! ```text
//! Bits 0-1:  frame type (0=DATA, 1=COMMAND)
//! Bits 2-5:  protocol version
//! Bits 6-7:  discover route (0=suppress, 1=enable)
//! Bit 8:     multicast
//! Bit 9:     security
//! Bit 10:    source route subframe present
//! Bit 11:    destination IEEE address present
//! Bit 12:    source IEEE address present
//! Bits 13-15: reserved
//! ```

use crate::constants::{DiscoverRoute, FrameType, PROTOCOL_VERSION};
use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub frame_type: FrameType,
    pub protocol_version: u8,
    pub discover_route: DiscoverRoute,
    pub multicast: bool,
    pub security: bool,
    pub source_route: bool,
    pub dst_ieee: bool,
    pub src_ieee: bool,
}

impl FrameControl {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            protocol_version: PROTOCOL_VERSION,
            discover_route: DiscoverRoute::Suppress,
            multicast: false,
            security: false,
            source_route: false,
            dst_ieee: false,
            src_ieee: false,
        }
    }

    pub fn from_u16(raw: u16) -> Result<Self, FrameError> {
        let frame_type = FrameType::from_u8((raw & 0x03) as u8)?;
        let protocol_version = ((raw >> 2) & 0x0F) as u8;
        if protocol_version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(protocol_version));
        }
        Ok(FrameControl {
            frame_type,
            protocol_version,
            discover_route: DiscoverRoute::from_bits(((raw >> 6) & 0x03) as u8),
            multicast: raw & (1 << 8) != 0,
            security: raw & (1 << 9) != 0,
            source_route: raw & (1 << 10) != 0,
            dst_ieee: raw & (1 << 11) != 0,
            src_ieee: raw & (1 << 12) != 0,
        })
    }

    pub fn to_u16(&self) -> u16 {
        (self.frame_type as u16)
            | ((self.protocol_version as u16 & 0x0F) << 2)
            | ((self.discover_route as u16) << 6)
            | ((self.multicast as u16) << 8)
            | ((self.security as u16) << 9)
            | ((self.source_route as u16) << 10)
            | ((self.dst_ieee as u16) << 11)
            | ((self.src_ieee as u16) << 12)
    }
}
