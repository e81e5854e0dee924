//! Network frame header parsing and serialization.
//!
//! Layout:
//! ```text
//! frame_control(2) dst(2) src(2) radius(1) seq(1)
//! [dst_ieee(8)] [src_ieee(8)]
//! [relay_count(1) relay_index(1) relays(2 * relay_count)]
//! ```
//! All multi-byte fields are little-endian. The presence bits of the frame
//! control field are derived from the optional fields when encoding, so a
//! header can never claim a field it does not carry.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::{DiscoverRoute, EXT_ADDR_SIZE, FrameType, HEADER_MIN_SIZE};
use crate::error::{FrameError, ensure_len};
use crate::frame::control::FrameControl;
use crate::types::{ExtAddr, ShortAddr};

/// Source-route subframe: the relays a frame must traverse, in order from
/// the originator toward the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoute {
    /// Index of the next relay to process; counts down to zero.
    pub relay_index: u8,
    pub relays: Vec<ShortAddr>,
}

impl SourceRoute {
    /// Build a subframe positioned at the first relay.
    pub fn new(relays: Vec<ShortAddr>) -> Self {
        let relay_index = relays.len().saturating_sub(1) as u8;
        Self {
            relay_index,
            relays,
        }
    }

    /// Relay that should handle the frame next.
    pub fn current_relay(&self) -> Option<ShortAddr> {
        let idx = self.relays.len().checked_sub(1 + self.relay_index as usize)?;
        self.relays.get(idx).copied()
    }

    fn encoded_len(&self) -> usize {
        2 + 2 * self.relays.len()
    }
}

/// A parsed network header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwkHeader {
    pub frame_type: FrameType,
    pub discover_route: DiscoverRoute,
    pub multicast: bool,
    pub security: bool,
    pub dst: ShortAddr,
    pub src: ShortAddr,
    pub radius: u8,
    pub seq: u8,
    pub dst_ext: Option<ExtAddr>,
    pub src_ext: Option<ExtAddr>,
    pub source_route: Option<SourceRoute>,
}

impl NwkHeader {
    /// Header for a command frame with no optional fields.
    pub fn command(dst: ShortAddr, src: ShortAddr, radius: u8, seq: u8) -> Self {
        Self {
            frame_type: FrameType::Command,
            discover_route: DiscoverRoute::Suppress,
            multicast: false,
            security: false,
            dst,
            src,
            radius,
            seq,
            dst_ext: None,
            src_ext: None,
            source_route: None,
        }
    }

    /// Header for a data frame with no optional fields.
    pub fn data(dst: ShortAddr, src: ShortAddr, radius: u8, seq: u8) -> Self {
        Self {
            frame_type: FrameType::Data,
            ..Self::command(dst, src, radius, seq)
        }
    }

    pub fn with_src_ext(mut self, ext: ExtAddr) -> Self {
        self.src_ext = Some(ext);
        self
    }

    pub fn with_dst_ext(mut self, ext: ExtAddr) -> Self {
        self.dst_ext = Some(ext);
        self
    }

    pub fn with_source_route(mut self, route: SourceRoute) -> Self {
        self.source_route = Some(route);
        self
    }

    pub fn with_discover_route(mut self) -> Self {
        self.discover_route = DiscoverRoute::Enable;
        self
    }

    /// Frame control value matching this header's fields.
    pub fn control(&self) -> FrameControl {
        FrameControl {
            discover_route: self.discover_route,
            multicast: self.multicast,
            security: self.security,
            source_route: self.source_route.is_some(),
            dst_ieee: self.dst_ext.is_some(),
            src_ieee: self.src_ext.is_some(),
            ..FrameControl::new(self.frame_type)
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.dst.is_broadcast()
    }

    /// Encoded size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_MIN_SIZE
            + self.dst_ext.map_or(0, |_| EXT_ADDR_SIZE)
            + self.src_ext.map_or(0, |_| EXT_ADDR_SIZE)
            + self.source_route.as_ref().map_or(0, SourceRoute::encoded_len)
    }

    /// Append the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.control().to_u16().to_le_bytes());
        out.extend_from_slice(&self.dst.to_le_bytes());
        out.extend_from_slice(&self.src.to_le_bytes());
        out.push(self.radius);
        out.push(self.seq);
        if let Some(ext) = self.dst_ext {
            out.extend_from_slice(&ext.to_le_bytes());
        }
        if let Some(ext) = self.src_ext {
            out.extend_from_slice(&ext.to_le_bytes());
        }
        if let Some(route) = &self.source_route {
            out.push(route.relays.len() as u8);
            out.push(route.relay_index);
            for relay in &route.relays {
                out.extend_from_slice(&relay.to_le_bytes());
            }
        }
    }

    /// Parse a header, returning it together with its encoded length.
    pub fn parse(raw: &[u8]) -> Result<(Self, usize), FrameError> {
        ensure_len(raw, HEADER_MIN_SIZE)?;

        let control = FrameControl::from_u16(u16::from_le_bytes([raw[0], raw[1]]))?;
        let dst = ShortAddr::from_le_bytes([raw[2], raw[3]]);
        let src = ShortAddr::from_le_bytes([raw[4], raw[5]]);
        let radius = raw[6];
        let seq = raw[7];
        let mut offset = HEADER_MIN_SIZE;

        let read_ext = |offset: &mut usize| -> Result<ExtAddr, FrameError> {
            ensure_len(raw, *offset + EXT_ADDR_SIZE)?;
            let bytes: [u8; 8] = raw[*offset..*offset + EXT_ADDR_SIZE]
                .try_into()
                .expect("slice is exactly 8 bytes");
            *offset += EXT_ADDR_SIZE;
            Ok(ExtAddr::from_le_bytes(bytes))
        };

        let dst_ext = if control.dst_ieee {
            Some(read_ext(&mut offset)?)
        } else {
            None
        };
        let src_ext = if control.src_ieee {
            Some(read_ext(&mut offset)?)
        } else {
            None
        };

        let source_route = if control.source_route {
            ensure_len(raw, offset + 2)?;
            let count = raw[offset];
            let relay_index = raw[offset + 1];
            offset += 2;
            if count > 0 && relay_index >= count {
                return Err(FrameError::InvalidRelayIndex {
                    index: relay_index,
                    count,
                });
            }
            let relays_len = 2 * count as usize;
            ensure_len(raw, offset + relays_len)?;
            let relays = raw[offset..offset + relays_len]
                .chunks_exact(2)
                .map(|c| ShortAddr::from_le_bytes([c[0], c[1]]))
                .collect();
            offset += relays_len;
            Some(SourceRoute {
                relay_index,
                relays,
            })
        } else {
            None
        };

        Ok((
            NwkHeader {
                frame_type: control.frame_type,
                discover_route: control.discover_route,
                multicast: control.multicast,
                security: control.security,
                dst,
                src,
                radius,
                seq,
                dst_ext,
                src_ext,
                source_route,
            },
            offset,
        ))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn parse_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = NwkHeader::parse(&raw);
        }
    }
}
