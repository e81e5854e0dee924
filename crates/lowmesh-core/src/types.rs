//! Newtype wrappers for network-layer addressing.
//!
//! Short addresses, extended (IEEE) addresses and PAN identifiers share
//! integer representations on the wire; the newtypes keep them from being
//! mixed up in table keys and frame builders.

use core::fmt;

/// A 16-bit network (short) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortAddr(pub u16);

impl ShortAddr {
    /// The coordinator always owns address zero.
    pub const COORDINATOR: ShortAddr = ShortAddr(0x0000);
    /// All devices in the PAN.
    pub const BROADCAST_ALL: ShortAddr = ShortAddr(0xFFFF);
    /// Devices whose receiver is on when idle.
    pub const BROADCAST_RX_ON: ShortAddr = ShortAddr(0xFFFD);
    /// Routers and the coordinator only.
    pub const BROADCAST_ROUTERS: ShortAddr = ShortAddr(0xFFFC);
    /// No address assigned yet.
    pub const UNASSIGNED: ShortAddr = ShortAddr(0xFFFE);
    /// Highest address the stochastic allocator may hand out.
    pub const MAX_ASSIGNABLE: ShortAddr = ShortAddr(0xFFF7);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Broadcast range is 0xFFF8..=0xFFFF minus the unassigned marker.
    pub const fn is_broadcast(self) -> bool {
        self.0 >= 0xFFF8 && self.0 != Self::UNASSIGNED.0
    }

    pub const fn is_unicast(self) -> bool {
        self.0 <= Self::MAX_ASSIGNABLE.0
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

impl fmt::Display for ShortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl fmt::Debug for ShortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortAddr(0x{:04x})", self.0)
    }
}

/// A 64-bit extended (IEEE) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtAddr(pub u64);

impl ExtAddr {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtAddr({self})")
    }
}

/// A 16-bit PAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanId(pub u16);

impl fmt::Display for PanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Bitmask of logical channels, bit `n` set means channel `n` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    /// Channels 11..=26 of the 2.4 GHz band.
    pub const ALL_2_4_GHZ: ChannelMask = ChannelMask(0x07FF_F800);

    pub const fn single(channel: u8) -> Self {
        Self(1 << (channel as u32 & 0x1F))
    }

    pub const fn contains(self, channel: u8) -> bool {
        channel < 32 && self.0 & (1 << channel) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Channels in ascending order.
    pub fn channels(self) -> impl Iterator<Item = u8> {
        (0u8..32).filter(move |ch| self.contains(*ch))
    }
}
