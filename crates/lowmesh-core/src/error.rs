//! Error types for the lowmesh-core crate.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooShort { min: usize, actual: usize },
    InvalidFrameType(u8),
    UnsupportedVersion(u8),
    UnknownCommand(u8),
    InvalidRelayIndex { index: u8, count: u8 },
    InvalidManyToOne(u8),
    NotACommand,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::InvalidFrameType(v) => write!(f, "invalid frame type: {v}"),
            FrameError::UnsupportedVersion(v) => write!(f, "unsupported protocol version: {v}"),
            FrameError::UnknownCommand(v) => write!(f, "unknown command identifier: 0x{v:02x}"),
            FrameError::InvalidRelayIndex { index, count } => {
                write!(f, "relay index {index} out of range for {count} relays")
            }
            FrameError::InvalidManyToOne(v) => write!(f, "invalid many-to-one mode: {v}"),
            FrameError::NotACommand => write!(f, "frame is not a command frame"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// Fail with `TooShort` unless `data` holds at least `min` bytes.
pub(crate) fn ensure_len(data: &[u8], min: usize) -> Result<(), FrameError> {
    if data.len() < min {
        return Err(FrameError::TooShort {
            min,
            actual: data.len(),
        });
    }
    Ok(())
}
