//! Network layer error types.

use lowmesh_core::{FrameError, ShortAddr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("join already in progress")]
    AlreadyInProgress,

    #[error("device is already joined to a network")]
    AlreadyJoined,

    #[error("device has no network to rejoin")]
    NotJoined,

    #[error("operation not valid for device role: {0}")]
    InvalidRole(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("route discovery table full")]
    OutOfMemory,

    #[error("device is not joined")]
    NotJoined,

    #[error("route discovery requires a routing-capable device")]
    NotARouter,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassiveAckError {
    #[error("passive acknowledgement table full")]
    TableFull,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaveError {
    #[error("leave queue full")]
    QueueFull,

    #[error("device is not joined")]
    NotJoined,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NeighborError {
    #[error("neighbor table full")]
    TableFull,
}

/// Umbrella error for callers that drive the whole stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NwkError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("join error: {0}")]
    Join(#[from] JoinError),

    #[error("route discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("passive ack error: {0}")]
    PassiveAck(#[from] PassiveAckError),

    #[error("leave error: {0}")]
    Leave(#[from] LeaveError),

    #[error("neighbor error: {0}")]
    Neighbor(#[from] NeighborError),

    #[error("network not formed: {0}")]
    Formation(&'static str),

    #[error("no route to {0}")]
    NoRoute(ShortAddr),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_error_display() {
        assert_eq!(
            JoinError::AlreadyInProgress.to_string(),
            "join already in progress"
        );
        assert_eq!(
            JoinError::InvalidRole("coordinator cannot join").to_string(),
            "operation not valid for device role: coordinator cannot join"
        );
    }

    #[test]
    fn test_discovery_error_display() {
        assert_eq!(
            DiscoveryError::OutOfMemory.to_string(),
            "route discovery table full"
        );
    }

    #[test]
    fn test_nwk_error_from_frame_error() {
        let fe = FrameError::TooShort { min: 8, actual: 3 };
        let err: NwkError = fe.into();
        assert!(matches!(err, NwkError::Frame(_)));
        assert_eq!(
            err.to_string(),
            "frame error: frame too short: need at least 8 bytes, got 3"
        );
    }

    #[test]
    fn test_nwk_error_from_component_errors() {
        let err: NwkError = LeaveError::QueueFull.into();
        assert_eq!(err.to_string(), "leave error: leave queue full");

        let err: NwkError = PassiveAckError::TableFull.into();
        assert!(matches!(err, NwkError::PassiveAck(PassiveAckError::TableFull)));
    }
}
