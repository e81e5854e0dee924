//! Sans-IO network layer control plane for lowmesh.
//!
//! Join and rejoin, mesh and many-to-one route discovery, passive
//! acknowledgement of broadcasts, route records and leave handling. All
//! components are driven through [`NwkStack`], which takes received frames,
//! transmission confirms, scan results and the current time, and returns
//! [`Action`]s for the host to perform.

pub mod action;
pub mod broadcast;
pub mod config;
pub mod discovery;
pub mod error;
pub mod join;
pub mod leave;
pub mod neighbor;
pub mod nib;
mod outbox;
pub mod parent;
pub mod passive_ack;
pub mod route_record;
pub mod stack;
pub mod transport;

pub use action::{Action, Beacon, LinkRequest, NwkEvent};
pub use broadcast::BroadcastTable;
pub use config::{ConcentratorConfig, EvictionPolicy, NwkConfig};
pub use discovery::{RouteDiscovery, RouteEntry, RouteStatus, RouteTable};
pub use error::{DiscoveryError, JoinError, LeaveError, NeighborError, NwkError, PassiveAckError};
pub use join::{JoinManager, JoinMode, JoinState};
pub use leave::{LeaveManager, LeaveRequest, LeaveState, LeaveTarget};
pub use neighbor::{Neighbor, NeighborArena, NeighborSlot, NeighborTable, Relationship};
pub use nib::{DeviceRole, Nib};
pub use passive_ack::{PassiveAckPoll, PassiveAckTracker};
pub use route_record::{RouteRecorder, SourceRouteCache};
pub use stack::NwkStack;
pub use transport::{DelayClass, LinkAddr, OutgoingFrame, RxMeta, TxHandle, TxKind, TxProfile, TxStatus};
