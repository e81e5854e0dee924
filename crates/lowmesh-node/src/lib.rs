//! Host runtime for the lowmesh network layer.
//!
//! Each simulated device runs a [`lowmesh_nwk::NwkStack`] inside a tokio
//! task. A transport facade applies jitter and broadcast holding, and a
//! shared radio medium carries frames between linked stations.

pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod medium;
pub mod node;
pub mod scenario;

pub use config::NodeConfig;
pub use error::NodeError;
pub use facade::TransportFacade;
pub use medium::{Medium, MediumHandle, StationId};
pub use node::{Node, NodeCommand, NodeEvent, NodeHandle, NodeLink, NodeOptions, NodeStatus};
pub use scenario::{run_scenario, Network, ScenarioReport};
