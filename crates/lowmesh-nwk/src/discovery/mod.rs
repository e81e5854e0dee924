//! Mesh and many-to-one route discovery.

pub mod engine;
pub mod routes;
pub mod table;

pub use engine::RouteDiscovery;
pub use routes::{RouteEntry, RouteStatus, RouteTable};
pub use table::{DiscoveryEntry, DiscoveryTable, DiscoveryTarget};
