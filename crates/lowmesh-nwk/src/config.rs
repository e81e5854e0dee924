//! Tunables for the network layer engine.

use lowmesh_core::constants::{DEFAULT_MAX_DEPTH, MAX_SOURCE_ROUTE_RELAYS};
use lowmesh_core::ManyToOne;

/// Which discovery entry to replace when the table is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Never replace a live entry; origination fails and relays drop.
    #[default]
    None,
    OldestFirst,
    HighestCostFirst,
}

/// Periodic many-to-one advertisement settings for a concentrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcentratorConfig {
    pub mode: ManyToOne,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwkConfig {
    // Table capacities
    pub neighbor_table_size: usize,
    pub discovery_table_size: usize,
    pub route_table_size: usize,
    pub passive_ack_table_size: usize,
    pub source_route_cache_size: usize,
    pub leave_queue_size: usize,
    pub broadcast_table_size: usize,

    // Topology
    pub max_depth: u8,
    pub max_router_children: usize,
    pub max_end_device_children: usize,
    pub max_route_record_relays: usize,

    // Timing (milliseconds)
    pub discovery_expiry_ms: u64,
    pub route_expiry_ms: u64,
    pub association_timeout_ms: u64,
    pub broadcast_retry_interval_ms: u64,
    /// How long a seen broadcast suppresses its duplicates.
    pub broadcast_expiry_ms: u64,

    /// Base scan duration exponent; each rescan adds one.
    pub scan_duration: u8,
    /// Rebroadcasts a tracked broadcast may spend before it is declared done.
    pub broadcast_retries: u8,
    pub eviction_policy: EvictionPolicy,
    pub concentrator: Option<ConcentratorConfig>,
    /// Seed for stochastic address assignment; `None` draws from entropy.
    pub rng_seed: Option<u64>,
}

impl NwkConfig {
    /// Flood radius for broadcasts and route requests.
    pub fn radius(&self) -> u8 {
        self.max_depth.saturating_mul(2)
    }
}

impl Default for NwkConfig {
    fn default() -> Self {
        Self {
            neighbor_table_size: 32,
            discovery_table_size: 8,
            route_table_size: 16,
            passive_ack_table_size: 8,
            source_route_cache_size: 16,
            leave_queue_size: 4,
            broadcast_table_size: 9,
            max_depth: DEFAULT_MAX_DEPTH,
            max_router_children: 6,
            max_end_device_children: 14,
            max_route_record_relays: MAX_SOURCE_ROUTE_RELAYS,
            discovery_expiry_ms: 10_000,
            route_expiry_ms: 300_000,
            association_timeout_ms: 5_000,
            broadcast_retry_interval_ms: 500,
            broadcast_expiry_ms: 9_000,
            scan_duration: 3,
            broadcast_retries: 2,
            eviction_policy: EvictionPolicy::None,
            concentrator: None,
            rng_seed: None,
        }
    }
}
