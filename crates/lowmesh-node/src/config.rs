//! TOML-based configuration for a simulated lowmesh network.
//!
//! One file describes the radio topology (`[[nodes]]`, `[[links]]`), shared
//! network-layer tunables (`[nwk]`) and a timed `[scenario]` to replay.

use std::path::Path;

use serde::Deserialize;

use lowmesh_core::{ChannelMask, ExtAddr, ManyToOne, PanId, ShortAddr};
use lowmesh_nwk::{ConcentratorConfig, DeviceRole, EvictionPolicy, NwkConfig};

use crate::error::NodeError;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub nwk: NwkSection,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    #[serde(default)]
    pub scenario: ScenarioSection,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        let config: Self =
            toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a node entry by name.
    pub fn node(&self, name: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.name == name)
    }

    fn validate(&self) -> Result<(), NodeError> {
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|other| other.name == node.name) {
                return Err(NodeError::Config(format!("duplicate node name: {}", node.name)));
            }
            node.role()?;
            node.ext_addr()?;
            node.concentrator()?;
        }
        for link in &self.links {
            for end in [&link.a, &link.b] {
                if self.node(end).is_none() {
                    return Err(NodeError::Config(format!("link references unknown node: {end}")));
                }
            }
        }
        self.nwk.eviction_policy()?;
        Ok(())
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The `[nwk]` section. Unset fields keep the engine defaults.
#[derive(Debug, Default, Deserialize)]
pub struct NwkSection {
    pub neighbor_table_size: Option<usize>,
    pub discovery_table_size: Option<usize>,
    pub route_table_size: Option<usize>,
    pub passive_ack_table_size: Option<usize>,
    pub source_route_cache_size: Option<usize>,
    pub leave_queue_size: Option<usize>,
    pub broadcast_table_size: Option<usize>,
    pub max_depth: Option<u8>,
    pub max_router_children: Option<usize>,
    pub max_end_device_children: Option<usize>,
    pub discovery_expiry_ms: Option<u64>,
    pub route_expiry_ms: Option<u64>,
    pub association_timeout_ms: Option<u64>,
    pub broadcast_retry_interval_ms: Option<u64>,
    pub broadcast_expiry_ms: Option<u64>,
    pub scan_duration: Option<u8>,
    pub broadcast_retries: Option<u8>,
    pub eviction_policy: Option<String>,
    pub rng_seed: Option<u64>,
}

impl NwkSection {
    /// Apply the overrides on top of [`NwkConfig::default`].
    pub fn to_nwk_config(&self) -> Result<NwkConfig, NodeError> {
        let mut c = NwkConfig::default();
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { c.$field = v; })*
            };
        }
        apply!(
            neighbor_table_size,
            discovery_table_size,
            route_table_size,
            passive_ack_table_size,
            source_route_cache_size,
            leave_queue_size,
            broadcast_table_size,
            max_depth,
            max_router_children,
            max_end_device_children,
            discovery_expiry_ms,
            route_expiry_ms,
            association_timeout_ms,
            broadcast_retry_interval_ms,
            broadcast_expiry_ms,
            scan_duration,
            broadcast_retries,
        );
        c.eviction_policy = self.eviction_policy()?;
        c.rng_seed = self.rng_seed;
        Ok(c)
    }

    fn eviction_policy(&self) -> Result<EvictionPolicy, NodeError> {
        self.eviction_policy
            .as_deref()
            .map_or(Ok(EvictionPolicy::None), parse_eviction_policy)
    }
}

/// A `[[nodes]]` entry: one simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    /// "coordinator", "router" or "end_device".
    pub role: String,
    /// IEEE address as hex, e.g. "00124b0001020304".
    pub ext_addr: String,
    /// Channels to scan when joining. Defaults to all 2.4 GHz channels.
    pub channels: Option<Vec<u8>>,
    /// Coordinator only: PAN to form.
    pub pan_id: Option<u16>,
    /// Coordinator only: channel to form on.
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Join the network at start-up (ignored for the coordinator).
    #[serde(default = "default_true")]
    pub auto_join: bool,
    /// Delay before the node starts, in milliseconds.
    #[serde(default)]
    pub start_at_ms: u64,
    #[serde(default = "default_join_attempts")]
    pub join_attempts: u8,
    /// "with_route_cache" or "no_route_cache" to run as a concentrator.
    pub concentrator: Option<String>,
    #[serde(default = "default_concentrator_interval")]
    pub concentrator_interval_ms: u64,
}

impl NodeEntry {
    pub fn role(&self) -> Result<DeviceRole, NodeError> {
        parse_role(&self.role)
    }

    pub fn ext_addr(&self) -> Result<ExtAddr, NodeError> {
        parse_ext_addr(&self.ext_addr)
    }

    pub fn pan_id(&self) -> PanId {
        PanId(self.pan_id.unwrap_or(0x1A62))
    }

    pub fn channel_mask(&self) -> ChannelMask {
        match &self.channels {
            Some(channels) => ChannelMask(channels.iter().filter(|c| **c < 32).fold(0, |m, c| m | (1 << c))),
            None => ChannelMask::ALL_2_4_GHZ,
        }
    }

    pub fn concentrator(&self) -> Result<Option<ConcentratorConfig>, NodeError> {
        self.concentrator
            .as_deref()
            .map(|mode| {
                Ok(ConcentratorConfig {
                    mode: parse_many_to_one(mode)?,
                    interval_ms: self.concentrator_interval_ms,
                })
            })
            .transpose()
    }
}

fn default_channel() -> u8 {
    15
}

fn default_true() -> bool {
    true
}

fn default_join_attempts() -> u8 {
    3
}

fn default_concentrator_interval() -> u64 {
    60_000
}

/// A `[[links]]` entry: a symmetric radio link between two nodes.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkEntry {
    pub a: String,
    pub b: String,
    #[serde(default = "default_lqi")]
    pub lqi: u8,
}

fn default_lqi() -> u8 {
    220
}

/// The `[scenario]` section: timed upper-layer requests.
#[derive(Debug, Deserialize)]
pub struct ScenarioSection {
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
    /// Coordinator permit-joining window opened at formation.
    #[serde(default = "default_permit")]
    pub permit_joining_ms: u64,
    #[serde(default)]
    pub routes: Vec<RouteStep>,
    #[serde(default)]
    pub data: Vec<DataStep>,
    #[serde(default)]
    pub leaves: Vec<LeaveStep>,
}

impl Default for ScenarioSection {
    fn default() -> Self {
        Self {
            duration_ms: default_duration(),
            permit_joining_ms: default_permit(),
            routes: Vec::new(),
            data: Vec::new(),
            leaves: Vec::new(),
        }
    }
}

fn default_duration() -> u64 {
    30_000
}

fn default_permit() -> u64 {
    60_000
}

/// `[[scenario.routes]]`: discover a route from one node to another.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteStep {
    pub at_ms: u64,
    pub from: String,
    pub to: String,
}

/// `[[scenario.data]]`: send a payload from one node to another.
#[derive(Debug, Clone, Deserialize)]
pub struct DataStep {
    pub at_ms: u64,
    pub from: String,
    pub to: String,
    pub payload: String,
}

/// `[[scenario.leaves]]`: make a node leave, or remove another node.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveStep {
    pub at_ms: u64,
    pub node: String,
    /// Device to remove; absent means the node leaves itself.
    pub target: Option<String>,
    #[serde(default)]
    pub rejoin: bool,
    #[serde(default)]
    pub remove_children: bool,
    #[serde(default)]
    pub silent: bool,
}

/// Parse a device role name.
pub fn parse_role(s: &str) -> Result<DeviceRole, NodeError> {
    match s {
        "coordinator" => Ok(DeviceRole::Coordinator),
        "router" => Ok(DeviceRole::Router),
        "end_device" | "enddevice" => Ok(DeviceRole::EndDevice),
        other => Err(NodeError::Config(format!("unknown role: {other}"))),
    }
}

/// Parse a discovery-table eviction policy name.
pub fn parse_eviction_policy(s: &str) -> Result<EvictionPolicy, NodeError> {
    match s {
        "none" => Ok(EvictionPolicy::None),
        "oldest_first" => Ok(EvictionPolicy::OldestFirst),
        "highest_cost_first" => Ok(EvictionPolicy::HighestCostFirst),
        other => Err(NodeError::Config(format!("unknown eviction policy: {other}"))),
    }
}

/// Parse a concentrator mode name.
pub fn parse_many_to_one(s: &str) -> Result<ManyToOne, NodeError> {
    match s {
        "with_route_cache" => Ok(ManyToOne::WithRouteCache),
        "no_route_cache" => Ok(ManyToOne::NoRouteCache),
        other => Err(NodeError::Config(format!("unknown concentrator mode: {other}"))),
    }
}

/// Parse a 64-bit IEEE address written as hex, with optional `0x` and `:` separators.
pub fn parse_ext_addr(s: &str) -> Result<ExtAddr, NodeError> {
    let digits: String = s.trim_start_matches("0x").chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 16 {
        return Err(NodeError::Config(format!("invalid extended address: {s}")));
    }
    u64::from_str_radix(&digits, 16)
        .map(ExtAddr)
        .map_err(|e| NodeError::Config(format!("invalid extended address {s}: {e}")))
}

/// Parse a 16-bit short address written as hex (`0x1a2b`).
pub fn parse_short_addr(s: &str) -> Result<ShortAddr, NodeError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
        .map(ShortAddr)
        .map_err(|e| NodeError::Config(format!("invalid short address {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.nodes.is_empty());
        assert_eq!(config.scenario.duration_ms, 30_000);
        assert_eq!(config.nwk.to_nwk_config().unwrap(), NwkConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[logging]
level = "debug"

[nwk]
discovery_table_size = 4
eviction_policy = "oldest_first"
rng_seed = 7

[[nodes]]
name = "zc"
role = "coordinator"
ext_addr = "00:12:4b:00:00:00:00:01"
pan_id = 0x1234
channel = 20
concentrator = "with_route_cache"
concentrator_interval_ms = 5000

[[nodes]]
name = "r1"
role = "router"
ext_addr = "0x00124b0000000002"
channels = [20]
start_at_ms = 100

[[links]]
a = "zc"
b = "r1"
lqi = 180

[scenario]
duration_ms = 10000

[[scenario.routes]]
at_ms = 3000
from = "r1"
to = "zc"

[[scenario.leaves]]
at_ms = 8000
node = "r1"
rejoin = true
"#;
        let config = NodeConfig::parse(toml).unwrap();
        assert_eq!(config.logging.level, "debug");

        let nwk = config.nwk.to_nwk_config().unwrap();
        assert_eq!(nwk.discovery_table_size, 4);
        assert_eq!(nwk.eviction_policy, EvictionPolicy::OldestFirst);
        assert_eq!(nwk.rng_seed, Some(7));
        assert_eq!(nwk.route_table_size, NwkConfig::default().route_table_size);

        let zc = config.node("zc").unwrap();
        assert_eq!(zc.role().unwrap(), DeviceRole::Coordinator);
        assert_eq!(zc.ext_addr().unwrap(), ExtAddr(0x0012_4B00_0000_0001));
        assert_eq!(zc.pan_id(), PanId(0x1234));
        assert_eq!(zc.channel, 20);
        assert_eq!(
            zc.concentrator().unwrap(),
            Some(ConcentratorConfig {
                mode: ManyToOne::WithRouteCache,
                interval_ms: 5000,
            })
        );

        let r1 = config.node("r1").unwrap();
        assert!(r1.auto_join);
        assert_eq!(r1.start_at_ms, 100);
        assert_eq!(r1.channel_mask(), ChannelMask::single(20));
        assert_eq!(r1.concentrator().unwrap(), None);

        assert_eq!(config.links[0].lqi, 180);
        assert_eq!(config.scenario.routes.len(), 1);
        assert!(config.scenario.leaves[0].rejoin);
        assert!(config.scenario.leaves[0].target.is_none());
    }

    #[test]
    fn unknown_role_rejected() {
        let toml = r#"
[[nodes]]
name = "x"
role = "gateway"
ext_addr = "01"
"#;
        assert!(matches!(NodeConfig::parse(toml), Err(NodeError::Config(_))));
    }

    #[test]
    fn link_to_unknown_node_rejected() {
        let toml = r#"
[[nodes]]
name = "a"
role = "router"
ext_addr = "01"

[[links]]
a = "a"
b = "ghost"
"#;
        let err = NodeConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let toml = r#"
[[nodes]]
name = "a"
role = "router"
ext_addr = "01"

[[nodes]]
name = "a"
role = "router"
ext_addr = "02"
"#;
        assert!(NodeConfig::parse(toml).is_err());
    }

    #[test]
    fn address_parsers() {
        assert_eq!(parse_ext_addr("ff").unwrap(), ExtAddr(0xFF));
        assert!(parse_ext_addr("").is_err());
        assert!(parse_ext_addr("00112233445566778899").is_err());
        assert!(parse_ext_addr("zz").is_err());
        assert_eq!(parse_short_addr("0x1a2b").unwrap(), ShortAddr(0x1A2B));
        assert!(parse_eviction_policy("random").is_err());
        assert_eq!(
            parse_eviction_policy("highest_cost_first").unwrap(),
            EvictionPolicy::HighestCostFirst
        );
        assert_eq!(parse_role("end_device").unwrap(), DeviceRole::EndDevice);
    }
}
