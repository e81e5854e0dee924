//! Build a simulated network from a [`NodeConfig`] and replay its scenario.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use lowmesh_core::ShortAddr;
use lowmesh_nwk::{DeviceRole, NwkStack};

use crate::config::{NodeConfig, NodeEntry};
use crate::error::NodeError;
use crate::medium::Medium;
use crate::node::{Node, NodeCommand, NodeEvent, NodeHandle, NodeLink, NodeOptions, NodeStatus};

/// A running set of nodes sharing one radio medium.
pub struct Network {
    handles: Vec<NodeHandle>,
    by_name: HashMap<String, usize>,
    tasks: Vec<JoinHandle<()>>,
    medium_task: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    shutdown_tx: watch::Sender<bool>,
    epoch: Instant,
}

impl Network {
    /// Spawn the medium and one task per configured node.
    pub fn spawn(config: &NodeConfig, options: NodeOptions) -> Result<Self, NodeError> {
        let base = config.nwk.to_nwk_config()?;
        let epoch = Instant::now();
        let mut medium = Medium::new();
        let mut stations = Vec::with_capacity(config.nodes.len());
        let mut by_name = HashMap::new();
        for (i, entry) in config.nodes.iter().enumerate() {
            stations.push(medium.add_station(entry.name.clone(), entry.ext_addr()?));
            by_name.insert(entry.name.clone(), i);
        }
        for link in &config.links {
            let (Some(&a), Some(&b)) = (by_name.get(&link.a), by_name.get(&link.b)) else {
                return Err(NodeError::Config(format!("bad link {} - {}", link.a, link.b)));
            };
            medium.link(stations[a].0, stations[b].0, link.lqi);
        }
        let (medium, medium_task) = medium.spawn();

        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(stations.len());
        let mut tasks = Vec::with_capacity(stations.len());
        for (entry, (station, inbound)) in config.nodes.iter().zip(stations) {
            let ext = entry.ext_addr()?;
            let mut nwk = base.clone();
            nwk.concentrator = entry.concentrator()?;
            nwk.rng_seed = base.rng_seed.map(|seed| seed.wrapping_add(ext.raw()));
            let stack = NwkStack::new(nwk, ext, entry.role()?);
            let link = NodeLink {
                station,
                medium: medium.clone(),
                inbound,
                epoch,
            };
            let (node, handle) = Node::new(
                entry.name.clone(),
                stack,
                link,
                options,
                events_tx.clone(),
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(node.run()));
            handles.push(handle);
        }
        info!(nodes = handles.len(), links = config.links.len(), "network spawned");

        Ok(Self {
            handles,
            by_name,
            tasks,
            medium_task,
            events,
            shutdown_tx,
            epoch,
        })
    }

    pub fn node(&self, name: &str) -> Result<&NodeHandle, NodeError> {
        self.by_name
            .get(name)
            .map(|&i| &self.handles[i])
            .ok_or_else(|| NodeError::Config(format!("unknown node: {name}")))
    }

    /// Current short address of a node.
    pub fn short_of(&self, name: &str) -> Result<ShortAddr, NodeError> {
        Ok(self.node(name)?.status().short)
    }

    pub fn statuses(&self) -> Vec<(String, NodeStatus)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.status()))
            .collect()
    }

    /// Milliseconds since the network was spawned.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Sleep until `at_ms` after spawn.
    pub async fn advance_to(&self, at_ms: u64) {
        tokio::time::sleep_until(self.epoch + Duration::from_millis(at_ms)).await;
    }

    /// Events raised so far.
    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Stop every node and the medium, returning the events not yet drained.
    pub async fn shutdown(mut self) -> Vec<NodeEvent> {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        let events = self.drain_events();
        self.medium_task.abort();
        debug!("network shutdown complete");
        events
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Start { node: String },
    Route { from: String, to: String },
    Data { from: String, to: String, payload: Vec<u8> },
    Leave {
        node: String,
        target: Option<String>,
        rejoin: bool,
        remove_children: bool,
        silent: bool,
    },
}

fn start_command(entry: &NodeEntry) -> Result<Option<NodeCommand>, NodeError> {
    Ok(match entry.role()? {
        DeviceRole::Coordinator => Some(NodeCommand::FormNetwork {
            pan_id: entry.pan_id(),
            channel: entry.channel,
        }),
        _ if entry.auto_join => Some(NodeCommand::Join {
            attempts: entry.join_attempts,
            channels: entry.channel_mask(),
        }),
        _ => None,
    })
}

fn schedule(config: &NodeConfig) -> Vec<(u64, Step)> {
    let mut steps: Vec<(u64, Step)> = Vec::new();
    for node in &config.nodes {
        steps.push((node.start_at_ms, Step::Start { node: node.name.clone() }));
    }
    for r in &config.scenario.routes {
        steps.push((
            r.at_ms,
            Step::Route {
                from: r.from.clone(),
                to: r.to.clone(),
            },
        ));
    }
    for d in &config.scenario.data {
        steps.push((
            d.at_ms,
            Step::Data {
                from: d.from.clone(),
                to: d.to.clone(),
                payload: d.payload.clone().into_bytes(),
            },
        ));
    }
    for l in &config.scenario.leaves {
        steps.push((
            l.at_ms,
            Step::Leave {
                node: l.node.clone(),
                target: l.target.clone(),
                rejoin: l.rejoin,
                remove_children: l.remove_children,
                silent: l.silent,
            },
        ));
    }
    steps.sort_by_key(|(at, _)| *at);
    steps
}

/// Outcome of a replayed scenario.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub events: Vec<NodeEvent>,
    pub nodes: Vec<(String, NodeStatus)>,
}

impl ScenarioReport {
    pub fn events_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a NodeEvent> + 'a {
        self.events.iter().filter(move |e| e.node == node)
    }

    pub fn status_of(&self, node: &str) -> Option<NodeStatus> {
        self.nodes.iter().find(|(n, _)| n == node).map(|(_, s)| *s)
    }
}

/// Run the configured scenario to completion.
pub async fn run_scenario(config: &NodeConfig) -> Result<ScenarioReport, NodeError> {
    let options = NodeOptions {
        permit_joining_ms: config.scenario.permit_joining_ms,
        ..NodeOptions::default()
    };
    let network = Network::spawn(config, options)?;

    for (at_ms, step) in schedule(config) {
        network.advance_to(at_ms).await;
        debug!(at_ms, ?step, "scenario step");
        match step {
            Step::Start { node } => {
                let entry = config
                    .node(&node)
                    .ok_or_else(|| NodeError::Config(format!("unknown node: {node}")))?;
                if let Some(command) = start_command(entry)? {
                    network.node(&node)?.send(command).await?;
                }
            }
            Step::Route { from, to } => {
                let destination = network.short_of(&to)?;
                network.node(&from)?.send(NodeCommand::RouteTo(destination)).await?;
            }
            Step::Data { from, to, payload } => {
                let destination = network.short_of(&to)?;
                network
                    .node(&from)?
                    .send(NodeCommand::SendData { destination, payload })
                    .await?;
            }
            Step::Leave {
                node,
                target,
                rejoin,
                remove_children,
                silent,
            } => {
                let target = target.as_deref().map(|t| network.short_of(t)).transpose()?;
                network
                    .node(&node)?
                    .send(NodeCommand::Leave {
                        target,
                        rejoin,
                        remove_children,
                        silent,
                    })
                    .await?;
            }
        }
    }

    network.advance_to(config.scenario.duration_ms).await;
    let nodes = network.statuses();
    let events = network.shutdown().await;
    info!(events = events.len(), "scenario finished");
    Ok(ScenarioReport { events, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_orders_steps() {
        let config = NodeConfig::parse(
            r#"
[[nodes]]
name = "zc"
role = "coordinator"
ext_addr = "01"

[[nodes]]
name = "r1"
role = "router"
ext_addr = "02"
start_at_ms = 500

[[scenario.routes]]
at_ms = 200
from = "r1"
to = "zc"
"#,
        )
        .unwrap();
        let steps = schedule(&config);
        let times: Vec<u64> = steps.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![0, 200, 500]);
        assert_eq!(steps[0].1, Step::Start { node: "zc".into() });
    }

    #[test]
    fn start_command_by_role() {
        let config = NodeConfig::parse(
            r#"
[[nodes]]
name = "zc"
role = "coordinator"
ext_addr = "01"
channel = 20

[[nodes]]
name = "ed"
role = "end_device"
ext_addr = "02"
auto_join = false
"#,
        )
        .unwrap();
        assert!(matches!(
            start_command(config.node("zc").unwrap()).unwrap(),
            Some(NodeCommand::FormNetwork { channel: 20, .. })
        ));
        assert_eq!(start_command(config.node("ed").unwrap()).unwrap(), None);
    }
}
