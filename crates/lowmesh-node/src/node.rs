//! One simulated device: a network-layer engine driven by a tokio event loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use lowmesh_core::{ChannelMask, PanId, ShortAddr};
use lowmesh_nwk::{Action, Beacon, DeviceRole, LinkRequest, NwkEvent, NwkStack, TxHandle, TxStatus};

use crate::error::NodeError;
use crate::facade::{ConfirmOn, FacadeCommand, TransportFacade};
use crate::medium::{Inbound, MediumHandle, Presence, StationId};

/// Upper-layer requests a node accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    FormNetwork {
        pan_id: PanId,
        channel: u8,
    },
    PermitJoining {
        duration_ms: u64,
    },
    Join {
        attempts: u8,
        channels: ChannelMask,
    },
    Rejoin {
        attempts: u8,
        channels: ChannelMask,
    },
    RouteTo(ShortAddr),
    SendData {
        destination: ShortAddr,
        payload: Vec<u8>,
    },
    /// `target` `None` leaves the network ourselves.
    Leave {
        target: Option<ShortAddr>,
        rejoin: bool,
        remove_children: bool,
        silent: bool,
    },
}

/// A network-layer notification tagged with the node that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub node: String,
    pub at_ms: u64,
    pub event: NwkEvent,
}

/// Snapshot of a node's membership, refreshed after every loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub role: DeviceRole,
    pub short: ShortAddr,
    pub pan_id: PanId,
    pub joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// Period of the engine's maintenance task.
    pub tick_ms: u64,
    /// Joining window a router opens once it is on the network. Zero keeps it closed.
    pub permit_joining_ms: u64,
    /// Time spent listening on one channel at scan duration zero.
    pub scan_slot_ms: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            permit_joining_ms: 0,
            scan_slot_ms: 15,
        }
    }
}

/// Radio attachment of a node.
pub struct NodeLink {
    pub station: StationId,
    pub medium: MediumHandle,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Shared time origin; engine timestamps are milliseconds since it.
    pub epoch: Instant,
}

enum Internal {
    Confirm { handle: TxHandle, status: TxStatus },
    ScanDone(Vec<Beacon>),
}

pub struct Node {
    name: String,
    stack: NwkStack,
    facade: TransportFacade,
    station: StationId,
    medium: MediumHandle,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    epoch: Instant,
    options: NodeOptions,
    commands: mpsc::Receiver<NodeCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::UnboundedSender<NodeEvent>,
    status: watch::Sender<NodeStatus>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable control surface of a running [`Node`].
#[derive(Debug, Clone)]
pub struct NodeHandle {
    name: String,
    commands: mpsc::Sender<NodeCommand>,
    status: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, command: NodeCommand) -> Result<(), NodeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::NodeStopped(self.name.clone()))
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }
}

fn status_of(stack: &NwkStack) -> NodeStatus {
    let nib = stack.nib();
    NodeStatus {
        role: nib.role,
        short: nib.short_addr,
        pan_id: nib.pan_id,
        joined: nib.joined,
    }
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        stack: NwkStack,
        link: NodeLink,
        options: NodeOptions,
        events: mpsc::UnboundedSender<NodeEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, NodeHandle) {
        let name = name.into();
        let seed = stack
            .config()
            .rng_seed
            .map(|s| s ^ stack.nib().ext_addr.raw());
        let (command_tx, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(status_of(&stack));

        let handle = NodeHandle {
            name: name.clone(),
            commands: command_tx,
            status: status_rx,
        };
        let node = Self {
            name,
            stack,
            facade: TransportFacade::new(seed),
            station: link.station,
            medium: link.medium,
            inbound: link.inbound,
            epoch: link.epoch,
            options,
            commands: command_rx,
            internal_tx,
            internal_rx,
            events,
            status: status_tx,
            shutdown_rx,
        };
        (node, handle)
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Run the event loop until shutdown is signalled.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.options.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        debug!(node = %self.name, "node running");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    debug!(node = %self.name, "shutdown signal received");
                    break;
                }
                Some(inbound) = self.inbound.recv() => self.on_inbound(inbound),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
                Some(command) = self.commands.recv() => self.on_command(command),
                _ = tick.tick() => {
                    let actions = self.stack.task(self.now());
                    self.execute(actions);
                }
            }
            self.status.send_replace(status_of(&self.stack));
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let now = self.now();
        match self.stack.on_frame_received(&inbound.raw, inbound.rx, now) {
            Ok(actions) => self.execute(actions),
            Err(e) => debug!(node = %self.name, error = %e, "dropped frame"),
        }
    }

    fn on_internal(&mut self, internal: Internal) {
        let now = self.now();
        let actions = match internal {
            Internal::Confirm { handle, status } => {
                trace!(node = %self.name, %handle, ?status, "transmission confirmed");
                self.stack.on_tx_confirm(handle, status, now)
            }
            Internal::ScanDone(beacons) => {
                debug!(node = %self.name, found = beacons.len(), "scan complete");
                self.stack.on_scan_complete(&beacons, now)
            }
        };
        self.execute(actions);
    }

    fn on_command(&mut self, command: NodeCommand) {
        let now = self.now();
        let result = match command {
            NodeCommand::FormNetwork { pan_id, channel } => self.stack.form_network(pan_id, channel, now),
            NodeCommand::PermitJoining { duration_ms } => Ok(self.stack.permit_joining(duration_ms, now)),
            NodeCommand::Join { attempts, channels } => self.stack.request_join(attempts, channels, now),
            NodeCommand::Rejoin { attempts, channels } => self.stack.request_rejoin(attempts, channels, now),
            NodeCommand::RouteTo(destination) => self.stack.request_route_to(destination, now),
            NodeCommand::SendData { destination, payload } => self.stack.send_data(destination, payload, now),
            NodeCommand::Leave {
                target,
                rejoin,
                remove_children,
                silent,
            } => self
                .stack
                .request_leave(target, rejoin, remove_children, silent, now),
        };
        match result {
            Ok(actions) => self.execute(actions),
            Err(e) => warn!(node = %self.name, error = %e, "request rejected"),
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Transmit { handle, frame, profile } => {
                    let cmd = self.facade.transmit(handle, &frame, &profile);
                    self.run_facade(cmd);
                }
                Action::Retransmit { handle } => {
                    if let Some(cmd) = self.facade.retransmit(handle) {
                        self.run_facade(cmd);
                    }
                }
                Action::StopRetries { handle } => {
                    if let Some(cmd) = self.facade.stop(handle) {
                        self.run_facade(cmd);
                    }
                }
                Action::Link(request) => self.link_request(request),
                Action::Notify(event) => self.notify(event),
            }
        }
    }

    fn run_facade(&mut self, cmd: FacadeCommand) {
        match cmd {
            FacadeCommand::Confirm { handle, status } => {
                let _ = self.internal_tx.send(Internal::Confirm { handle, status });
            }
            FacadeCommand::Send {
                handle,
                next_hop,
                raw,
                delay_ms,
                confirm,
            } => {
                let medium = self.medium.clone();
                let internal = self.internal_tx.clone();
                let station = self.station;
                tokio::spawn(async move {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    let status = match medium.transmit(station, next_hop, raw).await {
                        Ok(true) => TxStatus::Success,
                        Ok(false) => TxStatus::NoAck,
                        Err(_) => TxStatus::ChannelAccessFailure,
                    };
                    if confirm != ConfirmOn::Held {
                        let _ = internal.send(Internal::Confirm { handle, status });
                    }
                });
            }
        }
    }

    fn link_request(&mut self, request: LinkRequest) {
        let presence = match request {
            LinkRequest::Scan { channels, duration } => {
                let slots = (1u64 << duration.min(14)) + 1;
                let listen = slots * self.options.scan_slot_ms * channels.channels().count() as u64;
                debug!(node = %self.name, duration, listen_ms = listen, "scanning");
                let medium = self.medium.clone();
                let internal = self.internal_tx.clone();
                let station = self.station;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(listen)).await;
                    let beacons = medium.scan(station, channels).await.unwrap_or_default();
                    let _ = internal.send(Internal::ScanDone(beacons));
                });
                return;
            }
            LinkRequest::Start { short, channel, .. } => Presence::Started { short, channel },
            LinkRequest::UpdateBeacon(beacon) => Presence::Beacon(beacon),
            LinkRequest::Reset => {
                for cmd in self.facade.flush() {
                    self.run_facade(cmd);
                }
                Presence::Reset
            }
        };
        if let Err(e) = self.medium.publish(self.station, presence) {
            warn!(node = %self.name, error = %e, "link request lost");
        }
    }

    fn notify(&mut self, event: NwkEvent) {
        match &event {
            NwkEvent::NetworkFormed { .. } | NwkEvent::NetworkEntered { .. } => {
                info!(node = %self.name, ?event, "on network");
                if self.stack.nib().role.is_router() && self.options.permit_joining_ms > 0 {
                    let actions = self.stack.permit_joining(self.options.permit_joining_ms, self.now());
                    self.execute(actions);
                }
            }
            NwkEvent::JoinFailed { .. } | NwkEvent::ParentLost => warn!(node = %self.name, ?event, "membership"),
            _ => info!(node = %self.name, ?event, "network event"),
        }
        let _ = self.events.send(NodeEvent {
            node: self.name.clone(),
            at_ms: self.now(),
            event,
        });
    }
}
