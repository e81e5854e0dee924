//! Simulated radio medium.
//!
//! A single tokio task owns the topology and every station's link-layer
//! identity. Nodes talk to it through a cloneable [`MediumHandle`]; frames
//! reach receivers over per-station unbounded channels.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use lowmesh_core::{ChannelMask, ExtAddr, ShortAddr};
use lowmesh_nwk::{Beacon, LinkAddr, RxMeta};

use crate::error::NodeError;

/// Index of a station registered with the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub usize);

/// A frame as heard by one receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub raw: Vec<u8>,
    pub rx: RxMeta,
}

/// Link-layer identity changes announced by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Started { short: ShortAddr, channel: u8 },
    Beacon(Beacon),
    Reset,
}

#[derive(Debug)]
enum Request {
    Transmit {
        from: StationId,
        next_hop: LinkAddr,
        raw: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        from: StationId,
        presence: Presence,
    },
    Scan {
        from: StationId,
        channels: ChannelMask,
        reply: oneshot::Sender<Vec<Beacon>>,
    },
}

#[derive(Debug)]
struct Station {
    name: String,
    ext: ExtAddr,
    short: ShortAddr,
    channel: Option<u8>,
    beacon: Option<Beacon>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Station {
    fn hears(&self, channel: Option<u8>) -> bool {
        match (self.channel, channel) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Topology under construction. Call [`Medium::spawn`] to start it.
#[derive(Debug, Default)]
pub struct Medium {
    stations: Vec<Station>,
    links: HashMap<(StationId, StationId), u8>,
}

impl Medium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a station; frames for it arrive on the returned receiver.
    pub fn add_station(
        &mut self,
        name: impl Into<String>,
        ext: ExtAddr,
    ) -> (StationId, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = StationId(self.stations.len());
        self.stations.push(Station {
            name: name.into(),
            ext,
            short: ShortAddr::UNASSIGNED,
            channel: None,
            beacon: None,
            inbound: tx,
        });
        (id, rx)
    }

    /// Connect two stations with a symmetric link of quality `lqi`.
    pub fn link(&mut self, a: StationId, b: StationId, lqi: u8) {
        self.links.insert((a, b), lqi);
        self.links.insert((b, a), lqi);
    }

    pub fn spawn(self) -> (MediumHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (MediumHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Transmit {
                    from,
                    next_hop,
                    raw,
                    reply,
                } => {
                    let delivered = self.deliver(from, next_hop, raw);
                    let _ = reply.send(delivered);
                }
                Request::Publish { from, presence } => self.publish(from, presence),
                Request::Scan { from, channels, reply } => {
                    let _ = reply.send(self.scan(from, channels));
                }
            }
        }
        tracing::debug!("radio medium stopped");
    }

    fn neighbors(&self, of: StationId) -> impl Iterator<Item = (StationId, u8)> + '_ {
        self.links
            .iter()
            .filter(move |((a, _), _)| *a == of)
            .map(|((_, b), lqi)| (*b, *lqi))
    }

    fn deliver(&self, from: StationId, next_hop: LinkAddr, raw: Vec<u8>) -> bool {
        let Some(sender) = self.stations.get(from.0) else {
            return false;
        };
        let mut receivers: Vec<(StationId, u8)> = self
            .neighbors(from)
            .filter(|(id, _)| {
                let station = &self.stations[id.0];
                station.hears(sender.channel)
                    && match next_hop {
                        LinkAddr::Short(s) if s.is_broadcast() => true,
                        LinkAddr::Short(s) => station.short == s,
                        LinkAddr::Ext(e) => station.ext == e,
                    }
            })
            .collect();
        receivers.sort();

        if !next_hop.is_broadcast() {
            receivers.truncate(1);
        }
        for (id, lqi) in &receivers {
            let station = &self.stations[id.0];
            tracing::trace!(from = %sender.name, to = %station.name, len = raw.len(), "frame on air");
            let _ = station.inbound.send(Inbound {
                raw: raw.clone(),
                rx: RxMeta {
                    link_source: sender.short,
                    lqi: *lqi,
                },
            });
        }
        next_hop.is_broadcast() || !receivers.is_empty()
    }

    fn publish(&mut self, from: StationId, presence: Presence) {
        let Some(station) = self.stations.get_mut(from.0) else {
            return;
        };
        match presence {
            Presence::Started { short, channel } => {
                station.short = short;
                station.channel = Some(channel);
            }
            Presence::Beacon(beacon) => {
                station.channel = Some(beacon.channel);
                station.beacon = Some(beacon);
            }
            Presence::Reset => {
                station.short = ShortAddr::UNASSIGNED;
                station.channel = None;
                station.beacon = None;
            }
        }
        tracing::debug!(station = %station.name, short = %station.short, "presence updated");
    }

    fn scan(&self, from: StationId, channels: ChannelMask) -> Vec<Beacon> {
        let mut found: Vec<(StationId, Beacon)> = self
            .neighbors(from)
            .filter_map(|(id, lqi)| {
                let beacon = self.stations[id.0].beacon?;
                channels
                    .contains(beacon.channel)
                    .then_some((id, Beacon { lqi, ..beacon }))
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found.into_iter().map(|(_, b)| b).collect()
    }
}

/// Cloneable access to a running medium.
#[derive(Debug, Clone)]
pub struct MediumHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl MediumHandle {
    /// Put a frame on the air. Returns whether a unicast found its receiver;
    /// broadcasts always report `true`.
    pub async fn transmit(&self, from: StationId, next_hop: LinkAddr, raw: Vec<u8>) -> Result<bool, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Transmit {
                from,
                next_hop,
                raw,
                reply,
            })
            .map_err(|_| NodeError::MediumClosed)?;
        rx.await.map_err(|_| NodeError::MediumClosed)
    }

    pub fn publish(&self, from: StationId, presence: Presence) -> Result<(), NodeError> {
        self.tx
            .send(Request::Publish { from, presence })
            .map_err(|_| NodeError::MediumClosed)
    }

    /// Collect the beacons audible from `from` on `channels`, each carrying
    /// the link quality of the path it was heard on.
    pub async fn scan(&self, from: StationId, channels: ChannelMask) -> Result<Vec<Beacon>, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Scan { from, channels, reply })
            .map_err(|_| NodeError::MediumClosed)?;
        rx.await.map_err(|_| NodeError::MediumClosed)
    }
}
