//! Self-leave and child-leave, serialized through a FIFO.

use std::collections::VecDeque;

use lowmesh_core::{Command, LeaveCommand, NwkHeader, ShortAddr};
use tracing::{debug, info, trace, warn};

use crate::action::{Action, LinkRequest, NwkEvent};
use crate::error::LeaveError;
use crate::neighbor::{NeighborTable, Relationship};
use crate::nib::Nib;
use crate::outbox::{command_frame, transmit};
use crate::transport::{DelayClass, LinkAddr, TxHandle, TxKind, TxStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveTarget {
    /// This device leaves the network.
    Local,
    Device(ShortAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveRequest {
    pub target: LeaveTarget,
    pub rejoin: bool,
    pub remove_children: bool,
    /// Skip the leaving broadcast. For a device, remove it from the table
    /// without sending it a leave command.
    pub silent: bool,
}

impl LeaveRequest {
    pub fn local(rejoin: bool) -> Self {
        Self {
            target: LeaveTarget::Local,
            rejoin,
            remove_children: false,
            silent: false,
        }
    }

    pub fn device(short: ShortAddr, rejoin: bool, remove_children: bool) -> Self {
        Self {
            target: LeaveTarget::Device(short),
            rejoin,
            remove_children,
            silent: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveState {
    Idle,
    SelfSendCommand,
    SelfWaitConfirm {
        handle: TxHandle,
        address: ShortAddr,
        rejoin: bool,
    },
    /// Waiting for the stack to reset the link and its tables.
    SelfResetLink {
        address: ShortAddr,
        rejoin: bool,
    },
    ChildSendCommand,
    ChildWaitConfirm {
        handle: TxHandle,
        child: ShortAddr,
        rejoin: bool,
    },
}

#[derive(Debug, Clone)]
pub struct LeaveManager {
    queue: VecDeque<LeaveRequest>,
    capacity: usize,
    state: LeaveState,
    children_removed: usize,
}

impl LeaveManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            state: LeaveState::Idle,
            children_removed: 0,
        }
    }

    pub fn state(&self) -> LeaveState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Devices removed as children of a leaving child since the last idle.
    pub fn children_removed(&self) -> usize {
        self.children_removed
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.state == LeaveState::Idle
    }

    /// Queue a leave from the upper layer.
    pub fn request(&mut self, request: LeaveRequest, nib: &Nib) -> Result<(), LeaveError> {
        if !nib.joined {
            return Err(LeaveError::NotJoined);
        }
        if self.queue.len() >= self.capacity {
            return Err(LeaveError::QueueFull);
        }
        debug!(target = ?request.target, rejoin = request.rejoin, "leave queued");
        self.queue.push_back(request);
        Ok(())
    }

    /// Start the next queued leave if none is outstanding.
    pub fn process<N: NeighborTable>(&mut self, nib: &mut Nib, neighbors: &mut N) -> Vec<Action> {
        let mut actions = Vec::new();
        while self.state == LeaveState::Idle {
            let Some(request) = self.queue.pop_front() else {
                self.children_removed = 0;
                break;
            };
            match request.target {
                LeaveTarget::Local => self.begin_self(request, nib, &mut actions),
                LeaveTarget::Device(child) => self.begin_child(request, child, nib, neighbors, &mut actions),
            }
        }
        actions
    }

    fn begin_self(&mut self, request: LeaveRequest, nib: &mut Nib, actions: &mut Vec<Action>) {
        let address = nib.short_addr;
        let rejoin = request.rejoin;
        self.state = LeaveState::SelfSendCommand;
        if request.silent {
            debug!(%address, "silent self-leave");
            self.state = LeaveState::SelfResetLink { address, rejoin };
            return;
        }
        let command = Command::Leave(LeaveCommand {
            rejoin,
            request: false,
            remove_children: request.remove_children,
        });
        let frame = command_frame(nib, ShortAddr::BROADCAST_RX_ON, 1, command);
        let (handle, action) = transmit(
            nib,
            LinkAddr::Short(ShortAddr::BROADCAST_RX_ON),
            frame,
            TxKind::Leave { child: None },
            DelayClass::InitialBroadcast,
        );
        info!(%address, rejoin, %handle, "leaving network");
        actions.push(action);
        self.state = LeaveState::SelfWaitConfirm {
            handle,
            address,
            rejoin,
        };
    }

    fn begin_child<N: NeighborTable>(
        &mut self,
        request: LeaveRequest,
        child: ShortAddr,
        nib: &mut Nib,
        neighbors: &mut N,
        actions: &mut Vec<Action>,
    ) {
        if !neighbors.contains(child) {
            debug!(%child, "leave target already gone");
            actions.push(Action::Notify(NwkEvent::LeaveComplete {
                address: child,
                is_self: false,
                rejoin: request.rejoin,
            }));
            return;
        }
        if request.remove_children && nib.role.is_router() {
            // Dropped locally; the child's leave broadcast reaches them.
            for grandchild in neighbors.children_of(child) {
                trace!(%child, %grandchild, "scheduling removal of grandchild");
                self.children_removed += 1;
                self.queue.push_back(LeaveRequest {
                    silent: true,
                    ..LeaveRequest::device(grandchild, false, true)
                });
            }
        }
        if request.silent {
            neighbors.remove(child);
            debug!(%child, "device removed without a leave command");
            actions.push(Action::Notify(NwkEvent::LeaveComplete {
                address: child,
                is_self: false,
                rejoin: request.rejoin,
            }));
            return;
        }
        self.state = LeaveState::ChildSendCommand;
        let command = Command::Leave(LeaveCommand {
            rejoin: request.rejoin,
            request: true,
            remove_children: request.remove_children,
        });
        let frame = command_frame(nib, child, 1, command);
        let (handle, action) = transmit(
            nib,
            LinkAddr::Short(child),
            frame,
            TxKind::Leave { child: Some(child) },
            DelayClass::UnicastCommand,
        );
        debug!(%child, %handle, "asking device to leave");
        actions.push(action);
        self.state = LeaveState::ChildWaitConfirm {
            handle,
            child,
            rejoin: request.rejoin,
        };
    }

    /// Delivery status of a leave command.
    pub fn on_tx_confirm<N: NeighborTable>(
        &mut self,
        handle: TxHandle,
        status: TxStatus,
        nib: &mut Nib,
        neighbors: &mut N,
    ) -> Vec<Action> {
        match self.state {
            LeaveState::SelfWaitConfirm {
                handle: pending,
                address,
                rejoin,
            } if pending == handle => {
                trace!(?status, "leave broadcast confirmed");
                self.state = LeaveState::SelfResetLink { address, rejoin };
                Vec::new()
            }
            LeaveState::ChildWaitConfirm {
                handle: pending,
                child,
                rejoin,
            } if pending == handle => {
                if !status.is_success() {
                    debug!(%child, ?status, "leave command not delivered, removing anyway");
                }
                neighbors.remove(child);
                self.state = LeaveState::Idle;
                let mut actions = vec![Action::Notify(NwkEvent::LeaveComplete {
                    address: child,
                    is_self: false,
                    rejoin,
                })];
                actions.extend(self.process(nib, neighbors));
                actions
            }
            _ => {
                trace!(%handle, "stale leave confirm");
                Vec::new()
            }
        }
    }

    /// Whether a self-leave is waiting for [`LeaveManager::reset_link`].
    pub fn pending_reset(&self) -> Option<bool> {
        match self.state {
            LeaveState::SelfResetLink { rejoin, .. } => Some(rejoin),
            _ => None,
        }
    }

    /// Finish a self-leave: reset the link, forget membership and neighbors.
    pub fn reset_link<N: NeighborTable>(&mut self, nib: &mut Nib, neighbors: &mut N) -> Vec<Action> {
        let LeaveState::SelfResetLink { address, rejoin } = self.state else {
            return Vec::new();
        };
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "discarding leave requests queued behind self-leave");
            self.queue.clear();
        }
        nib.reset();
        neighbors.clear();
        self.state = LeaveState::Idle;
        self.children_removed = 0;
        info!(%address, rejoin, "left network");
        vec![
            Action::Link(LinkRequest::Reset),
            Action::Notify(NwkEvent::LeaveComplete {
                address,
                is_self: true,
                rejoin,
            }),
        ]
    }

    /// Leave command received from a neighbor.
    pub fn on_leave_command<N: NeighborTable>(
        &mut self,
        header: &NwkHeader,
        command: LeaveCommand,
        nib: &mut Nib,
        neighbors: &mut N,
    ) -> Vec<Action> {
        let src = header.src;
        let from_parent = neighbors.parent().is_some_and(|p| p.short == src);

        if command.request {
            let for_us = header.dst == nib.short_addr || header.dst_ext == Some(nib.ext_addr);
            if !for_us || !from_parent {
                trace!(%src, "ignoring leave request not from our parent");
                return Vec::new();
            }
            info!(parent = %src, rejoin = command.rejoin, "parent asked us to leave");
            return self.leave_now(command, nib, neighbors);
        }

        if from_parent {
            if command.remove_children {
                info!(parent = %src, "parent left and removed its children");
                return self.leave_now(command, nib, neighbors);
            }
            warn!(parent = %src, "parent left the network");
            neighbors.remove(src);
            return vec![Action::Notify(NwkEvent::ParentLost)];
        }

        match neighbors.remove(src) {
            Some(n) if n.relationship == Relationship::Child => {
                info!(child = %src, "child left the network");
                vec![Action::Notify(NwkEvent::LeaveComplete {
                    address: src,
                    is_self: false,
                    rejoin: command.rejoin,
                })]
            }
            Some(_) => {
                debug!(neighbor = %src, "neighbor left the network");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Self-leave ahead of anything queued, regardless of queue capacity.
    fn leave_now<N: NeighborTable>(&mut self, command: LeaveCommand, nib: &mut Nib, neighbors: &mut N) -> Vec<Action> {
        let request = LeaveRequest {
            target: LeaveTarget::Local,
            rejoin: command.rejoin,
            remove_children: command.remove_children,
            silent: false,
        };
        if matches!(
            self.state,
            LeaveState::SelfSendCommand | LeaveState::SelfWaitConfirm { .. } | LeaveState::SelfResetLink { .. }
        ) || self.queue.front().is_some_and(|r| r.target == LeaveTarget::Local)
        {
            return Vec::new();
        }
        self.queue.push_front(request);
        self.process(nib, neighbors)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.state = LeaveState::Idle;
        self.children_removed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbor::{Neighbor, NeighborArena};
    use crate::nib::DeviceRole;
    use lowmesh_core::{ExtAddr, FrameBody, PanId};

    fn joined_router() -> Nib {
        let mut nib = Nib::new(ExtAddr(0x77), DeviceRole::Router);
        nib.short_addr = ShortAddr(0x0100);
        nib.pan_id = PanId(0x1A62);
        nib.joined = true;
        nib
    }

    fn transmits(actions: &[Action]) -> Vec<(TxHandle, LinkAddr, LeaveCommand)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Transmit { handle, frame, .. } => match &frame.frame.body {
                    FrameBody::Command(Command::Leave(cmd)) => Some((*handle, frame.next_hop, *cmd)),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn child(short: u16) -> Neighbor {
        Neighbor::new(ShortAddr(short), Relationship::Child).with_parent(ShortAddr(0x0100))
    }

    #[test]
    fn test_absent_child_completes_without_transmit() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        let mut leave = LeaveManager::new(2);
        leave.request(LeaveRequest::device(ShortAddr(0x0BAD), false, false), &nib).unwrap();
        let actions = leave.process(&mut nib, &mut table);
        assert_eq!(
            actions,
            vec![Action::Notify(NwkEvent::LeaveComplete {
                address: ShortAddr(0x0BAD),
                is_self: false,
                rejoin: false,
            })]
        );
        assert!(leave.is_idle());
    }

    #[test]
    fn test_child_leave_removes_on_any_confirm() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        table.upsert(child(0x0201)).unwrap();
        let mut leave = LeaveManager::new(2);
        leave.request(LeaveRequest::device(ShortAddr(0x0201), true, false), &nib).unwrap();

        let actions = leave.process(&mut nib, &mut table);
        let sent = transmits(&actions);
        assert_eq!(sent.len(), 1);
        let (handle, next_hop, cmd) = sent[0];
        assert_eq!(next_hop, LinkAddr::Short(ShortAddr(0x0201)));
        assert_eq!(cmd, LeaveCommand { rejoin: true, request: true, remove_children: false });
        assert!(!leave.is_idle());

        // stale handle first
        assert!(leave.on_tx_confirm(TxHandle(9999), TxStatus::Success, &mut nib, &mut table).is_empty());

        let done = leave.on_tx_confirm(handle, TxStatus::NoAck, &mut nib, &mut table);
        assert_eq!(
            done,
            vec![Action::Notify(NwkEvent::LeaveComplete {
                address: ShortAddr(0x0201),
                is_self: false,
                rejoin: true,
            })]
        );
        assert!(!table.contains(ShortAddr(0x0201)));
        assert!(leave.is_idle());
        // second confirm for the same handle is a no-op
        assert!(leave.on_tx_confirm(handle, TxStatus::Success, &mut nib, &mut table).is_empty());
    }

    #[test]
    fn test_remove_children_drops_grandchildren_without_sending() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(8);
        table.upsert(child(0x0201)).unwrap();
        table.upsert(Neighbor::new(ShortAddr(0x0301), Relationship::Sibling).with_parent(ShortAddr(0x0201))).unwrap();
        table.upsert(Neighbor::new(ShortAddr(0x0302), Relationship::Sibling).with_parent(ShortAddr(0x0201))).unwrap();
        let mut leave = LeaveManager::new(1);
        leave.request(LeaveRequest::device(ShortAddr(0x0201), false, true), &nib).unwrap();

        let first = transmits(&leave.process(&mut nib, &mut table));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1, LinkAddr::Short(ShortAddr(0x0201)));
        assert!(first[0].2.remove_children);
        assert_eq!(leave.queued(), 2);
        assert_eq!(leave.children_removed(), 2);

        let rest = leave.on_tx_confirm(first[0].0, TxStatus::Success, &mut nib, &mut table);
        assert!(transmits(&rest).is_empty());
        let removed: Vec<ShortAddr> = rest
            .iter()
            .filter_map(|a| match a {
                Action::Notify(NwkEvent::LeaveComplete { address, is_self: false, .. }) => Some(*address),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![ShortAddr(0x0201), ShortAddr(0x0301), ShortAddr(0x0302)]);
        assert!(leave.is_idle());
        assert!(table.is_empty());
    }

    #[test]
    fn test_silent_device_leave_removes_locally() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        table.upsert(child(0x0201)).unwrap();
        let mut leave = LeaveManager::new(1);
        let request = LeaveRequest {
            silent: true,
            ..LeaveRequest::device(ShortAddr(0x0201), true, false)
        };
        leave.request(request, &nib).unwrap();
        let actions = leave.process(&mut nib, &mut table);
        assert_eq!(
            actions,
            vec![Action::Notify(NwkEvent::LeaveComplete {
                address: ShortAddr(0x0201),
                is_self: false,
                rejoin: true,
            })]
        );
        assert!(!table.contains(ShortAddr(0x0201)));
        assert!(leave.is_idle());
    }

    #[test]
    fn test_queue_capacity_and_not_joined() {
        let mut nib = joined_router();
        let mut leave = LeaveManager::new(1);
        leave.request(LeaveRequest::local(false), &nib).unwrap();
        assert_eq!(leave.request(LeaveRequest::local(false), &nib), Err(LeaveError::QueueFull));
        nib.joined = false;
        let mut fresh = LeaveManager::new(1);
        assert_eq!(fresh.request(LeaveRequest::local(false), &nib), Err(LeaveError::NotJoined));
    }

    #[test]
    fn test_self_leave_broadcasts_then_resets() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        table.upsert(child(0x0201)).unwrap();
        let mut leave = LeaveManager::new(2);
        leave.request(LeaveRequest::local(true), &nib).unwrap();

        let actions = leave.process(&mut nib, &mut table);
        let sent = transmits(&actions);
        assert_eq!(sent[0].1, LinkAddr::Short(ShortAddr::BROADCAST_RX_ON));
        assert!(!sent[0].2.request);
        assert_eq!(leave.pending_reset(), None);

        leave.on_tx_confirm(sent[0].0, TxStatus::ChannelAccessFailure, &mut nib, &mut table);
        assert_eq!(leave.pending_reset(), Some(true));
        let reset = leave.reset_link(&mut nib, &mut table);
        assert_eq!(
            reset,
            vec![
                Action::Link(LinkRequest::Reset),
                Action::Notify(NwkEvent::LeaveComplete {
                    address: ShortAddr(0x0100),
                    is_self: true,
                    rejoin: true,
                }),
            ]
        );
        assert!(!nib.joined);
        assert!(table.is_empty());
        assert!(leave.is_idle());
    }

    #[test]
    fn test_silent_self_leave_skips_broadcast() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        let mut leave = LeaveManager::new(2);
        let request = LeaveRequest {
            silent: true,
            ..LeaveRequest::local(false)
        };
        leave.request(request, &nib).unwrap();
        assert!(leave.process(&mut nib, &mut table).is_empty());
        assert_eq!(leave.pending_reset(), Some(false));
    }

    #[test]
    fn test_inbound_leave_request_from_parent() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        table.upsert(Neighbor::router(ShortAddr(0x0000), Relationship::Parent, 200)).unwrap();
        let mut leave = LeaveManager::new(1);
        let cmd = LeaveCommand { rejoin: true, request: true, remove_children: false };

        let stranger = NwkHeader::command(ShortAddr(0x0100), ShortAddr(0x0555), 1, 1);
        assert!(leave.on_leave_command(&stranger, cmd, &mut nib, &mut table).is_empty());

        let header = NwkHeader::command(ShortAddr(0x0100), ShortAddr(0x0000), 1, 2);
        let actions = leave.on_leave_command(&header, cmd, &mut nib, &mut table);
        assert_eq!(transmits(&actions).len(), 1);
        // duplicate request while leaving
        assert!(leave.on_leave_command(&header, cmd, &mut nib, &mut table).is_empty());
    }

    #[test]
    fn test_inbound_announcements() {
        let mut nib = joined_router();
        let mut table = NeighborArena::new(4);
        table.upsert(Neighbor::router(ShortAddr(0x0000), Relationship::Parent, 200)).unwrap();
        table.upsert(child(0x0201)).unwrap();
        table.upsert(Neighbor::router(ShortAddr(0x0102), Relationship::Sibling, 200)).unwrap();
        let mut leave = LeaveManager::new(1);
        let announce = LeaveCommand::default();

        let from_child = NwkHeader::command(ShortAddr::BROADCAST_RX_ON, ShortAddr(0x0201), 1, 1);
        assert_eq!(
            leave.on_leave_command(&from_child, announce, &mut nib, &mut table),
            vec![Action::Notify(NwkEvent::LeaveComplete {
                address: ShortAddr(0x0201),
                is_self: false,
                rejoin: false,
            })]
        );

        let from_sibling = NwkHeader::command(ShortAddr::BROADCAST_RX_ON, ShortAddr(0x0102), 1, 2);
        assert!(leave.on_leave_command(&from_sibling, announce, &mut nib, &mut table).is_empty());
        assert!(!table.contains(ShortAddr(0x0102)));

        let from_parent = NwkHeader::command(ShortAddr::BROADCAST_RX_ON, ShortAddr(0x0000), 1, 3);
        assert_eq!(
            leave.on_leave_command(&from_parent, announce, &mut nib, &mut table),
            vec![Action::Notify(NwkEvent::ParentLost)]
        );
        assert!(table.is_empty());
    }
}
