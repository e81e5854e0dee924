//! Helpers shared by the components for building outgoing commands.

use lowmesh_core::{Command, Frame, NwkHeader, ShortAddr};

use crate::action::Action;
use crate::nib::Nib;
use crate::transport::{DelayClass, LinkAddr, OutgoingFrame, TxHandle, TxKind, TxProfile};

/// Command frame originated by this device.
pub(crate) fn command_frame(nib: &mut Nib, dst: ShortAddr, radius: u8, command: Command) -> Frame {
    let header = NwkHeader::command(dst, nib.short_addr, radius, nib.next_seq());
    Frame::command(header, command)
}

/// Queue `frame` toward `next_hop`, allocating a fresh handle.
pub(crate) fn transmit(
    nib: &mut Nib,
    next_hop: LinkAddr,
    frame: Frame,
    kind: TxKind,
    delay: DelayClass,
) -> (TxHandle, Action) {
    let handle = nib.next_handle();
    let action = Action::Transmit {
        handle,
        frame: OutgoingFrame::new(next_hop, frame),
        profile: TxProfile::new(kind, delay),
    };
    (handle, action)
}
