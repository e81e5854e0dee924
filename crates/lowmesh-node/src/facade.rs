//! Frame transport facade: jitter, broadcast holding and confirmations.
//!
//! The network engine emits `Transmit`, `Retransmit` and `StopRetries`
//! actions. The facade turns them into [`FacadeCommand`]s that the node
//! executes against the radio medium, so every handle gets exactly one
//! confirmation back into the engine.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lowmesh_nwk::{DelayClass, LinkAddr, OutgoingFrame, TxHandle, TxProfile, TxStatus};

/// When the node reports a confirmation for a sent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOn {
    /// Report the medium's delivery result (unicast).
    Delivery,
    /// Report success once the frame is on the air (untracked broadcast).
    Sent,
    /// Held for passive acknowledgement; confirmed by `StopRetries`.
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacadeCommand {
    Send {
        handle: TxHandle,
        next_hop: LinkAddr,
        raw: Vec<u8>,
        delay_ms: u64,
        confirm: ConfirmOn,
    },
    Confirm {
        handle: TxHandle,
        status: TxStatus,
    },
}

#[derive(Debug)]
struct HeldBroadcast {
    next_hop: LinkAddr,
    raw: Vec<u8>,
    retransmissions: u32,
}

pub struct TransportFacade<R: Rng = StdRng> {
    rng: R,
    held: HashMap<TxHandle, HeldBroadcast>,
}

impl TransportFacade<StdRng> {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng)
    }
}

impl<R: Rng> TransportFacade<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            held: HashMap::new(),
        }
    }

    /// Number of broadcasts awaiting `StopRetries`.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn jitter(&mut self, class: DelayClass) -> u64 {
        let (lo, hi) = class.jitter_window_ms();
        self.rng.gen_range(lo..=hi)
    }

    pub fn transmit(&mut self, handle: TxHandle, frame: &OutgoingFrame, profile: &TxProfile) -> FacadeCommand {
        let raw = frame.frame.encode();
        let delay_ms = self.jitter(profile.delay);
        let confirm = if !frame.is_broadcast() {
            ConfirmOn::Delivery
        } else if profile.tracked {
            self.held.insert(
                handle,
                HeldBroadcast {
                    next_hop: frame.next_hop,
                    raw: raw.clone(),
                    retransmissions: 0,
                },
            );
            ConfirmOn::Held
        } else {
            ConfirmOn::Sent
        };
        tracing::trace!(%handle, delay_ms, ?confirm, "queue transmission");
        FacadeCommand::Send {
            handle,
            next_hop: frame.next_hop,
            raw,
            delay_ms,
            confirm,
        }
    }

    /// Resend a held broadcast. Unknown handles are ignored.
    pub fn retransmit(&mut self, handle: TxHandle) -> Option<FacadeCommand> {
        let delay_ms = self.jitter(DelayClass::BroadcastRetry);
        let held = self.held.get_mut(&handle)?;
        held.retransmissions += 1;
        tracing::trace!(%handle, attempt = held.retransmissions, "rebroadcast");
        Some(FacadeCommand::Send {
            handle,
            next_hop: held.next_hop,
            raw: held.raw.clone(),
            delay_ms,
            confirm: ConfirmOn::Held,
        })
    }

    /// Release a held broadcast and confirm it.
    pub fn stop(&mut self, handle: TxHandle) -> Option<FacadeCommand> {
        let held = self.held.remove(&handle)?;
        tracing::trace!(%handle, retransmissions = held.retransmissions, "broadcast released");
        Some(FacadeCommand::Confirm {
            handle,
            status: TxStatus::Success,
        })
    }

    /// Drop every held broadcast, confirming each as `Dropped`.
    pub fn flush(&mut self) -> Vec<FacadeCommand> {
        let mut handles: Vec<TxHandle> = self.held.drain().map(|(h, _)| h).collect();
        handles.sort();
        handles
            .into_iter()
            .map(|handle| FacadeCommand::Confirm {
                handle,
                status: TxStatus::Dropped,
            })
            .collect()
    }
}
