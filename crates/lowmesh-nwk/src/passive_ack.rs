//! Passive acknowledgement of broadcasts.
//!
//! A broadcast is considered delivered once every neighbor expected to
//! relay it has been overheard rebroadcasting the same (originator, seq)
//! pair. Until then the tracker schedules retransmissions at a fixed
//! interval; when the retry budget runs out the broadcast is declared done
//! anyway and reliability degrades to best effort.
//!
//! Entries are freed only by [`PassiveAckTracker::release`], which the stack
//! calls when the facade confirms the transmission. Relays overheard after
//! completion keep matching the entry harmlessly until then.

use lowmesh_core::ShortAddr;
use tracing::{debug, trace};

use crate::error::PassiveAckError;
use crate::neighbor::NeighborSlot;
use crate::transport::TxHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveAckEntry {
    pub handle: TxHandle,
    pub originator: ShortAddr,
    pub seq: u8,
    expected: u64,
    observed: u64,
    retries_left: u8,
    next_retry_at: u64,
    exhausted: bool,
    stopped: bool,
}

impl PassiveAckEntry {
    pub fn missing(&self) -> u64 {
        self.expected & !self.observed
    }

    pub fn is_complete(&self) -> bool {
        self.missing() == 0 || self.exhausted
    }
}

/// What the owner of a tracked broadcast should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveAckPoll {
    Retransmit(TxHandle),
    /// Done: stop repeating and let the transmission confirm.
    Stop(TxHandle),
}

#[derive(Debug, Clone)]
pub struct PassiveAckTracker {
    entries: Vec<Option<PassiveAckEntry>>,
    retry_budget: u8,
    retry_interval_ms: u64,
}

impl PassiveAckTracker {
    pub fn new(capacity: usize, retry_budget: u8, retry_interval_ms: u64) -> Self {
        Self {
            entries: vec![None; capacity],
            retry_budget,
            retry_interval_ms,
        }
    }

    /// Start tracking a broadcast. `expected` is the bitmap of neighbor
    /// slots that should relay it.
    pub fn begin_tracking(
        &mut self,
        handle: TxHandle,
        originator: ShortAddr,
        seq: u8,
        expected: u64,
        now: u64,
    ) -> Result<(), PassiveAckError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.handle == handle))
            .or_else(|| self.entries.iter().position(Option::is_none))
            .ok_or(PassiveAckError::TableFull)?;

        trace!(%handle, originator = %originator, seq, expected, "passive ack tracking");
        self.entries[index] = Some(PassiveAckEntry {
            handle,
            originator,
            seq,
            expected,
            observed: 0,
            retries_left: self.retry_budget,
            next_retry_at: now + self.retry_interval_ms,
            exhausted: false,
            stopped: false,
        });
        Ok(())
    }

    /// Record that the neighbor in `slot` rebroadcast (originator, seq).
    ///
    /// Returns the handles whose tracking completed because of this
    /// observation and have not been stopped yet.
    pub fn observed_relay(
        &mut self,
        slot: NeighborSlot,
        originator: ShortAddr,
        seq: u8,
    ) -> Vec<TxHandle> {
        let mut finished = Vec::new();
        for entry in self.entries.iter_mut().flatten() {
            if entry.originator != originator || entry.seq != seq {
                continue;
            }
            entry.observed |= slot.bit();
            if entry.is_complete() && !entry.stopped {
                entry.stopped = true;
                debug!(handle = %entry.handle, "broadcast passively acknowledged");
                finished.push(entry.handle);
            }
        }
        finished
    }

    /// True when every expected relay was heard or the retry budget is
    /// spent. An untracked handle has nothing outstanding.
    pub fn is_complete(&self, handle: TxHandle) -> bool {
        self.get(handle).is_none_or(PassiveAckEntry::is_complete)
    }

    /// Free the entry for `handle`. Releasing twice is a no-op.
    pub fn release(&mut self, handle: TxHandle) -> bool {
        for slot in self.entries.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.handle == handle) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Advance retry timers.
    pub fn poll(&mut self, now: u64) -> Vec<PassiveAckPoll> {
        let mut out = Vec::new();
        for entry in self.entries.iter_mut().flatten() {
            if entry.stopped {
                continue;
            }
            if !entry.is_complete() && now >= entry.next_retry_at {
                if entry.retries_left > 0 {
                    entry.retries_left -= 1;
                    entry.next_retry_at = now + self.retry_interval_ms;
                    trace!(handle = %entry.handle, left = entry.retries_left, "broadcast retry");
                    out.push(PassiveAckPoll::Retransmit(entry.handle));
                    continue;
                }
                debug!(handle = %entry.handle, missing = entry.missing(), "passive ack retries exhausted");
                entry.exhausted = true;
            }
            if entry.is_complete() {
                entry.stopped = true;
                out.push(PassiveAckPoll::Stop(entry.handle));
            }
        }
        out
    }

    pub fn get(&self, handle: TxHandle) -> Option<&PassiveAckEntry> {
        self.entries.iter().flatten().find(|e| e.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Forget everything, e.g. after leaving the network.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }
}
