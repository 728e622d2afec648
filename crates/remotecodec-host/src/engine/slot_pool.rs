//! Ready input slots awaiting samples.

use std::collections::{HashSet, VecDeque};

use crate::capability::Slot;

/// Slot bookkeeping mistakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotPoolError {
    #[error("Slot {0} is already free")]
    AlreadyFree(Slot),

    #[error("Slot {0} is still claimed")]
    StillClaimed(Slot),

    #[error("Slot {0} was not claimed")]
    NotClaimed(Slot),
}

/// Free input slots in announcement order, plus the slots currently claimed
/// by the matcher.
///
/// A slot is in at most one of the two sets. Once submitted to the decoder it
/// is in neither until the decoder announces it again.
#[derive(Debug, Default)]
pub struct SlotPool {
    ready: VecDeque<Slot>,
    free: HashSet<Slot>,
    claimed: HashSet<Slot>,
}

impl SlotPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a slot the decoder announced as available.
    pub fn mark_available(&mut self, slot: Slot) -> Result<(), SlotPoolError> {
        if self.free.contains(&slot) {
            return Err(SlotPoolError::AlreadyFree(slot));
        }
        if self.claimed.contains(&slot) {
            return Err(SlotPoolError::StillClaimed(slot));
        }
        self.free.insert(slot);
        self.ready.push_back(slot);
        Ok(())
    }

    /// Claim the oldest free slot.
    pub fn acquire(&mut self) -> Option<Slot> {
        let slot = self.ready.pop_front()?;
        self.free.remove(&slot);
        self.claimed.insert(slot);
        Some(slot)
    }

    /// Return a claimed slot unused. It becomes the next slot handed out.
    pub fn release(&mut self, slot: Slot) -> Result<(), SlotPoolError> {
        if !self.claimed.remove(&slot) {
            return Err(if self.free.contains(&slot) {
                SlotPoolError::AlreadyFree(slot)
            } else {
                SlotPoolError::NotClaimed(slot)
            });
        }
        self.free.insert(slot);
        self.ready.push_front(slot);
        Ok(())
    }

    /// Hand a claimed slot over to the decoder.
    pub fn submit(&mut self, slot: Slot) -> Result<(), SlotPoolError> {
        if self.claimed.remove(&slot) {
            Ok(())
        } else {
            Err(SlotPoolError::NotClaimed(slot))
        }
    }

    /// Forget every slot. Returns how many free slots were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.ready.len();
        self.ready.clear();
        self.free.clear();
        self.claimed.clear();
        dropped
    }

    pub fn free_count(&self) -> usize {
        self.ready.len()
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}
