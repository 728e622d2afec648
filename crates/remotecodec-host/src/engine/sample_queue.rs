//! Client samples awaiting a free slot.

use std::collections::VecDeque;

use remotecodec_core::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed by end of stream")]
    Closed,
}

/// FIFO of pending samples. Closes once an EOS sample is pushed; nothing can
/// follow EOS until the queue is cleared.
#[derive(Debug, Default)]
pub struct SampleQueue {
    samples: VecDeque<Sample>,
    closed: bool,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        if sample.is_eos() {
            self.closed = true;
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Sample> {
        self.samples.pop_front()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether an EOS sample has been accepted.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Remove every pending sample in order and reopen the queue.
    pub fn drain(&mut self) -> impl Iterator<Item = Sample> + '_ {
        self.closed = false;
        self.samples.drain(..)
    }

    /// Discard every pending sample and reopen. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.drain().count()
    }
}
