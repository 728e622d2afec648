//! Pass-through decoder.
//!
//! Every queued sample comes straight back as an output buffer with the same
//! metadata, and its slot is announced free again immediately. Used by the
//! demo binary and by tests that need a real engine without a real decoder.

use std::collections::{BTreeSet, HashMap};

use remotecodec_core::{FormatDescriptor, OutputTarget, Sample, SampleInfo};
use tracing::debug;

use super::{CapabilityError, DecodingCapability, EventSink, Slot};

#[derive(Debug)]
pub struct LoopbackCapability {
    slot_count: u32,
    slot_capacity: usize,
    events: Option<EventSink>,
    format: Option<FormatDescriptor>,
    running: bool,
    format_announced: bool,
    /// Slots announced to the engine and not yet filled.
    available: BTreeSet<Slot>,
    pending_outputs: HashMap<u32, SampleInfo>,
    next_output: u32,
    rendered: u64,
}

impl LoopbackCapability {
    pub fn new(slot_count: usize, slot_capacity: usize) -> Self {
        Self {
            slot_count: u32::try_from(slot_count).unwrap_or(u32::MAX),
            slot_capacity,
            events: None,
            format: None,
            running: false,
            format_announced: false,
            available: BTreeSet::new(),
            pending_outputs: HashMap::new(),
            next_output: 0,
            rendered: 0,
        }
    }

    /// Outputs released with `render` set.
    pub const fn rendered(&self) -> u64 {
        self.rendered
    }

    fn events(&self) -> Result<&EventSink, CapabilityError> {
        self.events.as_ref().ok_or(CapabilityError::NotReady)
    }

    fn announce_all(&mut self) -> Result<(), CapabilityError> {
        let events = self.events()?.clone();
        self.available = (0..self.slot_count).map(Slot).collect();
        for slot in &self.available {
            events.slot_available(*slot);
        }
        Ok(())
    }
}

impl DecodingCapability for LoopbackCapability {
    fn name(&self) -> &str {
        "loopback"
    }

    fn configure(
        &mut self,
        format: &FormatDescriptor,
        _target: &OutputTarget,
        _flags: u32,
        events: EventSink,
    ) -> Result<(), CapabilityError> {
        format
            .validate()
            .map_err(|e| CapabilityError::Unsupported(e.to_string()))?;
        self.format = Some(format.clone());
        self.events = Some(events);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        if self.format.is_none() {
            return Err(CapabilityError::NotReady);
        }
        self.running = true;
        self.announce_all()
    }

    fn stop(&mut self) -> Result<(), CapabilityError> {
        self.running = false;
        self.format_announced = false;
        self.pending_outputs.clear();
        self.available.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CapabilityError> {
        if !self.running {
            return Err(CapabilityError::NotReady);
        }
        self.pending_outputs.clear();
        self.announce_all()
    }

    fn release(&mut self) {
        self.running = false;
        self.events = None;
        self.pending_outputs.clear();
        self.available.clear();
    }

    fn slot_capacity(&self, _slot: Slot) -> usize {
        self.slot_capacity
    }

    fn queue_input(&mut self, slot: Slot, sample: Sample) -> Result<(), CapabilityError> {
        if !self.running {
            return Err(CapabilityError::NotReady);
        }
        if sample.size() > self.slot_capacity {
            return Err(CapabilityError::Input(format!(
                "{} bytes exceed slot capacity {}",
                sample.size(),
                self.slot_capacity
            )));
        }
        if !self.available.remove(&slot) {
            return Err(CapabilityError::Input(format!("slot {slot} is not available")));
        }

        let events = self.events()?.clone();
        if !self.format_announced {
            if let Some(format) = &self.format {
                events.format_changed(format.clone());
            }
            self.format_announced = true;
        }

        let index = self.next_output;
        self.next_output = self.next_output.wrapping_add(1);
        let info = sample.info();
        self.pending_outputs.insert(index, info);
        events.output_ready(index, info);

        // EOS leaves the slot with the decoder until the next flush.
        if !info.is_eos() {
            self.available.insert(slot);
            events.slot_available(slot);
        }
        Ok(())
    }

    fn release_output(&mut self, index: u32, render: bool) -> Result<(), CapabilityError> {
        let info = self
            .pending_outputs
            .remove(&index)
            .ok_or_else(|| CapabilityError::Input(format!("unknown output buffer {index}")))?;
        if render {
            self.rendered += 1;
        }
        debug!(index, pts = info.pts_us, render, "Released output buffer");
        Ok(())
    }
}
