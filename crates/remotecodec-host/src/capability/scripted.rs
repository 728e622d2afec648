//! Decoder driven by hand from tests.
//!
//! The capability records every call it receives, and the test fires slot,
//! output and error events through the shared [`ScriptProbe`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use remotecodec_core::{FormatDescriptor, OutputTarget, Sample, SampleInfo};

use super::{
    CapabilityError, CapabilityEvent, CapabilityRegistry, DecodingCapability, EventSink, Slot,
};

#[derive(Debug, Default)]
struct ScriptState {
    /// Event sink of each decoder instance, by instance id.
    sinks: Vec<Option<EventSink>>,
    /// Most recently configured instance.
    current: Option<usize>,
    slot_capacity: usize,
    fail_configure: bool,
    calls: Vec<&'static str>,
    queued: Vec<(Slot, Sample)>,
    released_outputs: Vec<(u32, bool)>,
    /// Blocks the next configure until the paired sender fires or drops.
    configure_hold: Option<std::sync::mpsc::Receiver<()>>,
}

/// Test-side view of every scripted decoder built from it.
#[derive(Debug, Clone, Default)]
pub struct ScriptProbe {
    inner: Arc<Mutex<ScriptState>>,
}

impl ScriptProbe {
    pub fn new(slot_capacity: usize) -> Self {
        let probe = Self::default();
        probe.lock().slot_capacity = slot_capacity;
        probe
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new decoder instance reporting to this probe.
    pub fn capability(&self) -> ScriptedCapability {
        let mut state = self.lock();
        let id = state.sinks.len();
        state.sinks.push(None);
        drop(state);
        ScriptedCapability {
            id,
            probe: self.clone(),
        }
    }

    fn current_sink(&self) -> Option<EventSink> {
        let state = self.lock();
        state
            .current
            .and_then(|id| state.sinks.get(id).cloned().flatten())
    }

    /// Registry that builds scripted decoders for every well-formed format.
    pub fn registry(&self) -> CapabilityRegistry {
        let probe = self.clone();
        let mut registry = CapabilityRegistry::new();
        registry.register(
            "scripted",
            |format| format.validate().is_ok(),
            move |_| Ok(Box::new(probe.capability())),
        );
        registry
    }

    /// Make the next configure calls fail.
    pub fn fail_configure(&self, fail: bool) {
        self.lock().fail_configure = fail;
    }

    /// Stall the next configure call inside the decoder.
    ///
    /// The call resumes once the returned sender is used or dropped. The
    /// stalled call blocks its thread, so tests using this need a
    /// multi-threaded runtime.
    pub fn hold_configure(&self) -> std::sync::mpsc::Sender<()> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.lock().configure_hold = Some(rx);
        tx
    }

    /// Whether the most recent decoder has been configured and not released.
    pub fn is_configured(&self) -> bool {
        self.current_sink().is_some()
    }

    /// Fire an event from the most recently configured decoder.
    pub fn fire(&self, event: CapabilityEvent) -> bool {
        self.current_sink().is_some_and(|sink| sink.emit(event))
    }

    pub fn announce(&self, slot: u32) -> bool {
        self.fire(CapabilityEvent::InputSlotAvailable(Slot(slot)))
    }

    pub fn output(&self, index: u32, info: SampleInfo) -> bool {
        self.fire(CapabilityEvent::OutputReady { index, info })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn queued(&self) -> Vec<(Slot, Sample)> {
        self.lock().queued.clone()
    }

    pub fn released_outputs(&self) -> Vec<(u32, bool)> {
        self.lock().released_outputs.clone()
    }

    /// Decoder instances built so far.
    pub fn instances(&self) -> usize {
        self.lock().sinks.len()
    }
}

#[derive(Debug)]
pub struct ScriptedCapability {
    id: usize,
    probe: ScriptProbe,
}

impl ScriptedCapability {
    fn note(&self, call: &'static str) {
        self.probe.lock().calls.push(call);
    }

    fn record(&self, call: &'static str) -> MutexGuard<'_, ScriptState> {
        let mut state = self.probe.lock();
        state.calls.push(call);
        state
    }
}

impl DecodingCapability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    fn configure(
        &mut self,
        _format: &FormatDescriptor,
        _target: &OutputTarget,
        _flags: u32,
        events: EventSink,
    ) -> Result<(), CapabilityError> {
        let hold = self.record("configure").configure_hold.take();
        if let Some(hold) = hold {
            let _ = hold.recv();
        }
        let mut state = self.probe.lock();
        if state.fail_configure {
            return Err(CapabilityError::Fault("scripted configure failure".into()));
        }
        if let Some(sink) = state.sinks.get_mut(self.id) {
            *sink = Some(events);
        }
        state.current = Some(self.id);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CapabilityError> {
        self.note("start");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CapabilityError> {
        self.note("stop");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CapabilityError> {
        self.note("flush");
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.record("release");
        if let Some(sink) = state.sinks.get_mut(self.id) {
            *sink = None;
        }
    }

    fn slot_capacity(&self, _slot: Slot) -> usize {
        self.probe.lock().slot_capacity
    }

    fn queue_input(&mut self, slot: Slot, sample: Sample) -> Result<(), CapabilityError> {
        self.record("queue_input").queued.push((slot, sample));
        Ok(())
    }

    fn release_output(&mut self, index: u32, render: bool) -> Result<(), CapabilityError> {
        self.record("release_output")
            .released_outputs
            .push((index, render));
        Ok(())
    }
}
