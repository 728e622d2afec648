//! Decoding capability abstraction.
//!
//! A capability is the actual decoder behind a session. It is driven
//! synchronously by the session engine and reports back asynchronously
//! through an [`EventSink`]. Contract:
//!
//! - After `start` (and after `flush`), every input slot not currently
//!   holding a sample is announced with [`CapabilityEvent::InputSlotAvailable`].
//! - A slot handed to `queue_input` is announced again once the decoder has
//!   consumed it.
//! - Every [`CapabilityEvent::OutputReady`] must be answered with exactly one
//!   `release_output` call.

mod loopback;
mod registry;
#[cfg(any(test, feature = "test-utils"))]
mod scripted;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use remotecodec_core::{FormatDescriptor, HostErrorCode, OutputTarget, Sample, SampleInfo};
use tokio::sync::mpsc;

use crate::engine::Inbox;

pub use loopback::LoopbackCapability;
pub use registry::{CapabilityFactory, CapabilityRegistry, RegistryError};
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{ScriptProbe, ScriptedCapability};

/// Identifier of one decoder input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decoder-side failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("Decoder not ready")]
    NotReady,

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Input rejected: {0}")]
    Input(String),

    #[error("Decoder fault: {0}")]
    Fault(String),
}

impl CapabilityError {
    /// Code reported to the client for this failure.
    pub const fn host_code(&self) -> HostErrorCode {
        match self {
            Self::NotReady => HostErrorCode::CodecNotReady,
            Self::Input(_) => HostErrorCode::Input,
            Self::Unsupported(_) | Self::Fault(_) => HostErrorCode::Unknown,
        }
    }
}

/// Asynchronous notifications from a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityEvent {
    InputSlotAvailable(Slot),
    OutputReady { index: u32, info: SampleInfo },
    FormatChanged(FormatDescriptor),
    Error(CapabilityError),
}

/// A decoder the session engine can drive.
pub trait DecodingCapability: Send {
    /// Decoder name for logging.
    fn name(&self) -> &str;

    /// Prepare for `format`. Events are reported through `events` from now on.
    fn configure(
        &mut self,
        format: &FormatDescriptor,
        target: &OutputTarget,
        flags: u32,
        events: EventSink,
    ) -> Result<(), CapabilityError>;

    fn start(&mut self) -> Result<(), CapabilityError>;

    fn stop(&mut self) -> Result<(), CapabilityError>;

    /// Discard everything in flight and re-announce all input slots.
    fn flush(&mut self) -> Result<(), CapabilityError>;

    /// Free all decoder resources. The capability is unusable afterwards.
    fn release(&mut self);

    /// Bytes `slot` can hold.
    fn slot_capacity(&self, slot: Slot) -> usize;

    /// Hand `sample` to the decoder in `slot`.
    fn queue_input(&mut self, slot: Slot, sample: Sample) -> Result<(), CapabilityError>;

    /// Give output buffer `index` back, rendering it to the target when `render` is set.
    fn release_output(&mut self, index: u32, render: bool) -> Result<(), CapabilityError>;
}

/// Handle a capability uses to report events to its session engine.
///
/// Each event is stamped with the engine epoch current at the time of
/// emission; the engine drops events from older epochs (before a flush, stop
/// or release).
#[derive(Debug, Clone)]
pub struct EventSink {
    inbox: mpsc::WeakUnboundedSender<Inbox>,
    epoch: Arc<AtomicU64>,
}

impl EventSink {
    pub(crate) const fn new(inbox: mpsc::WeakUnboundedSender<Inbox>, epoch: Arc<AtomicU64>) -> Self {
        Self { inbox, epoch }
    }

    /// Report an event. Returns `false` if the session is gone.
    pub fn emit(&self, event: CapabilityEvent) -> bool {
        let Some(inbox) = self.inbox.upgrade() else {
            return false;
        };
        let epoch = self.epoch.load(Ordering::Acquire);
        inbox.send(Inbox::Capability { epoch, event }).is_ok()
    }

    pub fn slot_available(&self, slot: Slot) -> bool {
        self.emit(CapabilityEvent::InputSlotAvailable(slot))
    }

    pub fn output_ready(&self, index: u32, info: SampleInfo) -> bool {
        self.emit(CapabilityEvent::OutputReady { index, info })
    }

    pub fn format_changed(&self, format: FormatDescriptor) -> bool {
        self.emit(CapabilityEvent::FormatChanged(format))
    }

    pub fn error(&self, error: CapabilityError) -> bool {
        self.emit(CapabilityEvent::Error(error))
    }
}

#[cfg(test)]
pub(crate) mod test_sink {
    use super::*;

    /// Keeps a detached sink's inbox open.
    pub type Keep = (mpsc::UnboundedSender<Inbox>, mpsc::UnboundedReceiver<Inbox>);

    /// Sink not attached to any engine, for exercising capabilities directly.
    pub fn detached() -> (EventSink, mpsc::UnboundedSender<Inbox>, mpsc::UnboundedReceiver<Inbox>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx.downgrade(), Arc::new(AtomicU64::new(0)));
        (sink, tx, rx)
    }

    /// Collect every event currently queued.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Inbox>) -> Vec<CapabilityEvent> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Inbox::Capability { event, .. } = message {
                events.push(event);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_host_codes() {
        assert_eq!(CapabilityError::NotReady.host_code(), HostErrorCode::CodecNotReady);
        assert_eq!(CapabilityError::Input("x".into()).host_code(), HostErrorCode::Input);
        assert_eq!(CapabilityError::Fault("x".into()).host_code(), HostErrorCode::Unknown);
    }

    #[test]
    fn sink_reports_false_once_engine_is_gone() {
        let (sink, tx, mut rx) = test_sink::detached();
        assert!(sink.slot_available(Slot(0)));
        assert_eq!(
            test_sink::drain(&mut rx),
            vec![CapabilityEvent::InputSlotAvailable(Slot(0))]
        );

        drop(tx);
        assert!(!sink.slot_available(Slot(1)));
    }
}
