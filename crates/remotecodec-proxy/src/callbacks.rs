//! Client-facing session callbacks.

use remotecodec_core::{ErrorCode, FormatDescriptor, Sample};
use tokio::sync::mpsc;

/// Receives a session's asynchronous traffic.
///
/// Calls for one session arrive in order from a single task. Implementations
/// should return quickly; a slow callback delays every later one.
pub trait SessionCallbacks: Send + Sync + 'static {
    /// One submitted sample was consumed; the next one may be sent.
    fn on_input_consumed(&self);

    fn on_output_format_changed(&self, format: &FormatDescriptor);

    /// A decoded output was released. Only timestamp and flags are carried.
    fn on_output(&self, sample: Sample);

    /// Remote errors arrive in the remote band; [`ErrorCode::RemoteDead`]
    /// is delivered at most once, when the host connection dies.
    fn on_error(&self, code: ErrorCode);
}

/// Callback traffic as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    InputConsumed,
    OutputFormatChanged(FormatDescriptor),
    Output(Sample),
    Error(ErrorCode),
}

/// [`SessionCallbacks`] that forwards every call into a channel.
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

impl ChannelCallbacks {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallbackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: CallbackEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl SessionCallbacks for ChannelCallbacks {
    fn on_input_consumed(&self) {
        self.send(CallbackEvent::InputConsumed);
    }

    fn on_output_format_changed(&self, format: &FormatDescriptor) {
        self.send(CallbackEvent::OutputFormatChanged(format.clone()));
    }

    fn on_output(&self, sample: Sample) {
        self.send(CallbackEvent::Output(sample));
    }

    fn on_error(&self, code: ErrorCode) {
        self.send(CallbackEvent::Error(code));
    }
}
