//! Session engine types.

use std::fmt;

use remotecodec_core::{FormatDescriptor, HostErrorCode, OutputTarget, Sample};
use tokio::sync::oneshot;

use crate::capability::{CapabilityError, CapabilityEvent};

/// Lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Unconfigured,
    Configuring,
    Ready,
    /// EOS was submitted; output keeps flowing until the EOS output.
    Draining,
    Stopped,
    Faulted,
    Released,
}

impl EngineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
            Self::Released => "released",
        }
    }

    /// Whether the capability is running.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Ready | Self::Draining)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub queued: usize,
    pub free_slots: usize,
    pub claimed_slots: usize,
    /// Samples handed to the capability since the last flush or stop.
    pub submitted: u64,
    pub eos_output: bool,
}

/// Session engine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Bad format: {0}")]
    BadFormat(String),

    #[error("No decoder for {mime}")]
    NoDecoder { mime: String },

    #[error("Decoder setup failed: {0}")]
    Setup(CapabilityError),

    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: EngineState },

    #[error("Input queue closed by end of stream")]
    QueueClosed,

    #[error("Session faulted")]
    Faulted,

    #[error("Session released")]
    Released,

    #[error(transparent)]
    Capability(CapabilityError),
}

impl EngineError {
    /// Code reported to the client for this failure.
    pub const fn host_code(&self) -> HostErrorCode {
        match self {
            Self::QueueClosed => HostErrorCode::Input,
            Self::InvalidState { .. } | Self::Released => HostErrorCode::CodecNotReady,
            Self::Capability(e) | Self::Setup(e) => e.host_code(),
            Self::BadFormat(_) | Self::NoDecoder { .. } | Self::Faulted => HostErrorCode::Unknown,
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<(), EngineError>>;

/// Client commands handled by the engine actor.
pub(crate) enum EngineCommand {
    Configure {
        format: FormatDescriptor,
        target: OutputTarget,
        flags: u32,
        reply: Reply,
    },
    Input {
        sample: Sample,
        reply: Reply,
    },
    Start {
        reply: Reply,
    },
    Stop {
        reply: Reply,
    },
    Flush {
        reply: Reply,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
}

/// Everything the engine actor reacts to, in arrival order.
pub(crate) enum Inbox {
    Command(EngineCommand),
    Capability { epoch: u64, event: CapabilityEvent },
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(_) => f.write_str("Command"),
            Self::Capability { epoch, event } => f
                .debug_struct("Capability")
                .field("epoch", epoch)
                .field("event", event)
                .finish(),
        }
    }
}
