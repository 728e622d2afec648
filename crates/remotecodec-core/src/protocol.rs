//! Messages exchanged between a client and the session host.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codes::HostErrorCode;
use crate::format::{FormatDescriptor, OutputTarget};
use crate::sample::Sample;

/// Opaque identifier of a session on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionRef(uuid::Uuid);

impl SessionRef {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Callback traffic flowing from a session back to its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// One queued sample was handed to the decoder; the client may send the next.
    InputConsumed,
    OutputFormatChanged(FormatDescriptor),
    /// A decoded output buffer was released. An EOS-flagged output is terminal.
    Output(Sample),
    Error(HostErrorCode),
}

/// Per-session callback sink handed to the host when the session is created.
pub type CallbackSender = mpsc::UnboundedSender<SessionEvent>;

/// Requests a client sends to the host.
#[derive(Debug)]
pub enum HostRequest {
    CreateSession {
        callbacks: CallbackSender,
    },
    Configure {
        session: SessionRef,
        format: FormatDescriptor,
        target: OutputTarget,
        flags: u32,
    },
    Start(SessionRef),
    Stop(SessionRef),
    Flush(SessionRef),
    Release(SessionRef),
    Input {
        session: SessionRef,
        sample: Sample,
    },
}

impl HostRequest {
    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::Configure { .. } => "configure",
            Self::Start(_) => "start",
            Self::Stop(_) => "stop",
            Self::Flush(_) => "flush",
            Self::Release(_) => "release",
            Self::Input { .. } => "input",
        }
    }

    /// Session the request targets, if any.
    pub const fn session(&self) -> Option<SessionRef> {
        match self {
            Self::CreateSession { .. } => None,
            Self::Configure { session, .. } | Self::Input { session, .. } => Some(*session),
            Self::Start(session)
            | Self::Stop(session)
            | Self::Flush(session)
            | Self::Release(session) => Some(*session),
        }
    }
}

/// Host replies, one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostReply {
    SessionCreated(SessionRef),
    /// Outcome of configure+start. `false` means bad format or no suitable decoder.
    Configured(bool),
    Done,
    Rejected(HostErrorCode),
}
