//! Numeric error codes shared by host and client.
//!
//! The host reports small negative codes over the channel. The client
//! surfaces them in a separate band offset by [`REMOTE_ERROR_BASE`], next to
//! its own local codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Offset of the remote-error band in the client code space.
pub const REMOTE_ERROR_BASE: i32 = -1000;

/// Error codes reported by the session host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostErrorCode {
    /// No configured and started decoder behind the session.
    CodecNotReady,
    /// A single input sample could not be accepted or submitted.
    Input,
    /// Decoder fault or anything unclassified.
    Unknown,
}

impl HostErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::CodecNotReady => -1,
            Self::Input => -2,
            Self::Unknown => -3,
        }
    }

    /// Parse a raw host code. Unrecognised codes become [`Self::Unknown`].
    pub const fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::CodecNotReady,
            -2 => Self::Input,
            _ => Self::Unknown,
        }
    }
}

/// Error codes exposed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    Released,
    RemoteDead,
    RemoteCodecNotReady,
    RemoteInput,
    RemoteUnknown,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Released => -1,
            Self::RemoteDead => REMOTE_ERROR_BASE,
            Self::RemoteCodecNotReady => REMOTE_ERROR_BASE + HostErrorCode::CodecNotReady.code(),
            Self::RemoteInput => REMOTE_ERROR_BASE + HostErrorCode::Input.code(),
            Self::RemoteUnknown => REMOTE_ERROR_BASE + HostErrorCode::Unknown.code(),
        }
    }

    /// Map a host-reported code into the client's remote band.
    pub const fn translate_remote(code: HostErrorCode) -> Self {
        match code {
            HostErrorCode::CodecNotReady => Self::RemoteCodecNotReady,
            HostErrorCode::Input => Self::RemoteInput,
            HostErrorCode::Unknown => Self::RemoteUnknown,
        }
    }

    pub const fn is_remote(self) -> bool {
        self.code() <= REMOTE_ERROR_BASE
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Released => "RELEASED",
            Self::RemoteDead => "REMOTE_DEAD",
            Self::RemoteCodecNotReady => "REMOTE_CODEC_NOT_READY",
            Self::RemoteInput => "REMOTE_INPUT",
            Self::RemoteUnknown => "REMOTE_UNKNOWN",
        };
        write!(f, "{name}({})", self.code())
    }
}
