//! `remotecodec` Core Library
//!
//! Shared functionality for the codec host and its clients:
//! - Sample, format and output-target data model
//! - Host/client error codes
//! - Protocol messages and the abstract request/reply channel
//! - Peer liveness watches
//! - Configuration resolution and tracing setup

pub mod channel;
pub mod codes;
pub mod config;
pub mod error;
pub mod format;
pub mod liveness;
pub mod protocol;
pub mod sample;
pub mod tracing_init;

pub use channel::{ChannelEndpoint, ChannelError, ChannelServer, Connector, Envelope};
pub use codes::{ErrorCode, HostErrorCode};
pub use config::{Config, ConnectionConfig, HostConfig, LoggingConfig, LoopbackConfig, load_config};
pub use error::{Error, Result};
pub use format::{FormatDescriptor, MediaKind, OutputTarget};
pub use liveness::{DeathSubscription, LivenessGuard, LivenessWatch};
pub use protocol::{CallbackSender, HostReply, HostRequest, SessionEvent, SessionRef};
pub use sample::{Sample, SampleFlags, SampleInfo};
