//! `remotecodec` client side.
//!
//! - [`ConnectionSupervisor`]: lazily established, shared host connection
//!   with retry and peer-death broadcast
//! - [`SessionProxy`]: one remote decoding session with status-code results
//! - [`SessionCallbacks`]: the client's view of session events

pub mod callbacks;
pub mod proxy;
pub mod retry;
pub mod supervisor;

pub use callbacks::{CallbackEvent, ChannelCallbacks, SessionCallbacks};
pub use proxy::{CallStatus, ProxyError, SessionProxy};
pub use retry::RetryPolicy;
pub use supervisor::{
    ConnectError, ConnectionHandle, ConnectionState, ConnectionSupervisor, PeerDeath,
};
