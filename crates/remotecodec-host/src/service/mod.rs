//! Media host service.
//!
//! [`MediaHost`] accepts client connections. Each connection gets its own
//! serving task that owns the sessions created through it; when the
//! connection ends (client gone, or the host side is killed) every session
//! on it is released.

mod connection;
mod local;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use remotecodec_core::channel;
use remotecodec_core::{ChannelEndpoint, HostConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use crate::capability::CapabilityRegistry;
use connection::HostConnection;

pub use local::LocalConnector;

/// Hosts decoding sessions for any number of client connections.
#[derive(Debug)]
pub struct MediaHost {
    registry: Arc<CapabilityRegistry>,
    config: HostConfig,
    channel_capacity: usize,
    next_connection: AtomicU64,
}

impl MediaHost {
    pub fn new(registry: CapabilityRegistry, config: HostConfig, channel_capacity: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            channel_capacity,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Accept a new client connection and start serving it.
    pub fn accept(&self) -> (ChannelEndpoint, HostLink) {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (endpoint, server) = channel::channel(self.channel_capacity);
        let cancel = CancellationToken::new();

        let connection = HostConnection::new(Arc::clone(&self.registry), self.config.clone());
        let task = tokio::spawn(
            connection
                .serve(server, cancel.clone())
                .instrument(info_span!("host_connection", connection = id)),
        );
        info!(connection = id, "Accepted client connection");

        (endpoint, HostLink { id, cancel, task })
    }
}

/// Host-side control over one accepted connection.
#[derive(Debug)]
pub struct HostLink {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HostLink {
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Tear the connection down as if the host process died.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the serving task to finish its cleanup.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}
