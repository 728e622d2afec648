//! In-process connector to a [`MediaHost`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use remotecodec_core::{ChannelEndpoint, ChannelError, Connector};
use tracing::debug;

use super::{HostLink, MediaHost};

/// Connects clients to a host running in the same process.
///
/// Keeps the [`HostLink`] of every live connection it made so the host side
/// can be killed to exercise recovery. Finished links are dropped on the
/// next connect.
#[derive(Debug)]
pub struct LocalConnector {
    host: Arc<MediaHost>,
    available: AtomicBool,
    attempts: AtomicUsize,
    accepted: AtomicUsize,
    links: Mutex<Vec<HostLink>>,
}

impl LocalConnector {
    pub fn new(host: Arc<MediaHost>) -> Self {
        Self {
            host,
            available: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        }
    }

    /// While unavailable, every connection attempt fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Connection attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Links still held, including any that finished since the last connect.
    pub fn tracked_links(&self) -> usize {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Kill the most recent connection. Returns `false` if there is none.
    pub fn kill_current(&self) -> bool {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.last().is_some_and(|link| {
            link.kill();
            true
        })
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<ChannelEndpoint, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.available.load(Ordering::SeqCst) {
            debug!(attempt, "Host unavailable");
            return Err(ChannelError::Unavailable("host is not running".into()));
        }
        let (endpoint, link) = self.host.accept();
        self.accepted.fetch_add(1, Ordering::SeqCst);
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.retain(|link| !link.is_finished());
        links.push(link);
        Ok(endpoint)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use remotecodec_core::{HostConfig, LoopbackConfig};

    use super::*;
    use crate::capability::CapabilityRegistry;

    fn connector() -> LocalConnector {
        let host = MediaHost::new(
            CapabilityRegistry::with_loopback(&LoopbackConfig::default()),
            HostConfig::default(),
            8,
        );
        LocalConnector::new(Arc::new(host))
    }

    async fn wait_all_finished(connector: &LocalConnector) {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let done = connector
                    .links
                    .lock()
                    .unwrap()
                    .iter()
                    .all(HostLink::is_finished);
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn reconnects_do_not_accumulate_dead_links() {
        let connector = connector();
        let mut endpoint = connector.connect().await.unwrap();

        for _ in 0..3 {
            assert!(connector.kill_current());
            wait_all_finished(&connector).await;
            assert!(!endpoint.is_alive());
            endpoint = connector.connect().await.unwrap();
            assert_eq!(connector.tracked_links(), 1);
        }

        assert!(endpoint.is_alive());
        assert_eq!(connector.connections(), 4);
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test]
    async fn unavailable_host_counts_attempts_only() {
        let connector = connector();
        connector.set_available(false);
        assert_eq!(
            connector.connect().await.unwrap_err(),
            ChannelError::Unavailable("host is not running".into())
        );
        assert!(!connector.kill_current());
        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.connections(), 0);
    }
}
