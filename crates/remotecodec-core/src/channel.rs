//! Abstract request/reply channel between a client and the session host.
//!
//! A channel is a bounded queue of [`Envelope`]s plus a liveness pair. The
//! concrete transport (in-process, cross-process) only has to pump envelopes
//! from a [`ChannelServer`] into the host and keep the [`LivenessGuard`]
//! alive for as long as the host is reachable.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::liveness::{self, LivenessGuard, LivenessWatch};
use crate::protocol::{HostReply, HostRequest};

/// Channel-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Peer is dead")]
    PeerDead,

    #[error("Peer dropped the request without replying")]
    NoReply,

    #[error("Host unavailable: {0}")]
    Unavailable(String),
}

/// Reply slot for one request.
#[derive(Debug)]
pub struct Responder(oneshot::Sender<HostReply>);

impl Responder {
    /// Send the reply. Returns `false` if the caller stopped waiting.
    pub fn send(self, reply: HostReply) -> bool {
        self.0.send(reply).is_ok()
    }
}

/// One request travelling to the host together with its reply slot.
#[derive(Debug)]
pub struct Envelope {
    pub request: HostRequest,
    pub responder: Responder,
}

/// Client end of a channel.
#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    requests: mpsc::Sender<Envelope>,
    liveness: LivenessWatch,
}

impl ChannelEndpoint {
    pub const fn new(requests: mpsc::Sender<Envelope>, liveness: LivenessWatch) -> Self {
        Self { requests, liveness }
    }

    /// Send a request and wait for its reply.
    ///
    /// Fails with [`ChannelError::PeerDead`] if the peer is dead before the
    /// call, or dies while the call is in flight.
    pub async fn call(&self, request: HostRequest) -> Result<HostReply, ChannelError> {
        if !self.liveness.is_alive() {
            return Err(ChannelError::PeerDead);
        }

        let name = request.name();
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Envelope {
                request,
                responder: Responder(tx),
            })
            .await
            .map_err(|_| ChannelError::PeerDead)?;

        tokio::select! {
            reply = rx => reply.map_err(|_| {
                if self.liveness.is_alive() {
                    debug!(request = name, "Request dropped without a reply");
                    ChannelError::NoReply
                } else {
                    ChannelError::PeerDead
                }
            }),
            () = self.liveness.died() => Err(ChannelError::PeerDead),
        }
    }

    pub const fn liveness(&self) -> &LivenessWatch {
        &self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

/// Host end of a channel.
#[derive(Debug)]
pub struct ChannelServer {
    requests: mpsc::Receiver<Envelope>,
    guard: LivenessGuard,
}

impl ChannelServer {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.requests.recv().await
    }

    pub const fn guard(&self) -> &LivenessGuard {
        &self.guard
    }

    /// Split into the request receiver and the liveness guard.
    pub fn into_parts(self) -> (mpsc::Receiver<Envelope>, LivenessGuard) {
        (self.requests, self.guard)
    }
}

/// Create a connected endpoint/server pair with room for `capacity` queued requests.
pub fn channel(capacity: usize) -> (ChannelEndpoint, ChannelServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (guard, watch) = liveness::pair();
    (
        ChannelEndpoint::new(tx, watch),
        ChannelServer {
            requests: rx,
            guard,
        },
    )
}

/// Binds to the component hosting sessions.
///
/// Each call is one connection attempt; retry policy belongs to the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<ChannelEndpoint, ChannelError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::SessionRef;

    #[tokio::test]
    async fn call_receives_reply() {
        let (endpoint, mut server) = channel(4);
        tokio::spawn(async move {
            while let Some(envelope) = server.recv().await {
                envelope.responder.send(HostReply::Done);
            }
        });

        let reply = endpoint
            .call(HostRequest::Flush(SessionRef::new()))
            .await
            .unwrap();
        assert_eq!(reply, HostReply::Done);
    }

    #[tokio::test]
    async fn call_fails_after_server_dropped() {
        let (endpoint, server) = channel(4);
        drop(server);
        let err = endpoint
            .call(HostRequest::Release(SessionRef::new()))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::PeerDead);
    }

    #[tokio::test]
    async fn in_flight_call_fails_when_peer_dies() {
        let (endpoint, server) = channel(4);
        let (mut requests, guard) = server.into_parts();
        tokio::spawn(async move {
            // Hold the request without replying, then die.
            let _held = requests.recv().await;
            guard.mark_dead();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let err = endpoint
            .call(HostRequest::Stop(SessionRef::new()))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::PeerDead);
    }

    #[tokio::test]
    async fn dropped_responder_is_no_reply() {
        let (endpoint, mut server) = channel(4);
        tokio::spawn(async move {
            while let Some(envelope) = server.recv().await {
                drop(envelope);
            }
        });

        let err = endpoint
            .call(HostRequest::Start(SessionRef::new()))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::NoReply);
    }
}
