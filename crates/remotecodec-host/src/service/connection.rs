//! Serving loop for one client connection.

use std::collections::HashMap;
use std::sync::Arc;

use remotecodec_core::{
    ChannelServer, HostConfig, HostErrorCode, HostReply, HostRequest, SessionRef,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilityRegistry;
use crate::engine::{EngineError, SessionEngineHandle};

pub(super) struct HostConnection {
    registry: Arc<CapabilityRegistry>,
    config: HostConfig,
    sessions: HashMap<SessionRef, SessionEngineHandle>,
}

fn rejected(op: &'static str, session: SessionRef, e: &EngineError) -> HostReply {
    warn!(%session, op, error = %e, "Request rejected");
    HostReply::Rejected(e.host_code())
}

impl HostConnection {
    pub(super) fn new(registry: Arc<CapabilityRegistry>, config: HostConfig) -> Self {
        Self {
            registry,
            config,
            sessions: HashMap::new(),
        }
    }

    pub(super) async fn serve(mut self, server: ChannelServer, cancel: CancellationToken) {
        let (mut requests, guard) = server.into_parts();

        loop {
            let envelope = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Connection killed");
                    guard.mark_dead();
                    break;
                }
                envelope = requests.recv() => envelope,
            };
            let Some(envelope) = envelope else {
                info!("Client disconnected");
                break;
            };

            let name = envelope.request.name();
            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(request = name, "Connection killed mid-request");
                    // Dead before the responder drops, so the caller sees PeerDead.
                    guard.mark_dead();
                    break;
                }
                reply = self.handle(envelope.request) => reply,
            };
            if !envelope.responder.send(reply) {
                debug!(request = name, "Caller stopped waiting for reply");
            }
        }

        guard.mark_dead();
        drop(requests);
        let count = self.sessions.len();
        for (_, engine) in self.sessions.drain() {
            engine.release().await;
        }
        info!(sessions = count, "Connection closed, sessions released");
    }

    async fn handle(&mut self, request: HostRequest) -> HostReply {
        match request {
            HostRequest::CreateSession { callbacks } => {
                self.sessions.retain(|_, engine| !engine.is_closed());
                if self.sessions.len() >= self.config.max_sessions {
                    warn!(max = self.config.max_sessions, "Session limit reached");
                    return HostReply::Rejected(HostErrorCode::Unknown);
                }
                let session = SessionRef::new();
                let engine =
                    SessionEngineHandle::spawn(session, Arc::clone(&self.registry), callbacks);
                self.sessions.insert(session, engine);
                info!(%session, "Created session");
                HostReply::SessionCreated(session)
            }
            HostRequest::Configure {
                session,
                format,
                target,
                flags,
            } => {
                let Some(engine) = self.sessions.get(&session) else {
                    return unknown_session("configure", session);
                };
                match engine.configure(format, target, flags).await {
                    Ok(()) => HostReply::Configured(true),
                    Err(e) => {
                        warn!(%session, error = %e, "Configure failed");
                        HostReply::Configured(false)
                    }
                }
            }
            HostRequest::Start(session) => {
                let Some(engine) = self.sessions.get(&session) else {
                    return unknown_session("start", session);
                };
                engine
                    .start()
                    .await
                    .map_or_else(|e| rejected("start", session, &e), |()| HostReply::Done)
            }
            HostRequest::Stop(session) => {
                let Some(engine) = self.sessions.get(&session) else {
                    return unknown_session("stop", session);
                };
                engine
                    .stop()
                    .await
                    .map_or_else(|e| rejected("stop", session, &e), |()| HostReply::Done)
            }
            HostRequest::Flush(session) => {
                let Some(engine) = self.sessions.get(&session) else {
                    return unknown_session("flush", session);
                };
                engine
                    .flush()
                    .await
                    .map_or_else(|e| rejected("flush", session, &e), |()| HostReply::Done)
            }
            HostRequest::Input { session, sample } => {
                let Some(engine) = self.sessions.get(&session) else {
                    return unknown_session("input", session);
                };
                engine
                    .input(sample)
                    .await
                    .map_or_else(|e| rejected("input", session, &e), |()| HostReply::Done)
            }
            HostRequest::Release(session) => {
                if let Some(engine) = self.sessions.remove(&session) {
                    engine.release().await;
                } else {
                    debug!(%session, "Release of unknown session");
                }
                HostReply::Done
            }
        }
    }
}

fn unknown_session(op: &'static str, session: SessionRef) -> HostReply {
    warn!(%session, op, "Unknown session");
    HostReply::Rejected(HostErrorCode::CodecNotReady)
}
