//! Client-side session proxy.
//!
//! A [`SessionProxy`] stands in for one remote session. Calls are serialized
//! per proxy and answered with a [`CallStatus`]. Session events are delivered
//! to the client's [`SessionCallbacks`] by a forwarder task, which also turns
//! the death of the host connection into a single
//! [`ErrorCode::RemoteDead`] callback.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use remotecodec_core::{
    ChannelError, ErrorCode, FormatDescriptor, HostErrorCode, HostReply, HostRequest,
    OutputTarget, Sample, SessionEvent, SessionRef,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::callbacks::SessionCallbacks;
use crate::supervisor::{ConnectError, ConnectionHandle, ConnectionSupervisor, PeerDeath};

/// Result of a proxy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Ok,
    NotReady,
    SessionCreateFailed,
    PeerDead,
    InputRejected,
    Unknown,
}

impl CallStatus {
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::NotReady => -1,
            Self::SessionCreateFailed => -2,
            Self::PeerDead => -3,
            Self::InputRejected => -4,
            Self::Unknown => -5,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    const fn from_host(code: HostErrorCode) -> Self {
        match code {
            HostErrorCode::CodecNotReady => Self::NotReady,
            HostErrorCode::Input => Self::InputRejected,
            HostErrorCode::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::NotReady => "NOT_READY",
            Self::SessionCreateFailed => "SESSION_CREATE_FAILED",
            Self::PeerDead => "PEER_DEAD",
            Self::InputRejected => "INPUT_REJECTED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{name}({})", self.code())
    }
}

/// Why a session proxy could not be created.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Host refused to create a session: {0:?}")]
    CreateRejected(HostErrorCode),

    #[error("Host could not configure a decoder for {format}")]
    ConfigureFailed { format: String },

    #[error("Host connection died")]
    PeerDead,

    #[error("Channel error: {0}")]
    Channel(ChannelError),

    #[error("Unexpected reply to {op}: {reply:?}")]
    UnexpectedReply { op: &'static str, reply: HostReply },
}

impl ProxyError {
    pub const fn status(&self) -> CallStatus {
        match self {
            Self::Connect(_) | Self::CreateRejected(_) | Self::ConfigureFailed { .. } => {
                CallStatus::SessionCreateFailed
            }
            Self::PeerDead => CallStatus::PeerDead,
            Self::Channel(_) | Self::UnexpectedReply { .. } => CallStatus::Unknown,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    dead: AtomicBool,
    notified: AtomicBool,
    released: AtomicBool,
}

pub struct SessionProxy {
    session: SessionRef,
    connection: ConnectionHandle,
    supervisor: Arc<ConnectionSupervisor>,
    shared: Arc<Shared>,
    calls: Mutex<()>,
    forwarder: JoinHandle<()>,
}

impl fmt::Debug for SessionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProxy")
            .field("session", &self.session)
            .field("generation", &self.connection.generation())
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

/// Send one request, reporting a dead peer to the supervisor.
async fn call_host(
    supervisor: &ConnectionSupervisor,
    connection: &ConnectionHandle,
    request: HostRequest,
) -> Result<HostReply, ProxyError> {
    connection.call(request).await.map_err(|e| match e {
        ChannelError::PeerDead => {
            supervisor.report_peer_death(connection);
            ProxyError::PeerDead
        }
        other => ProxyError::Channel(other),
    })
}

impl SessionProxy {
    /// Create and configure a remote session.
    ///
    /// Waits for the host connection as the supervisor's retry policy allows,
    /// then creates the session, configures and starts it, and begins
    /// forwarding its events to `callbacks`.
    pub async fn create(
        supervisor: &Arc<ConnectionSupervisor>,
        format: FormatDescriptor,
        target: OutputTarget,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Self, ProxyError> {
        Self::create_with_flags(supervisor, format, target, 0, callbacks).await
    }

    pub async fn create_with_flags(
        supervisor: &Arc<ConnectionSupervisor>,
        format: FormatDescriptor,
        target: OutputTarget,
        flags: u32,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Self, ProxyError> {
        // Subscribe first so a death right after connecting is not missed.
        let deaths = supervisor.subscribe_deaths();
        let connection = supervisor.ensure_connected().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reply = call_host(
            supervisor,
            &connection,
            HostRequest::CreateSession {
                callbacks: events_tx,
            },
        )
        .await?;
        let session = match reply {
            HostReply::SessionCreated(session) => session,
            HostReply::Rejected(code) => return Err(ProxyError::CreateRejected(code)),
            reply => {
                return Err(ProxyError::UnexpectedReply {
                    op: "create_session",
                    reply,
                });
            }
        };

        let described = format.to_string();
        let request = HostRequest::Configure {
            session,
            format,
            target,
            flags,
        };
        match call_host(supervisor, &connection, request).await? {
            HostReply::Configured(true) => {}
            HostReply::Configured(false) => {
                warn!(%session, format = %described, "Remote configure failed");
                // The host frees the session anyway once our event receiver drops.
                let _ = connection.call(HostRequest::Release(session)).await;
                return Err(ProxyError::ConfigureFailed { format: described });
            }
            reply => {
                return Err(ProxyError::UnexpectedReply {
                    op: "configure",
                    reply,
                });
            }
        }

        let shared = Arc::new(Shared::default());
        let forwarder = tokio::spawn(
            forward_events(
                events_rx,
                deaths,
                connection.clone(),
                Arc::clone(&shared),
                callbacks,
            )
            .instrument(info_span!("session_proxy", %session)),
        );
        info!(
            %session,
            generation = connection.generation(),
            format = %described,
            "Remote session ready"
        );

        Ok(Self {
            session,
            connection,
            supervisor: Arc::clone(supervisor),
            shared,
            calls: Mutex::new(()),
            forwarder,
        })
    }

    pub const fn session(&self) -> SessionRef {
        self.session
    }

    /// Generation of the connection this session lives on.
    pub const fn generation(&self) -> u64 {
        self.connection.generation()
    }

    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Queue one sample on the remote session.
    pub async fn input(&self, sample: Sample) -> CallStatus {
        self.request("input", |session| HostRequest::Input { session, sample })
            .await
    }

    /// Drop all queued input and in-flight decoder work.
    pub async fn flush(&self) -> CallStatus {
        self.request("flush", HostRequest::Flush).await
    }

    pub async fn stop(&self) -> CallStatus {
        self.request("stop", HostRequest::Stop).await
    }

    pub async fn start(&self) -> CallStatus {
        self.request("start", HostRequest::Start).await
    }

    /// Release the remote session. Always `Ok` once released, including when
    /// the host is already gone.
    pub async fn release(&self) -> CallStatus {
        let _serial = self.calls.lock().await;
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return CallStatus::Ok;
        }
        self.forwarder.abort();

        if self.check_dead() {
            debug!(session = %self.session, "Released session on dead connection");
            return CallStatus::Ok;
        }
        let request = HostRequest::Release(self.session);
        match call_host(&self.supervisor, &self.connection, request).await {
            Ok(HostReply::Done) => {
                info!(session = %self.session, "Released remote session");
                CallStatus::Ok
            }
            Err(ProxyError::PeerDead) => {
                self.shared.dead.store(true, Ordering::Release);
                CallStatus::Ok
            }
            Ok(HostReply::Rejected(code)) => CallStatus::from_host(code),
            Ok(reply) => {
                warn!(session = %self.session, ?reply, "Unexpected reply to release");
                CallStatus::Unknown
            }
            Err(e) => {
                warn!(session = %self.session, error = %e, "Release failed");
                CallStatus::Unknown
            }
        }
    }

    /// Whether the connection is known dead, reporting it if just noticed.
    fn check_dead(&self) -> bool {
        if self.shared.dead.load(Ordering::Acquire) {
            return true;
        }
        if self.connection.is_alive() {
            return false;
        }
        self.shared.dead.store(true, Ordering::Release);
        self.supervisor.report_peer_death(&self.connection);
        true
    }

    async fn request<F>(&self, op: &'static str, build: F) -> CallStatus
    where
        F: FnOnce(SessionRef) -> HostRequest,
    {
        let _serial = self.calls.lock().await;
        if self.is_released() {
            debug!(session = %self.session, op, "Call on released session");
            return CallStatus::NotReady;
        }
        if self.check_dead() {
            return CallStatus::PeerDead;
        }

        match call_host(&self.supervisor, &self.connection, build(self.session)).await {
            Ok(HostReply::Done) => CallStatus::Ok,
            Ok(HostReply::Rejected(code)) => {
                let status = CallStatus::from_host(code);
                debug!(session = %self.session, op, %status, "Call rejected by host");
                status
            }
            Ok(reply) => {
                warn!(session = %self.session, op, ?reply, "Unexpected reply");
                CallStatus::Unknown
            }
            Err(ProxyError::PeerDead) => {
                self.shared.dead.store(true, Ordering::Release);
                CallStatus::PeerDead
            }
            Err(e) => {
                warn!(session = %self.session, op, error = %e, "Call failed");
                CallStatus::Unknown
            }
        }
    }
}

impl Drop for SessionProxy {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn deliver(callbacks: &dyn SessionCallbacks, event: SessionEvent) {
    match event {
        SessionEvent::InputConsumed => callbacks.on_input_consumed(),
        SessionEvent::OutputFormatChanged(format) => callbacks.on_output_format_changed(&format),
        SessionEvent::Output(sample) => callbacks.on_output(sample),
        SessionEvent::Error(code) => callbacks.on_error(ErrorCode::translate_remote(code)),
    }
}

fn notify_dead(shared: &Shared, callbacks: &dyn SessionCallbacks) {
    shared.dead.store(true, Ordering::Release);
    if !shared.notified.swap(true, Ordering::AcqRel) {
        warn!("Host connection lost");
        callbacks.on_error(ErrorCode::RemoteDead);
    }
}

async fn forward_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut deaths: broadcast::Receiver<PeerDeath>,
    connection: ConnectionHandle,
    shared: Arc<Shared>,
    callbacks: Arc<dyn SessionCallbacks>,
) {
    let generation = connection.generation();
    let mut events_open = true;

    loop {
        tokio::select! {
            biased;
            event = events.recv(), if events_open => match event {
                Some(event) => deliver(callbacks.as_ref(), event),
                None => {
                    debug!("Host closed the event stream");
                    events_open = false;
                }
            },
            death = deaths.recv() => match death {
                Ok(death) if death.generation == generation => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "Missed peer death notices");
                    if !connection.is_alive() {
                        break;
                    }
                }
                Err(RecvError::Closed) => {
                    // Supervisor gone; fall back to the connection itself.
                    connection.endpoint().liveness().died().await;
                    break;
                }
            },
        }
    }

    // Whatever the host sent before dying is still delivered.
    while let Ok(event) = events.try_recv() {
        deliver(callbacks.as_ref(), event);
    }
    notify_dead(&shared, callbacks.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let codes: Vec<i32> = [
            CallStatus::Ok,
            CallStatus::NotReady,
            CallStatus::SessionCreateFailed,
            CallStatus::PeerDead,
            CallStatus::InputRejected,
            CallStatus::Unknown,
        ]
        .into_iter()
        .map(CallStatus::code)
        .collect();
        assert_eq!(codes, vec![0, -1, -2, -3, -4, -5]);
        assert_eq!(CallStatus::PeerDead.to_string(), "PEER_DEAD(-3)");
    }

    #[test]
    fn host_rejections_map_to_statuses() {
        assert_eq!(
            CallStatus::from_host(HostErrorCode::CodecNotReady),
            CallStatus::NotReady
        );
        assert_eq!(
            CallStatus::from_host(HostErrorCode::Input),
            CallStatus::InputRejected
        );
        assert_eq!(
            CallStatus::from_host(HostErrorCode::Unknown),
            CallStatus::Unknown
        );
    }

    #[test]
    fn creation_failures_report_create_failed() {
        let exhausted = ProxyError::Connect(ConnectError::RetriesExhausted {
            attempts: 3,
            last_error: "down".into(),
        });
        assert_eq!(exhausted.status(), CallStatus::SessionCreateFailed);
        assert_eq!(
            ProxyError::ConfigureFailed {
                format: "video/avc".into()
            }
            .status(),
            CallStatus::SessionCreateFailed
        );
        assert_eq!(ProxyError::PeerDead.status(), CallStatus::PeerDead);
    }
}
