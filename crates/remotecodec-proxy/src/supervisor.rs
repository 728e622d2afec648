//! Connection supervisor.
//!
//! Owns the single connection to the session host. The connection is created
//! lazily by the first caller of [`ConnectionSupervisor::ensure_connected`];
//! callers arriving while an attempt is running wait for that same attempt.
//! A peer death, however it is observed, invalidates the connection and is
//! broadcast to listeners exactly once. The next `ensure_connected` starts a
//! fresh attempt.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use remotecodec_core::{
    ChannelEndpoint, ChannelError, Connector, DeathSubscription, HostReply, HostRequest,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// A live connection to the host. Clones share the same identity.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    generation: u64,
    endpoint: ChannelEndpoint,
    dead: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Sequence number of this connection; increases with every reconnect.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn endpoint(&self) -> &ChannelEndpoint {
        &self.endpoint
    }

    pub fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::Acquire) && self.endpoint.is_alive()
    }

    pub async fn call(&self, request: HostRequest) -> Result<HostReply, ChannelError> {
        self.endpoint.call(request).await
    }
}

/// Broadcast when the connection of `generation` dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDeath {
    pub generation: u64,
}

/// Connection establishment failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Connection attempt abandoned")]
    Abandoned,
}

/// Coarse supervisor state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Outcome = Option<Result<ConnectionHandle, ConnectError>>;

enum SupervisorState {
    Disconnected,
    Connecting(watch::Receiver<Outcome>),
    Connected {
        handle: ConnectionHandle,
        _watcher: DeathSubscription,
    },
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    state: Mutex<SupervisorState>,
    deaths: broadcast::Sender<PeerDeath>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Arc<Self> {
        let (deaths, _) = broadcast::channel(16);
        Arc::new(Self {
            connector,
            policy,
            state: Mutex::new(SupervisorState::Disconnected),
            deaths,
            next_generation: AtomicU64::new(1),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.lock_state() {
            SupervisorState::Disconnected => ConnectionState::Disconnected,
            SupervisorState::Connecting(_) => ConnectionState::Connecting,
            SupervisorState::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// The current connection, if one is established and alive.
    pub fn current(&self) -> Option<ConnectionHandle> {
        match &*self.lock_state() {
            SupervisorState::Connected { handle, .. } if handle.is_alive() => Some(handle.clone()),
            _ => None,
        }
    }

    /// Listen for peer deaths. Subscribe before connecting to see every death
    /// of the connection you end up using.
    pub fn subscribe_deaths(&self) -> broadcast::Receiver<PeerDeath> {
        self.deaths.subscribe()
    }

    /// Return the live connection, connecting first if needed.
    ///
    /// Concurrent callers share one attempt. With the default policy this
    /// waits until the host becomes reachable.
    pub async fn ensure_connected(self: &Arc<Self>) -> Result<ConnectionHandle, ConnectError> {
        let mut outcome = {
            let mut state = self.lock_state();
            if let SupervisorState::Connected { handle, .. } = &*state {
                if handle.is_alive() {
                    return Ok(handle.clone());
                }
                let stale = handle.clone();
                self.invalidate(&mut state, &stale);
            }

            if let SupervisorState::Connecting(outcome) = &*state {
                debug!("Joining connection attempt in progress");
                outcome.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                *state = SupervisorState::Connecting(rx.clone());
                tokio::spawn(Arc::clone(self).run_attempts(tx));
                rx
            }
        };

        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConnectError::Abandoned)?;
        (*result).clone().unwrap_or(Err(ConnectError::Abandoned))
    }

    /// Declare `handle`'s connection dead.
    ///
    /// Every death path (liveness watch, failed call, stale handle) funnels
    /// through here. Returns `true` only for the first report of a given
    /// connection; later reports are ignored.
    pub fn report_peer_death(&self, handle: &ConnectionHandle) -> bool {
        let mut state = self.lock_state();
        self.invalidate(&mut state, handle)
    }

    fn invalidate(&self, state: &mut SupervisorState, handle: &ConnectionHandle) -> bool {
        if handle.dead.swap(true, Ordering::AcqRel) {
            return false;
        }
        let is_current = matches!(
            state,
            SupervisorState::Connected { handle: current, .. }
                if current.generation == handle.generation
        );
        if is_current {
            *state = SupervisorState::Disconnected;
        }
        warn!(generation = handle.generation, "Host connection died");
        let _ = self.deaths.send(PeerDeath {
            generation: handle.generation,
        });
        true
    }

    async fn run_attempts(self: Arc<Self>, outcome: watch::Sender<Outcome>) {
        let poll = self.policy.poll_interval;
        let mut attempts: u32 = 0;

        let result = loop {
            let started = Instant::now();
            let error = match tokio::time::timeout(poll, self.connector.connect()).await {
                Ok(Ok(endpoint)) => break Ok(self.install(endpoint)),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("not connected within {}ms", poll.as_millis()),
            };

            attempts = attempts.saturating_add(1);
            if !self.policy.should_retry(attempts) {
                error!(attempts, error = %error, "Giving up on host connection");
                *self.lock_state() = SupervisorState::Disconnected;
                break Err(ConnectError::RetriesExhausted {
                    attempts,
                    last_error: error,
                });
            }

            let delay = self
                .policy
                .delay_for_attempt(attempts - 1)
                .saturating_sub(started.elapsed());
            warn!(
                attempt = attempts,
                error = %error,
                delay_ms = delay.as_millis(),
                "Host not connected, trying again"
            );
            tokio::time::sleep(delay).await;
        };

        outcome.send_replace(Some(result));
    }

    fn install(self: &Arc<Self>, endpoint: ChannelEndpoint) -> ConnectionHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle {
            generation,
            endpoint,
            dead: Arc::new(AtomicBool::new(false)),
        };

        let supervisor: Weak<Self> = Arc::downgrade(self);
        let watched = handle.clone();
        let watcher = handle.endpoint.liveness().on_death(move || {
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.report_peer_death(&watched);
            }
        });

        *self.lock_state() = SupervisorState::Connected {
            handle: handle.clone(),
            _watcher: watcher,
        };
        info!(generation, "Connected to host");
        handle
    }
}
