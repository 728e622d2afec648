//! Cloneable handle to a running session engine.

use std::sync::Arc;

use remotecodec_core::{CallbackSender, FormatDescriptor, OutputTarget, Sample, SessionRef};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, info_span};

use super::actor::SessionEngine;
use super::types::{EngineCommand, EngineError, EngineSnapshot, EngineState, Inbox, Reply};
use crate::capability::CapabilityRegistry;

/// Request/reply front of a session engine actor.
///
/// Every method queues behind whatever the engine is already doing. Once the
/// engine has released, commands fail with [`EngineError::Released`] and
/// [`release`](Self::release) keeps succeeding.
#[derive(Debug, Clone)]
pub struct SessionEngineHandle {
    session: SessionRef,
    inbox: mpsc::UnboundedSender<Inbox>,
}

impl SessionEngineHandle {
    /// Spawn an unconfigured engine that reports to `callbacks`.
    pub fn spawn(
        session: SessionRef,
        registry: Arc<CapabilityRegistry>,
        callbacks: CallbackSender,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = SessionEngine::new(session, registry, tx.downgrade(), callbacks);
        tokio::spawn(
            engine
                .run(rx)
                .instrument(info_span!("session", session = %session)),
        );
        Self { session, inbox: tx }
    }

    pub const fn session(&self) -> SessionRef {
        self.session
    }

    /// Select a decoder for `format`, then configure and start it.
    pub async fn configure(
        &self,
        format: FormatDescriptor,
        target: OutputTarget,
        flags: u32,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Configure {
            format,
            target,
            flags,
            reply,
        })
        .await
    }

    /// Queue a sample. `Ok` means accepted, not yet submitted.
    pub async fn input(&self, sample: Sample) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Input { sample, reply })
            .await
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Stop { reply }).await
    }

    pub async fn flush(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Flush { reply }).await
    }

    /// Release the session. Safe to call any number of times.
    pub async fn release(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .inbox
            .send(Inbox::Command(EngineCommand::Release { reply: tx }))
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Current engine view, or `None` once the engine has exited.
    pub async fn snapshot(&self) -> Option<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(EngineCommand::Snapshot { reply: tx }))
            .ok()?;
        rx.await.ok()
    }

    pub async fn state(&self) -> EngineState {
        self.snapshot()
            .await
            .map_or(EngineState::Released, |snapshot| snapshot.state)
    }

    /// Whether the engine task has exited.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> EngineCommand,
    ) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(command(tx)))
            .map_err(|_| EngineError::Released)?;
        rx.await.map_err(|_| EngineError::Released)?
    }
}
