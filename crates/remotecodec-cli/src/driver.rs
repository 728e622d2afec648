//! Client-side stream driver.
//!
//! Sends one sample per consumed callback and recovers from host death by
//! recreating the session and resubmitting from the last consumed sample.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, info, warn};

use remotecodec_core::{ErrorCode, FormatDescriptor, OutputTarget, Sample, SampleFlags};
use remotecodec_host::LocalConnector;
use remotecodec_proxy::{
    CallStatus, CallbackEvent, ChannelCallbacks, ConnectionSupervisor, SessionProxy,
};

pub struct StreamPlan {
    pub format: FormatDescriptor,
    pub target: OutputTarget,
    pub samples: u32,
    pub frame_interval_us: i64,
    pub payload_size: usize,
    pub kill_after: Option<u32>,
}

impl StreamPlan {
    /// Sample `index`; the one past the last is the end-of-stream marker.
    fn sample(&self, index: u32) -> Sample {
        let pts = i64::from(index) * self.frame_interval_us;
        if index >= self.samples {
            return Sample::flags_only(pts, SampleFlags::END_OF_STREAM);
        }
        let flags = if index == 0 {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        Sample::new(vec![0xA5; self.payload_size], pts, flags)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Tally {
    pub sent: u32,
    pub consumed: u32,
    pub outputs: u32,
    pub errors: u32,
    pub recoveries: u32,
}

pub struct Driver {
    supervisor: Arc<ConnectionSupervisor>,
    connector: Arc<LocalConnector>,
    plan: StreamPlan,
    tally: Tally,
    /// Samples the host has consumed; the client resumes from here.
    checkpoint: u32,
    killed: bool,
}

enum SessionEnd {
    Finished,
    PeerDied,
}

impl Driver {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        connector: Arc<LocalConnector>,
        plan: StreamPlan,
    ) -> Self {
        Self {
            supervisor,
            connector,
            plan,
            tally: Tally::default(),
            checkpoint: 0,
            killed: false,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<Tally> {
        loop {
            let (callbacks, events) = ChannelCallbacks::channel();
            let proxy = SessionProxy::create(
                &self.supervisor,
                self.plan.format.clone(),
                self.plan.target.clone(),
                Arc::new(callbacks),
            )
            .await
            .context("creating session")?;
            info!(
                session = %proxy.session(),
                generation = proxy.generation(),
                resume_at = self.checkpoint,
                "Session created"
            );

            let end = self.stream(&proxy, events).await;
            let status = proxy.release().await;
            if !status.is_ok() {
                warn!(%status, "Release failed");
            }
            match end? {
                SessionEnd::Finished => return Ok(self.tally),
                SessionEnd::PeerDied => {
                    self.tally.recoveries += 1;
                    warn!(resume_at = self.checkpoint, "Host died, recreating session");
                }
            }
        }
    }

    async fn stream(
        &mut self,
        proxy: &SessionProxy,
        mut events: tokio::sync::mpsc::UnboundedReceiver<CallbackEvent>,
    ) -> anyhow::Result<SessionEnd> {
        let mut next = self.checkpoint;
        self.send(proxy, &mut next).await?;

        while let Some(event) = events.recv().await {
            match event {
                CallbackEvent::InputConsumed => {
                    self.tally.consumed += 1;
                    self.advance(proxy, &mut next).await?;
                    debug!(checkpoint = self.checkpoint, "Input consumed");
                }
                CallbackEvent::OutputFormatChanged(format) => {
                    info!(%format, "Output format changed");
                }
                CallbackEvent::Output(sample) => {
                    self.tally.outputs += 1;
                    debug!(%sample, "Output");
                    if sample.is_eos() {
                        return Ok(SessionEnd::Finished);
                    }
                }
                CallbackEvent::Error(ErrorCode::RemoteDead) => return Ok(SessionEnd::PeerDied),
                // A rejected sample ends its turn like a consumed one.
                CallbackEvent::Error(ErrorCode::RemoteInput) => {
                    self.tally.errors += 1;
                    warn!(checkpoint = self.checkpoint, "Sample rejected, skipping");
                    self.advance(proxy, &mut next).await?;
                }
                CallbackEvent::Error(code) => {
                    self.tally.errors += 1;
                    warn!(%code, "Session error");
                }
            }
        }
        bail!("callback stream ended unexpectedly")
    }

    /// Closes the current sample's turn and sends the next one.
    async fn advance(&mut self, proxy: &SessionProxy, next: &mut u32) -> anyhow::Result<()> {
        self.checkpoint += 1;
        if self.should_kill() {
            self.killed = true;
            warn!(checkpoint = self.checkpoint, "Killing host connection");
            self.connector.kill_current();
            return Ok(());
        }
        if *next <= self.plan.samples {
            self.send(proxy, next).await?;
        }
        Ok(())
    }

    fn should_kill(&self) -> bool {
        !self.killed && self.plan.kill_after.is_some_and(|n| self.checkpoint >= n)
    }

    async fn send(&mut self, proxy: &SessionProxy, next: &mut u32) -> anyhow::Result<()> {
        let sample = self.plan.sample(*next);
        match proxy.input(sample).await {
            CallStatus::Ok => {
                self.tally.sent += 1;
                *next += 1;
                Ok(())
            }
            // The death callback follows and drives recovery.
            CallStatus::PeerDead => Ok(()),
            status => bail!("input {next} rejected: {status}"),
        }
    }
}
