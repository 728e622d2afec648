//! The per-session matching actor.
//!
//! One task per session owns the capability, the slot pool and the sample
//! queue. Client commands and capability events share a single ordered inbox,
//! so the matching step never runs concurrently with itself or with a
//! lifecycle command.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use remotecodec_core::{
    CallbackSender, FormatDescriptor, HostErrorCode, OutputTarget, Sample, SampleInfo,
    SessionEvent, SessionRef,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::sample_queue::{QueueError, SampleQueue};
use super::slot_pool::SlotPool;
use super::types::{EngineCommand, EngineError, EngineSnapshot, EngineState, Inbox};
use crate::capability::{
    CapabilityError, CapabilityEvent, CapabilityRegistry, DecodingCapability, EventSink,
    RegistryError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub(crate) struct SessionEngine {
    session: SessionRef,
    registry: Arc<CapabilityRegistry>,
    inbox: mpsc::WeakUnboundedSender<Inbox>,
    callbacks: CallbackSender,
    /// Bumped on flush, stop and release so in-flight decoder events are dropped.
    epoch: Arc<AtomicU64>,
    state: EngineState,
    capability: Option<Box<dyn DecodingCapability>>,
    target: OutputTarget,
    slots: SlotPool,
    queue: SampleQueue,
    submitted: u64,
    eos_output: bool,
}

fn emit(callbacks: &CallbackSender, event: SessionEvent) {
    if callbacks.send(event).is_err() {
        debug!("Callback sink closed, dropping event");
    }
}

impl SessionEngine {
    pub(crate) fn new(
        session: SessionRef,
        registry: Arc<CapabilityRegistry>,
        inbox: mpsc::WeakUnboundedSender<Inbox>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            session,
            registry,
            inbox,
            callbacks,
            epoch: Arc::new(AtomicU64::new(0)),
            state: EngineState::Unconfigured,
            capability: None,
            target: OutputTarget::none(),
            slots: SlotPool::new(),
            queue: SampleQueue::new(),
            submitted: 0,
            eos_output: false,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbox>) {
        debug!(session = %self.session, "Session engine started");
        let callbacks = self.callbacks.clone();
        loop {
            tokio::select! {
                biased;
                message = inbox.recv() => {
                    let Some(message) = message else {
                        debug!("All engine handles dropped");
                        break;
                    };
                    match message {
                        Inbox::Command(command) => {
                            if self.handle_command(command) == Flow::Exit {
                                return;
                            }
                        }
                        Inbox::Capability { epoch, event } => self.handle_event(epoch, event),
                    }
                }
                () = callbacks.closed() => {
                    warn!("Client callback sink closed, releasing session");
                    break;
                }
            }
        }
        self.release();
    }

    fn handle_command(&mut self, command: EngineCommand) -> Flow {
        match command {
            EngineCommand::Configure {
                format,
                target,
                flags,
                reply,
            } => {
                let _ = reply.send(self.configure(format, target, flags));
            }
            EngineCommand::Input { sample, reply } => {
                let result = self.accept_input(sample);
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted {
                    self.run_matching();
                }
            }
            EngineCommand::Start { reply } => {
                let _ = reply.send(self.start());
            }
            EngineCommand::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            EngineCommand::Flush { reply } => {
                let _ = reply.send(self.flush());
            }
            EngineCommand::Release { reply } => {
                self.release();
                let _ = reply.send(());
                return Flow::Exit;
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
        Flow::Continue
    }

    fn configure(
        &mut self,
        format: FormatDescriptor,
        target: OutputTarget,
        flags: u32,
    ) -> Result<(), EngineError> {
        if self.state != EngineState::Unconfigured {
            return Err(EngineError::InvalidState {
                op: "configure",
                state: self.state,
            });
        }
        self.state = EngineState::Configuring;

        match self.setup(&format, &target, flags) {
            Ok(capability) => {
                info!(%format, decoder = capability.name(), "Session ready");
                self.capability = Some(capability);
                self.target = target;
                self.state = EngineState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(%format, error = %e, "Configure failed");
                self.state = EngineState::Faulted;
                Err(e)
            }
        }
    }

    fn setup(
        &self,
        format: &FormatDescriptor,
        target: &OutputTarget,
        flags: u32,
    ) -> Result<Box<dyn DecodingCapability>, EngineError> {
        format
            .validate()
            .map_err(|e| EngineError::BadFormat(e.to_string()))?;
        let mut capability = self.registry.select(format).map_err(|e| match e {
            RegistryError::NoDecoder { mime } => EngineError::NoDecoder { mime },
        })?;

        let events = EventSink::new(self.inbox.clone(), Arc::clone(&self.epoch));
        let started = capability
            .configure(format, target, flags, events)
            .and_then(|()| capability.start());
        if let Err(e) = started {
            capability.release();
            return Err(EngineError::Setup(e));
        }
        Ok(capability)
    }

    fn accept_input(&mut self, sample: Sample) -> Result<(), EngineError> {
        match self.state {
            EngineState::Ready => {}
            EngineState::Draining => return Err(EngineError::QueueClosed),
            EngineState::Released => return Err(EngineError::Released),
            EngineState::Faulted => return Err(EngineError::Faulted),
            state => return Err(EngineError::InvalidState { op: "input", state }),
        }
        debug!(%sample, queued = self.queue.len(), "Queued input");
        self.queue
            .push(sample)
            .map_err(|QueueError::Closed| EngineError::QueueClosed)
    }

    /// Pair queued samples with free slots until either runs out.
    fn run_matching(&mut self) {
        if self.state != EngineState::Ready {
            return;
        }
        let Some(capability) = self.capability.as_mut() else {
            return;
        };

        while !self.queue.is_empty() {
            let Some(slot) = self.slots.acquire() else {
                break;
            };
            let Some(sample) = self.queue.pop() else {
                let _ = self.slots.release(slot);
                break;
            };
            let sample = if sample.is_eos() {
                Sample::flags_only(sample.pts_us(), sample.flags())
            } else {
                sample
            };
            let pts = sample.pts_us();

            let capacity = capability.slot_capacity(slot);
            if sample.size() > capacity {
                warn!(%slot, pts, size = sample.size(), capacity, "Sample exceeds slot capacity");
                if let Err(e) = self.slots.release(slot) {
                    warn!(error = %e, "Slot bookkeeping mismatch");
                }
                emit(&self.callbacks, SessionEvent::Error(HostErrorCode::Input));
                continue;
            }

            let eos = sample.is_eos();
            match capability.queue_input(slot, sample) {
                Ok(()) => {
                    if let Err(e) = self.slots.submit(slot) {
                        warn!(error = %e, "Slot bookkeeping mismatch");
                    }
                    self.submitted += 1;
                    debug!(%slot, pts, "Submitted input");
                    emit(&self.callbacks, SessionEvent::InputConsumed);
                    if eos {
                        info!(submitted = self.submitted, "End of stream submitted, draining");
                        self.state = EngineState::Draining;
                        break;
                    }
                }
                Err(e) => {
                    warn!(%slot, pts, error = %e, "Decoder rejected input");
                    if let Err(e) = self.slots.release(slot) {
                        warn!(error = %e, "Slot bookkeeping mismatch");
                    }
                    emit(&self.callbacks, SessionEvent::Error(e.host_code()));
                }
            }
        }
    }

    fn handle_event(&mut self, epoch: u64, event: CapabilityEvent) {
        if epoch != self.epoch.load(Ordering::Acquire) {
            debug!(epoch, ?event, "Dropping stale decoder event");
            return;
        }
        if !self.state.is_running() {
            debug!(state = %self.state, ?event, "Ignoring decoder event");
            return;
        }

        match event {
            CapabilityEvent::InputSlotAvailable(slot) => {
                if let Err(e) = self.slots.mark_available(slot) {
                    warn!(error = %e, "Ignoring slot announcement");
                    return;
                }
                self.run_matching();
            }
            CapabilityEvent::OutputReady { index, info } => self.on_output_ready(index, info),
            CapabilityEvent::FormatChanged(format) => {
                info!(%format, "Output format changed");
                emit(&self.callbacks, SessionEvent::OutputFormatChanged(format));
            }
            CapabilityEvent::Error(e) => self.fault(&e),
        }
    }

    fn on_output_ready(&mut self, index: u32, info: SampleInfo) {
        let Some(capability) = self.capability.as_mut() else {
            return;
        };
        if self.eos_output {
            debug!(index, "Discarding output after end of stream");
            let _ = capability.release_output(index, false);
            return;
        }

        if let Err(e) = capability.release_output(index, self.target.renders()) {
            warn!(index, error = %e, "Failed to release output buffer");
            emit(&self.callbacks, SessionEvent::Error(e.host_code()));
            return;
        }
        debug!(index, pts = info.pts_us, size = info.size, "Output released");
        emit(
            &self.callbacks,
            SessionEvent::Output(Sample::flags_only(info.pts_us, info.flags)),
        );

        if info.is_eos() {
            info!("Output reached end of stream");
            self.eos_output = true;
        }
    }

    fn fault(&mut self, e: &CapabilityError) {
        let dropped = self.queue.clear();
        self.slots.clear();
        error!(error = %e, dropped, "Decoder fault");
        self.state = EngineState::Faulted;
        emit(&self.callbacks, SessionEvent::Error(e.host_code()));
    }

    fn require_running(&self, op: &'static str) -> Result<(), EngineError> {
        match self.state {
            EngineState::Ready | EngineState::Draining => Ok(()),
            EngineState::Released => Err(EngineError::Released),
            EngineState::Faulted => Err(EngineError::Faulted),
            state => Err(EngineError::InvalidState { op, state }),
        }
    }

    /// Forget queued samples and slots, and invalidate in-flight decoder events.
    fn reset_pipeline(&mut self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.slots.clear();
        self.submitted = 0;
        self.eos_output = false;
        self.queue.clear()
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.require_running("flush")?;
        let dropped = self.reset_pipeline();
        if let Some(capability) = self.capability.as_mut()
            && let Err(e) = capability.flush()
        {
            self.fault(&e);
            return Err(EngineError::Capability(e));
        }
        self.state = EngineState::Ready;
        info!(dropped, "Session flushed");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        self.require_running("stop")?;
        let dropped = self.reset_pipeline();
        if let Some(capability) = self.capability.as_mut()
            && let Err(e) = capability.stop()
        {
            self.fault(&e);
            return Err(EngineError::Capability(e));
        }
        self.state = EngineState::Stopped;
        info!(dropped, "Session stopped");
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Ready | EngineState::Draining => return Ok(()),
            EngineState::Stopped => {}
            EngineState::Released => return Err(EngineError::Released),
            EngineState::Faulted => return Err(EngineError::Faulted),
            state => return Err(EngineError::InvalidState { op: "start", state }),
        }
        if let Some(capability) = self.capability.as_mut()
            && let Err(e) = capability.start()
        {
            self.fault(&e);
            return Err(EngineError::Capability(e));
        }
        self.state = EngineState::Ready;
        info!("Session restarted");
        Ok(())
    }

    fn release(&mut self) {
        if self.state == EngineState::Released {
            return;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(mut capability) = self.capability.take() {
            if self.state.is_running()
                && let Err(e) = capability.stop()
            {
                warn!(error = %e, "Decoder stop failed during release");
            }
            capability.release();
        }
        let dropped = self.queue.clear();
        self.slots.clear();
        info!(from = %self.state, dropped, "Session released");
        self.state = EngineState::Released;
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            queued: self.queue.len(),
            free_slots: self.slots.free_count(),
            claimed_slots: self.slots.claimed_count(),
            submitted: self.submitted,
            eos_output: self.eos_output,
        }
    }
}
