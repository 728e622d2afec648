#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for remote sessions.
//!
//! Drives the full path: proxy → channel → host connection → session engine
//! → decoder, with a scripted decoder whose slot and output events are fired
//! by the test.

use std::sync::Arc;
use std::time::Duration;

use remotecodec_core::{
    ErrorCode, FormatDescriptor, HostConfig, LoopbackConfig, OutputTarget, Sample, SampleFlags,
    SampleInfo,
};
use remotecodec_host::capability::{
    CapabilityError, CapabilityEvent, CapabilityRegistry, ScriptProbe, Slot,
};
use remotecodec_host::{LocalConnector, MediaHost};
use remotecodec_proxy::{
    CallStatus, CallbackEvent, ChannelCallbacks, ConnectionSupervisor, ProxyError, RetryPolicy,
    SessionProxy,
};
use tokio::sync::mpsc::UnboundedReceiver;

struct Rig {
    probe: ScriptProbe,
    supervisor: Arc<ConnectionSupervisor>,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        poll_interval: Duration::from_millis(20),
        max_delay: Duration::from_millis(20),
        ..RetryPolicy::default()
    }
}

fn supervisor_for(registry: CapabilityRegistry) -> Arc<ConnectionSupervisor> {
    let host = Arc::new(MediaHost::new(registry, HostConfig::default(), 8));
    ConnectionSupervisor::new(Arc::new(LocalConnector::new(host)), fast_policy())
}

fn scripted(slot_capacity: usize) -> Rig {
    let probe = ScriptProbe::new(slot_capacity);
    let supervisor = supervisor_for(probe.registry());
    Rig { probe, supervisor }
}

fn avc() -> FormatDescriptor {
    FormatDescriptor::video("video/avc", 640, 360)
}

async fn open(
    supervisor: &Arc<ConnectionSupervisor>,
) -> (SessionProxy, UnboundedReceiver<CallbackEvent>) {
    let (callbacks, events) = ChannelCallbacks::channel();
    let proxy = SessionProxy::create(supervisor, avc(), OutputTarget::none(), Arc::new(callbacks))
        .await
        .unwrap();
    (proxy, events)
}

async fn next_event(events: &mut UnboundedReceiver<CallbackEvent>) -> CallbackEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn assert_quiet(events: &mut UnboundedReceiver<CallbackEvent>) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(events.try_recv().is_err());
}

fn frame(pts_us: i64) -> Sample {
    Sample::new(vec![0xAB; 32], pts_us, SampleFlags::NONE)
}

#[tokio::test]
async fn three_samples_then_eos() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;
    assert_eq!(rig.probe.calls(), vec!["configure", "start"]);

    let key = Sample::new(vec![1; 64], 0, SampleFlags::KEY_FRAME);
    assert_eq!(proxy.input(key).await, CallStatus::Ok);
    assert_eq!(proxy.input(frame(33_333)).await, CallStatus::Ok);
    assert_eq!(proxy.input(frame(66_666)).await, CallStatus::Ok);

    for slot in 0..3 {
        assert!(rig.probe.announce(slot));
        assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);
    }

    let eos = Sample::flags_only(100_000, SampleFlags::END_OF_STREAM);
    assert_eq!(proxy.input(eos).await, CallStatus::Ok);
    assert!(rig.probe.announce(3));
    assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);

    let queued = rig.probe.queued();
    let order: Vec<(Slot, i64)> = queued.iter().map(|(s, x)| (*s, x.pts_us())).collect();
    assert_eq!(
        order,
        vec![
            (Slot(0), 0),
            (Slot(1), 33_333),
            (Slot(2), 66_666),
            (Slot(3), 100_000)
        ]
    );
    assert!(queued[3].1.is_eos());
    assert_eq!(queued[3].1.size(), 0);

    // Input after end of stream is refused.
    assert_eq!(proxy.input(frame(133_333)).await, CallStatus::InputRejected);

    let format = FormatDescriptor::video("video/raw", 640, 360);
    assert!(rig.probe.fire(CapabilityEvent::FormatChanged(format.clone())));
    assert_eq!(
        next_event(&mut events).await,
        CallbackEvent::OutputFormatChanged(format)
    );

    for (index, pts) in [(0, 0), (1, 33_333), (2, 66_666)] {
        assert!(rig.probe.output(
            index,
            SampleInfo {
                pts_us: pts,
                size: 16,
                flags: SampleFlags::NONE
            }
        ));
        assert_eq!(
            next_event(&mut events).await,
            CallbackEvent::Output(Sample::flags_only(pts, SampleFlags::NONE))
        );
    }
    assert!(rig.probe.output(
        3,
        SampleInfo {
            pts_us: 100_000,
            size: 0,
            flags: SampleFlags::END_OF_STREAM
        }
    ));
    assert_eq!(
        next_event(&mut events).await,
        CallbackEvent::Output(Sample::flags_only(100_000, SampleFlags::END_OF_STREAM))
    );

    // Nothing is delivered after the end-of-stream output.
    assert!(rig.probe.output(
        4,
        SampleInfo {
            pts_us: 133_333,
            size: 16,
            flags: SampleFlags::NONE
        }
    ));
    assert_quiet(&mut events).await;

    assert_eq!(proxy.release().await, CallStatus::Ok);
}

#[tokio::test]
async fn sample_waits_for_slot() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;

    assert_eq!(proxy.input(frame(0)).await, CallStatus::Ok);
    assert_quiet(&mut events).await;
    assert!(rig.probe.queued().is_empty());

    assert!(rig.probe.announce(7));
    assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);
    assert_eq!(rig.probe.queued()[0].0, Slot(7));
}

#[tokio::test]
async fn slot_waits_for_sample() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;

    assert!(rig.probe.announce(2));
    assert_quiet(&mut events).await;

    assert_eq!(proxy.input(frame(0)).await, CallStatus::Ok);
    assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);
    assert_eq!(rig.probe.queued()[0].0, Slot(2));
}

#[tokio::test]
async fn oversize_sample_reports_input_error_and_keeps_session() {
    let rig = scripted(16);
    let (proxy, mut events) = open(&rig.supervisor).await;

    let big = Sample::new(vec![0; 64], 0, SampleFlags::KEY_FRAME);
    assert_eq!(proxy.input(big).await, CallStatus::Ok);
    assert!(rig.probe.announce(0));
    assert_eq!(
        next_event(&mut events).await,
        CallbackEvent::Error(ErrorCode::RemoteInput)
    );

    // The slot went back to the pool and takes the next sample.
    let small = Sample::new(vec![0; 8], 33_333, SampleFlags::NONE);
    assert_eq!(proxy.input(small).await, CallStatus::Ok);
    assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);
    assert_eq!(rig.probe.queued().len(), 1);
}

#[tokio::test]
async fn decoder_fault_is_translated_and_stops_input() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;

    assert!(rig.probe.fire(CapabilityEvent::Error(CapabilityError::Fault(
        "decoder crashed".into()
    ))));
    assert_eq!(
        next_event(&mut events).await,
        CallbackEvent::Error(ErrorCode::RemoteUnknown)
    );
    assert_eq!(proxy.input(frame(0)).await, CallStatus::Unknown);
}

#[tokio::test]
async fn flush_discards_queued_samples() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;

    assert_eq!(proxy.input(frame(0)).await, CallStatus::Ok);
    assert_eq!(proxy.input(frame(33_333)).await, CallStatus::Ok);
    assert_eq!(proxy.flush().await, CallStatus::Ok);

    assert!(rig.probe.announce(0));
    assert_quiet(&mut events).await;
    assert!(rig.probe.queued().is_empty());
    assert!(rig.probe.calls().contains(&"flush"));
}

#[tokio::test]
async fn stop_and_start_pass_through() {
    let rig = scripted(1024);
    let (proxy, mut events) = open(&rig.supervisor).await;

    assert_eq!(proxy.stop().await, CallStatus::Ok);
    assert_eq!(proxy.input(frame(0)).await, CallStatus::NotReady);
    assert_eq!(proxy.start().await, CallStatus::Ok);

    assert_eq!(proxy.input(frame(0)).await, CallStatus::Ok);
    assert!(rig.probe.announce(0));
    assert_eq!(next_event(&mut events).await, CallbackEvent::InputConsumed);
}

#[tokio::test]
async fn release_is_idempotent() {
    let rig = scripted(1024);
    let (proxy, _events) = open(&rig.supervisor).await;

    assert_eq!(proxy.release().await, CallStatus::Ok);
    assert_eq!(proxy.release().await, CallStatus::Ok);
    assert!(proxy.is_released());
    assert_eq!(proxy.input(frame(0)).await, CallStatus::NotReady);
    assert_eq!(proxy.flush().await, CallStatus::NotReady);
    assert!(!rig.probe.is_configured());
}

#[tokio::test]
async fn dropped_proxy_releases_remote_session() {
    let rig = scripted(1024);
    let (proxy, _events) = open(&rig.supervisor).await;
    drop(proxy);

    tokio::time::timeout(Duration::from_secs(1), async {
        while rig.probe.is_configured() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(rig.probe.calls().contains(&"release"));
}

#[tokio::test]
async fn unsupported_format_fails_creation() {
    let rig = scripted(1024);
    let (callbacks, _events) = ChannelCallbacks::channel();
    let err = SessionProxy::create(
        &rig.supervisor,
        FormatDescriptor::audio("video/opus", 48_000, 2),
        OutputTarget::none(),
        Arc::new(callbacks),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ProxyError::ConfigureFailed { .. }));
    assert_eq!(err.status(), CallStatus::SessionCreateFailed);
}

#[tokio::test]
async fn decoder_setup_failure_fails_creation() {
    let rig = scripted(1024);
    rig.probe.fail_configure(true);
    let (callbacks, _events) = ChannelCallbacks::channel();
    let err = SessionProxy::create(
        &rig.supervisor,
        avc(),
        OutputTarget::none(),
        Arc::new(callbacks),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status(), CallStatus::SessionCreateFailed);
    assert!(rig.probe.calls().contains(&"release"));
}

#[tokio::test]
async fn loopback_decodes_every_sample() {
    let supervisor = supervisor_for(CapabilityRegistry::with_loopback(&LoopbackConfig {
        slot_count: 2,
        slot_capacity: 256,
    }));
    let (callbacks, mut events) = ChannelCallbacks::channel();
    let proxy = SessionProxy::create(
        &supervisor,
        FormatDescriptor::audio("audio/opus", 48_000, 2),
        OutputTarget::named("speaker"),
        Arc::new(callbacks),
    )
    .await
    .unwrap();

    let mut outputs = Vec::new();
    let mut consumed = 0;
    for i in 0..4 {
        assert_eq!(proxy.input(frame(i * 20_000)).await, CallStatus::Ok);
    }
    assert_eq!(
        proxy
            .input(Sample::flags_only(80_000, SampleFlags::END_OF_STREAM))
            .await,
        CallStatus::Ok
    );

    loop {
        match next_event(&mut events).await {
            CallbackEvent::InputConsumed => consumed += 1,
            CallbackEvent::OutputFormatChanged(format) => assert_eq!(format.mime, "audio/opus"),
            CallbackEvent::Output(sample) => {
                let eos = sample.is_eos();
                outputs.push(sample.pts_us());
                if eos {
                    break;
                }
            }
            CallbackEvent::Error(code) => panic!("unexpected error {code}"),
        }
    }

    assert_eq!(consumed, 5);
    assert_eq!(outputs, vec![0, 20_000, 40_000, 60_000, 80_000]);
    assert_eq!(proxy.release().await, CallStatus::Ok);
}
