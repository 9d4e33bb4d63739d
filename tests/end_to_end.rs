//! Signaling through the relay, negotiation and detection, with fake engines

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use rtc_detect::negotiation::{IceCandidate, NegotiationState, SignalPayload};
use rtc_detect::pipeline::{DetectionResult, FramePipeline, PipelineConfig, PipelineEvent};
use rtc_detect::relay::{ParticipantHandle, RelayConfig, Role, SignalingRelay};
use rtc_detect::registry::ConnectionId;
use rtc_detect::transport::{TransportEvent, TransportFactory, TransportState};
use rtc_detect::{DetectionService, PeerConnection};

use common::{
    eventually, frame, init_tracing, Controller, FakeFactory, FakeTransport, ScriptedDetector,
};

type Service = DetectionService<FakeFactory, ScriptedDetector>;

struct Harness {
    relay: Arc<SignalingRelay>,
    service: Service,
    controllers: mpsc::UnboundedReceiver<Controller>,
}

impl Harness {
    fn new(detector: ScriptedDetector) -> Self {
        Self::with_relay(detector, RelayConfig::default())
    }

    fn with_relay(detector: ScriptedDetector, config: RelayConfig) -> Self {
        init_tracing();
        let relay = Arc::new(SignalingRelay::with_config(config));
        let (factory, controllers) = FakeFactory::with_controllers();
        let service = DetectionService::new(
            Arc::clone(&relay),
            factory,
            detector,
            PipelineConfig::default().confidence_threshold(0.5),
        );

        Self {
            relay,
            service,
            controllers,
        }
    }

    async fn next_controller(&mut self) -> Controller {
        tokio::time::timeout(Duration::from_secs(2), self.controllers.recv())
            .await
            .expect("no transport created")
            .expect("factory dropped")
    }
}

/// The phone side: an offering connection plus its relay membership
struct Phone {
    handle: ParticipantHandle,
    conn: PeerConnection<FakeTransport, ScriptedDetector>,
}

impl Phone {
    async fn join(relay: &SignalingRelay, session: &str) -> Self {
        let handle = relay.join(session, Role::Sender).await.unwrap();
        Self {
            handle,
            conn: offerer().await,
        }
    }

    async fn send(&self, relay: &SignalingRelay, payload: &SignalPayload) {
        relay.send(&self.handle, payload.to_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> SignalPayload {
        let data = tokio::time::timeout(Duration::from_secs(2), self.handle.recv())
            .await
            .expect("no signaling message")
            .expect("removed from relay");
        SignalPayload::from_slice(&data).unwrap()
    }
}

/// A fresh offering connection, as the phone's browser would create
async fn offerer() -> PeerConnection<FakeTransport, ScriptedDetector> {
    let (factory, _controllers) = FakeFactory::with_controllers();
    let id = ConnectionId(1000);
    let (transport, _events) = factory.create(id).await.unwrap();

    let pipeline = Arc::new(FramePipeline::new(ScriptedDetector::new(vec![])));
    let (events_tx, _) = mpsc::unbounded_channel();
    PeerConnection::new(id, transport, pipeline, events_tx)
}

/// Run offer/answer for `phone` against the service
async fn negotiate(harness: &mut Harness, phone: &mut Phone) -> Controller {
    let offer = phone.conn.create_offer().await.unwrap();
    phone.send(&harness.relay, &offer).await;

    let controller = harness.next_controller().await;

    let answer = phone.recv().await;
    assert!(matches!(answer, SignalPayload::Answer(_)));
    phone.conn.handle_signal(answer).await.unwrap();
    assert_eq!(phone.conn.state(), NegotiationState::Stable);

    controller
}

#[tokio::test]
async fn test_offer_answer_connect_and_detect() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.3, 0.6, 0.9]));

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();

    let controller = negotiate(&mut harness, &mut phone).await;

    let registry = Arc::clone(harness.service.registry());
    let conn = registry.get(controller.id).await.unwrap();
    assert_eq!(conn.state(), NegotiationState::Stable);

    let (feed, mut results) = controller.connect().await;
    eventually(|| {
        let conn = Arc::clone(&conn);
        async move { conn.video_track().await.is_some() }
    })
    .await;
    assert_eq!(conn.state(), NegotiationState::Connected);

    feed.send(frame()).await;
    let text = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .unwrap()
        .unwrap();
    let result: DetectionResult = serde_json::from_str(&text).unwrap();

    assert_eq!(result.sequence, 0);
    assert_eq!(result.detections.len(), 2);
    assert!(result.detections.iter().all(|d| d.confidence >= 0.5));

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_candidates_flow_both_ways() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.9]));

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();

    // Candidate before the offer reaches the service
    phone
        .send(
            &harness.relay,
            &SignalPayload::Candidate(IceCandidate::new("candidate:early")),
        )
        .await;
    let controller = negotiate(&mut harness, &mut phone).await;
    phone
        .send(
            &harness.relay,
            &SignalPayload::Candidate(IceCandidate::new("candidate:late")),
        )
        .await;

    let recorded = &controller;
    eventually(|| async move { recorded.candidates().len() == 2 }).await;
    assert_eq!(
        controller.candidates(),
        ["candidate:early", "candidate:late"]
    );

    // Gathered locally, forwarded to the phone
    controller
        .emit(TransportEvent::LocalCandidate(IceCandidate::new(
            "candidate:local",
        )))
        .await;
    assert_eq!(
        phone.recv().await,
        SignalPayload::Candidate(IceCandidate::new("candidate:local"))
    );

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_early_candidates_bounded() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.9]));

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();

    for n in 0..40 {
        phone
            .send(
                &harness.relay,
                &SignalPayload::Candidate(IceCandidate::new(format!("candidate:{}", n))),
            )
            .await;
    }
    let controller = negotiate(&mut harness, &mut phone).await;

    // Replayed while the offer is applied, before the answer goes out
    let candidates = controller.candidates();
    assert_eq!(candidates.len(), 32);
    assert_eq!(candidates[0], "candidate:0");
    assert_eq!(candidates[31], "candidate:31");

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_track_end_closes_only_that_connection() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.9]));

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();
    let controller = negotiate(&mut harness, &mut phone).await;
    let (feed, _results) = controller.connect().await;

    let registry = Arc::clone(harness.service.registry());
    let conn = registry.get(controller.id).await.unwrap();

    drop(feed);

    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.is_empty().await }
    })
    .await;
    assert_eq!(conn.state(), NegotiationState::Closed);
    assert!(controller.is_closed());

    // Already terminal
    assert!(!conn.close().await);

    // Trailing candidate for the closed connection
    phone
        .send(
            &harness.relay,
            &SignalPayload::Candidate(IceCandidate::new("candidate:stale")),
        )
        .await;

    // Session driver keeps running; a fresh offer gets a fresh connection
    assert!(harness.service.is_serving(&"s1".into()));
    phone.conn = offerer().await;
    let second = negotiate(&mut harness, &mut phone).await;
    assert_ne!(second.id, controller.id);
    assert!(second.candidates().is_empty());

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_quiet_signaling_keeps_connection_streaming() {
    let config = RelayConfig::default().idle_timeout(Duration::from_millis(50));
    let mut harness = Harness::with_relay(ScriptedDetector::new(vec![0.9]), config);

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();
    let controller = negotiate(&mut harness, &mut phone).await;
    let (feed, mut results) = controller.connect().await;

    let registry = Arc::clone(harness.service.registry());
    let conn = registry.get(controller.id).await.unwrap();
    eventually(|| {
        let conn = Arc::clone(&conn);
        async move { conn.video_track().await.is_some() }
    })
    .await;

    feed.send(frame()).await;
    let first: DetectionResult = serde_json::from_str(&results.recv().await.unwrap()).unwrap();
    assert_eq!(first.sequence, 0);

    // No signaling since the answer, well past the idle timeout
    tokio::time::sleep(Duration::from_millis(150)).await;
    harness.relay.cleanup().await;

    assert_eq!(harness.relay.member_count(&"s1".into()).await, 2);
    assert!(harness.service.is_serving(&"s1".into()));
    assert_eq!(conn.state(), NegotiationState::Connected);
    assert!(!controller.is_closed());

    feed.send(frame()).await;
    let next = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .unwrap()
        .unwrap();
    let next: DetectionResult = serde_json::from_str(&next).unwrap();
    assert_eq!(next.sequence, 1);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_failure_is_isolated_per_session() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.9]));

    let mut phone_a = Phone::join(&harness.relay, "a").await;
    let mut phone_b = Phone::join(&harness.relay, "b").await;
    harness.service.serve_session("a").await.unwrap();
    harness.service.serve_session("b").await.unwrap();

    let controller_a = negotiate(&mut harness, &mut phone_a).await;
    let controller_b = negotiate(&mut harness, &mut phone_b).await;
    let (_feed_a, _results_a) = controller_a.connect().await;
    let (feed_b, mut results_b) = controller_b.connect().await;

    controller_a
        .emit(TransportEvent::StateChanged(TransportState::Failed))
        .await;

    let registry = Arc::clone(harness.service.registry());
    let id_a = controller_a.id;
    eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.get(id_a).await.is_none() }
    })
    .await;
    assert!(controller_a.is_closed());

    let conn_b = registry.get(controller_b.id).await.unwrap();
    assert_eq!(conn_b.state(), NegotiationState::Connected);

    eventually(|| {
        let conn_b = Arc::clone(&conn_b);
        async move { conn_b.video_track().await.is_some() }
    })
    .await;
    feed_b.send(frame()).await;
    let text = tokio::time::timeout(Duration::from_secs(2), results_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(text.starts_with(r#"{"seq":0,"#));

    harness.service.shutdown().await;
}

#[tokio::test]
async fn test_backpressure_drops_frames_during_inference() {
    init_tracing();
    let (detector, gate) = ScriptedDetector::gated(vec![0.8]);
    let relay = Arc::new(SignalingRelay::new());
    let (factory, mut controllers) = FakeFactory::with_controllers();
    let (metrics_tx, mut metrics) = mpsc::unbounded_channel();
    let service = DetectionService::new(
        Arc::clone(&relay),
        factory,
        detector,
        PipelineConfig::default(),
    )
    .with_metrics(metrics_tx);

    let mut phone = Phone::join(&relay, "s1").await;
    service.serve_session("s1").await.unwrap();

    let offer = phone.conn.create_offer().await.unwrap();
    phone.send(&relay, &offer).await;
    let controller = controllers.recv().await.unwrap();
    phone.recv().await;

    let (feed, mut results) = controller.connect().await;
    let conn = service.registry().get(controller.id).await.unwrap();
    eventually(|| {
        let conn = Arc::clone(&conn);
        async move { conn.video_track().await.is_some() }
    })
    .await;

    // Frame 0 blocks in inference; 1..=3 arrive meanwhile
    for _ in 0..4 {
        feed.send(frame()).await;
    }
    eventually(|| {
        let conn = Arc::clone(&conn);
        async move { conn.pipeline_stats().is_some_and(|s| s.frames_dropped == 3) }
    })
    .await;

    gate.add_permits(1);
    let first: DetectionResult =
        serde_json::from_str(&results.recv().await.unwrap()).unwrap();
    assert_eq!(first.sequence, 0);

    loop {
        if let Some(PipelineEvent::FrameProcessed { sequence, .. }) = metrics.recv().await {
            assert_eq!(sequence, 0);
            break;
        }
    }

    feed.send(frame()).await;
    gate.add_permits(1);
    let second: DetectionResult =
        serde_json::from_str(&results.recv().await.unwrap()).unwrap();
    assert_eq!(second.sequence, 4);

    service.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let mut harness = Harness::new(ScriptedDetector::new(vec![0.9]));

    let mut phone = Phone::join(&harness.relay, "s1").await;
    harness.service.serve_session("s1").await.unwrap();
    let controller = negotiate(&mut harness, &mut phone).await;
    let (_feed, _results) = controller.connect().await;

    harness.service.shutdown().await;

    assert!(harness.service.registry().is_empty().await);
    assert_eq!(harness.service.pipeline().attached_count(), 0);
    assert!(controller.is_closed());
    assert!(!harness.service.is_serving(&"s1".into()));
    assert_eq!(harness.relay.member_count(&"s1".into()).await, 1);
}

#[tokio::test]
async fn test_second_receiver_rejected() {
    let harness = Harness::new(ScriptedDetector::new(vec![]));

    harness.service.serve_session("s1").await.unwrap();
    let result = harness.service.serve_session("s1").await;

    assert!(matches!(result, Err(rtc_detect::Error::Relay(_))));
    harness.service.shutdown().await;
}
