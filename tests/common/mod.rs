//! Shared fakes for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};

use rtc_detect::negotiation::{IceCandidate, SessionDescription};
use rtc_detect::pipeline::{BoundingBox, Detection, Detector, InferenceError, PixelFormat, VideoFrame};
use rtc_detect::registry::ConnectionId;
use rtc_detect::transport::{
    ChannelSendError, FrameSource, PeerTransport, SideChannel, TransportError, TransportEvent,
    TransportEvents, TransportFactory, TransportState,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn frame() -> VideoFrame {
    VideoFrame::new(8, 8, PixelFormat::Bgr24, Bytes::from(vec![0u8; 192]))
}

/// Poll `check` until it holds, panicking after two seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

/// Detector that reports one `person` per configured confidence
///
/// With a gate, each call waits for one permit.
pub struct ScriptedDetector {
    confidences: Vec<f32>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedDetector {
    pub fn new(confidences: Vec<f32>) -> Self {
        Self {
            confidences,
            gate: None,
        }
    }

    pub fn gated(confidences: Vec<f32>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let detector = Self {
            confidences,
            gate: Some(Arc::clone(&gate)),
        };
        (detector, gate)
    }
}

impl Detector for ScriptedDetector {
    async fn infer(&self, _frame: &VideoFrame) -> Result<Vec<Detection>, InferenceError> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| InferenceError::Model("gate closed".into()))?;
            permit.forget();
        }

        Ok(self
            .confidences
            .iter()
            .map(|c| Detection::new(BoundingBox::new(0.25, 0.25, 0.75, 0.75), "person", *c))
            .collect())
    }
}

/// Test-side end of a fake video track
#[derive(Clone)]
pub struct FrameFeed {
    tx: mpsc::Sender<VideoFrame>,
}

impl FrameFeed {
    pub fn pair(track_id: &str) -> (Self, FakeTrack) {
        let (tx, rx) = mpsc::channel(16);
        (
            Self { tx },
            FakeTrack {
                id: track_id.to_string(),
                rx,
            },
        )
    }

    pub async fn send(&self, frame: VideoFrame) {
        let _ = self.tx.send(frame).await;
    }
}

pub struct FakeTrack {
    id: String,
    rx: mpsc::Receiver<VideoFrame>,
}

impl FrameSource for FakeTrack {
    fn track_id(&self) -> &str {
        &self.id
    }

    async fn next_frame(&mut self) -> Result<VideoFrame, TransportError> {
        self.rx.recv().await.ok_or(TransportError::TrackEnded)
    }
}

/// Side channel that records what it was asked to send
#[derive(Clone)]
pub struct RecordingChannel {
    open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<String>,
}

impl RecordingChannel {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                open: Arc::new(AtomicBool::new(true)),
                tx,
            },
            rx,
        )
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl SideChannel for RecordingChannel {
    fn label(&self) -> &str {
        "detections"
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn try_send_text(&self, text: &str) -> Result<(), ChannelSendError> {
        if !self.is_open() {
            return Err(ChannelSendError::Closed);
        }
        self.tx
            .send(text.to_string())
            .map_err(|_| ChannelSendError::Closed)
    }
}

#[derive(Default)]
pub struct TransportLog {
    pub local: Vec<SessionDescription>,
    pub remote: Vec<SessionDescription>,
    pub candidates: Vec<String>,
    pub closed: bool,
}

/// Transport that answers immediately and records every call
pub struct FakeTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl PeerTransport for FakeTransport {
    type Track = FakeTrack;
    type Channel = RecordingChannel;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0\r\ns=fake offer\r\n"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("v=0\r\ns=fake answer\r\n"))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.log.lock().unwrap().local.push(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.log.lock().unwrap().remote.push(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.log
            .lock()
            .unwrap()
            .candidates
            .push(candidate.candidate.clone());
        Ok(())
    }

    async fn close(&self) {
        self.log.lock().unwrap().closed = true;
    }
}

/// Test handle on a transport created by [`FakeFactory`]
pub struct Controller {
    pub id: ConnectionId,
    pub log: Arc<Mutex<TransportLog>>,
    events: mpsc::Sender<TransportEvent<FakeTransport>>,
}

impl Controller {
    pub async fn emit(&self, event: TransportEvent<FakeTransport>) {
        let _ = self.events.send(event).await;
    }

    /// Open a side channel, report connectivity and add a video track
    pub async fn connect(&self) -> (FrameFeed, mpsc::UnboundedReceiver<String>) {
        let (channel, results) = RecordingChannel::open();
        let (feed, track) = FrameFeed::pair("video0");

        self.emit(TransportEvent::Channel(channel)).await;
        self.emit(TransportEvent::StateChanged(TransportState::Connected))
            .await;
        self.emit(TransportEvent::Track(track)).await;

        (feed, results)
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }

    pub fn candidates(&self) -> Vec<String> {
        self.log.lock().unwrap().candidates.clone()
    }
}

/// Factory handing every created transport's controller to the test
pub struct FakeFactory {
    created: mpsc::UnboundedSender<Controller>,
}

impl FakeFactory {
    pub fn with_controllers() -> (Self, mpsc::UnboundedReceiver<Controller>) {
        let (created, rx) = mpsc::unbounded_channel();
        (Self { created }, rx)
    }
}

impl TransportFactory for FakeFactory {
    type Transport = FakeTransport;

    async fn create(
        &self,
        id: ConnectionId,
    ) -> Result<(FakeTransport, TransportEvents<FakeTransport>), TransportError> {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        let (events, rx) = mpsc::channel(32);

        let _ = self.created.send(Controller {
            id,
            log: Arc::clone(&log),
            events,
        });

        Ok((FakeTransport { log }, rx))
    }
}
