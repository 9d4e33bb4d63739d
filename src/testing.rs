//! In-process fakes for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::negotiation::{IceCandidate, SessionDescription};
use crate::pipeline::{BoundingBox, Detection, Detector, InferenceError, PixelFormat, VideoFrame};
use crate::transport::{ChannelSendError, FrameSource, PeerTransport, SideChannel, TransportError};

pub(crate) fn frame() -> VideoFrame {
    VideoFrame::new(4, 4, PixelFormat::Rgb24, Bytes::from(vec![0u8; 48]))
}

/// Detector returning one `person` per configured confidence
pub(crate) struct FakeDetector {
    confidences: Vec<f32>,
}

impl FakeDetector {
    pub(crate) fn new(confidences: Vec<f32>) -> Self {
        Self { confidences }
    }
}

impl Detector for FakeDetector {
    async fn infer(&self, _frame: &VideoFrame) -> Result<Vec<Detection>, InferenceError> {
        Ok(self
            .confidences
            .iter()
            .map(|c| Detection::new(BoundingBox::new(0.2, 0.2, 0.6, 0.8), "person", *c))
            .collect())
    }
}

/// Test-side end of a fake video track
pub(crate) struct FrameFeed {
    tx: mpsc::Sender<VideoFrame>,
}

impl FrameFeed {
    pub(crate) fn pair(track_id: &str) -> (Self, FakeTrack) {
        let (tx, rx) = mpsc::channel(16);
        let track = FakeTrack {
            id: track_id.to_string(),
            rx,
        };
        (Self { tx }, track)
    }

    pub(crate) async fn send(&self, frame: VideoFrame) {
        let _ = self.tx.send(frame).await;
    }
}

pub(crate) struct FakeTrack {
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

struct ChannelShared {
    open: AtomicBool,
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Side channel that records every message
#[derive(Clone)]
pub(crate) struct FakeChannel {
    shared: Arc<ChannelShared>,
}

impl FakeChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ChannelShared {
                open: AtomicBool::new(true),
                tx,
                rx: tokio::sync::Mutex::new(rx),
            }),
        }
    }

    pub(crate) async fn next_message(&self) -> String {
        self.shared
            .rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_default()
    }
}

impl SideChannel for FakeChannel {
    fn label(&self) -> &str {
        "detections"
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn try_send_text(&self, text: &str) -> Result<(), ChannelSendError> {
        self.shared
            .tx
            .send(text.to_string())
            .map_err(|_| ChannelSendError::Closed)
    }
}

#[derive(Default)]
struct Recorded {
    local: Vec<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<String>,
}

/// Transport that records calls and answers immediately
pub(crate) struct FakeTransport {
    recorded: Mutex<Recorded>,
    offers: AtomicUsize,
    fail_description: AtomicBool,
    closed: AtomicBool,
    channel: FakeChannel,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            offers: AtomicUsize::new(0),
            fail_description: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channel: FakeChannel::new(),
        }
    }

    /// Make the next remote description fail
    pub(crate) fn fail_next_description(&self) {
        self.fail_description.store(true, Ordering::SeqCst);
    }

    pub(crate) fn channel(&self) -> FakeChannel {
        self.channel.clone()
    }

    pub(crate) fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.recorded.lock().unwrap().local.clone()
    }

    pub(crate) fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.recorded.lock().unwrap().remote.clone()
    }

    pub(crate) fn candidates(&self) -> Vec<String> {
        self.recorded.lock().unwrap().candidates.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PeerTransport for FakeTransport {
    type Track = FakeTrack;
    type Channel = FakeChannel;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(SessionDescription::offer(format!("v=0 offer {}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.recorded.lock().unwrap().local.push(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        if self.fail_description.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Description("unsupported codec".into()));
        }
        self.recorded.lock().unwrap().remote.push(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.recorded
            .lock()
            .unwrap()
            .candidates
            .push(candidate.candidate.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channel.shared.open.store(false, Ordering::SeqCst);
    }
}
