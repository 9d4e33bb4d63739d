//! Transport collaborator interface
//!
//! The WebRTC engine (ICE, DTLS/SRTP, codecs) lives outside this crate. These
//! traits describe the slice of it the orchestration core uses:
//!
//! - [`PeerTransport`]: session descriptions and connectivity candidates
//! - [`FrameSource`]: pull-style decoded video frames for one track
//! - [`SideChannel`]: a message-oriented channel for detection results
//!
//! The engine reports asynchronous happenings as [`TransportEvent`]s on the
//! channel returned by [`TransportFactory::create`].

use std::future::Future;

use tokio::sync::mpsc;

use crate::negotiation::{IceCandidate, SessionDescription};
use crate::pipeline::VideoFrame;
use crate::registry::ConnectionId;

/// Connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    /// Temporary loss of connectivity, may recover
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Error reported by the transport collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A description was rejected by the engine
    Description(String),
    /// A candidate was rejected by the engine
    Candidate(String),
    /// The video track ended
    TrackEnded,
    /// The engine has shut down
    Closed,
    /// Any other engine failure
    Other(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Description(msg) => write!(f, "Description rejected: {}", msg),
            TransportError::Candidate(msg) => write!(f, "Candidate rejected: {}", msg),
            TransportError::TrackEnded => write!(f, "Track ended"),
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Error from a non-blocking side channel send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSendError {
    /// Channel is not open
    Closed,
    /// Send buffer is full
    Full,
}

impl std::fmt::Display for ChannelSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSendError::Closed => write!(f, "Side channel closed"),
            ChannelSendError::Full => write!(f, "Side channel buffer full"),
        }
    }
}

impl std::error::Error for ChannelSendError {}

/// Decoded frame source for one video track
pub trait FrameSource: Send + 'static {
    /// Track identifier
    fn track_id(&self) -> &str;

    /// Suspend until the next decoded frame is available
    ///
    /// An error means the track ended or failed and no more frames will come.
    fn next_frame(&mut self) -> impl Future<Output = Result<VideoFrame, TransportError>> + Send;
}

/// Low-latency message channel carried alongside the media
pub trait SideChannel: Send + Sync + 'static {
    /// Channel label
    fn label(&self) -> &str;

    /// Whether the channel can currently carry messages
    fn is_open(&self) -> bool;

    /// Queue a text message without waiting
    fn try_send_text(&self, text: &str) -> Result<(), ChannelSendError>;
}

/// Negotiation surface of the engine for one peer connection
pub trait PeerTransport: Send + Sync + 'static {
    /// Inbound video track type
    type Track: FrameSource;
    /// Side channel type
    type Channel: SideChannel;

    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn create_answer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release engine resources; must be safe to call more than once
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Asynchronous notification from the engine
pub enum TransportEvent<T: PeerTransport> {
    /// Connection state changed
    StateChanged(TransportState),
    /// A local candidate was gathered and should be sent to the remote peer
    LocalCandidate(IceCandidate),
    /// Remote peer added a video track
    Track(T::Track),
    /// Side channel opened
    Channel(T::Channel),
}

impl<T: PeerTransport> std::fmt::Debug for TransportEvent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::StateChanged(state) => write!(f, "StateChanged({})", state),
            TransportEvent::LocalCandidate(c) => write!(f, "LocalCandidate({})", c.candidate),
            TransportEvent::Track(track) => write!(f, "Track({})", track.track_id()),
            TransportEvent::Channel(channel) => write!(f, "Channel({})", channel.label()),
        }
    }
}

/// Receiving end of a transport's event stream
pub type TransportEvents<T> = mpsc::Receiver<TransportEvent<T>>;

/// Creates one engine-side peer connection per negotiated link
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PeerTransport;

    fn create(
        &self,
        id: ConnectionId,
    ) -> impl Future<
        Output = Result<(Self::Transport, TransportEvents<Self::Transport>), TransportError>,
    > + Send;
}
