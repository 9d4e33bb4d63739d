//! Orchestration core for live WebRTC object detection
//!
//! A phone streams video to a detecting peer, which runs an object detection
//! model on each decoded frame and returns results over a side channel in
//! near real time. The WebRTC engine and the model are external collaborators
//! described by the traits in [`transport`] and [`pipeline::Detector`]; this
//! crate provides everything in between:
//!
//! - [`relay`]: session-scoped signaling fan-out with explicit roles
//! - [`negotiation`]: the offer/answer state machine and wire payloads
//! - [`pipeline`]: frame ingest with single in-flight inference per connection
//! - [`peer`]: the per-connection lifecycle and its driver task
//! - [`registry`]: the table of live connections
//! - [`server`]: WebSocket signaling server and the detection service
//!
//! # Example
//!
//! ```no_run
//! use rtc_detect::{ServerConfig, SignalingServer};
//!
//! #[tokio::main]
//! async fn main() -> rtc_detect::Result<()> {
//!     let server = SignalingServer::new(ServerConfig::default());
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod error;
pub mod negotiation;
pub mod peer;
pub mod pipeline;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use negotiation::{IceCandidate, NegotiationState, SessionDescription, SignalPayload};
pub use peer::{PeerConnection, PeerSession};
pub use pipeline::{
    BoundingBox, Detection, DetectionResult, Detector, FramePipeline, PipelineConfig, VideoFrame,
};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use relay::{RelayConfig, Role, SessionId, SignalingRelay};
pub use server::{DetectionService, ServerConfig, SignalingServer};
pub use transport::{FrameSource, PeerTransport, SideChannel, TransportEvent, TransportFactory};
