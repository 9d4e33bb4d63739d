//! Peer connections and their driver
//!
//! # Lifecycle
//!
//! ```text
//!   relay msg ──► PeerSession ──► PeerConnection ──► PeerTransport
//!                    ▲   │            │  Mutex<Inner>
//!                    │   │            │   negotiation
//!   TransportEvent ──┘   │            │   pending track/channel
//!   PipelineEvent ───────┘            ▼
//!                                FramePipeline (on Connected)
//! ```
//!
//! The connection is created on the first offer. Once its negotiation state
//! is terminal, the session driver unregisters it and waits for a new offer.

pub mod connection;
pub mod session;

pub use connection::PeerConnection;
pub use session::PeerSession;
