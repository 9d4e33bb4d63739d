//! Offer/answer negotiation
//!
//! [`Negotiation`] is an explicit, transport-free state machine for one peer
//! connection. It decides whether an offer, answer or connectivity candidate
//! is acceptable in the current state and buffers candidates that arrive
//! before the remote description. The peer connection drives the transport
//! collaborator according to its verdicts.
//!
//! ```text
//!              createOffer                receiveAnswer
//!   Idle ───────────────────► HaveLocalOffer ─────────────┐
//!    │                                                    ▼
//!    │  receiveOffer                  answerCreated     Stable ──► Connected
//!    └──────────────────► HaveRemoteOffer ──────────────►  ▲    transportConnected
//!
//!   any non-terminal ──► Closed | Failed
//! ```

pub mod description;
pub mod error;
pub mod state;

pub use description::{IceCandidate, SdpType, SessionDescription, SignalPayload};
pub use error::NegotiationError;
pub use state::{CandidateAction, Negotiation, NegotiationEvent, NegotiationState};
