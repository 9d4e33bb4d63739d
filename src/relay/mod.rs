//! Signaling relay for session-scoped message fan-out
//!
//! The relay forwards opaque signaling payloads (offers, answers, candidates)
//! between the participants of a session. It never inspects the payloads and
//! never carries media.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SignalingRelay>
//!                   ┌───────────────────────────┐
//!                   │ sessions: HashMap<Id,     │
//!                   │   Session {               │
//!                   │     members: [Member {    │
//!                   │       role, tx: mpsc::Tx  │
//!                   │     }]                    │
//!                   │   }                       │
//!                   │ >                         │
//!                   └─────────────┬─────────────┘
//!                                 │
//!              ┌──────────────────┴──────────────────┐
//!              ▼                                     ▼
//!     [ParticipantHandle]                   [ParticipantHandle]
//!     role = sender                         role = receiver
//!     relay.send() ──► try_send ──► rx.recv() ──► WebSocket / driver
//! ```
//!
//! # Delivery
//!
//! Each member owns a bounded queue. Fan-out uses `try_send` so a stuck
//! member can never stall the sender; a member whose queue is closed or full
//! is evicted from the session instead.

pub mod config;
pub mod error;
pub mod message;
pub mod participant;
pub mod store;

pub use config::RelayConfig;
pub use error::RelayError;
pub use message::{ClientControl, Role, ServerControl};
pub use participant::{ParticipantHandle, ParticipantId, SessionId};
pub use store::SignalingRelay;
