//! Session and participant identifiers
//!
//! A `ParticipantHandle` is the receiving end of one member's outbound queue.
//! The relay keeps the sending end; removing the member drops it, which wakes
//! any task parked in [`ParticipantHandle::recv`].

use bytes::Bytes;
use tokio::sync::mpsc;

use super::message::Role;

/// Identifier of a signaling session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new session id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Process-unique participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub u64);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live member of a session
#[derive(Debug)]
pub struct ParticipantHandle {
    id: ParticipantId,
    session_id: SessionId,
    role: Role,
    rx: mpsc::Receiver<Bytes>,
}

impl ParticipantHandle {
    pub(super) fn new(
        id: ParticipantId,
        session_id: SessionId,
        role: Role,
        rx: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            id,
            session_id,
            role,
            rx,
        }
    }

    /// Participant id
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Session this participant belongs to
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Role announced at join time
    pub fn role(&self) -> Role {
        self.role
    }

    /// Wait for the next relayed message
    ///
    /// Returns `None` once the participant has been removed from the relay.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a relayed message if one is already queued
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}
