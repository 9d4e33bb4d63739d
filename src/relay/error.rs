//! Relay error types

use super::message::Role;
use super::participant::SessionId;

/// Error type for relay operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Session already holds the maximum number of participants
    SessionFull(SessionId),
    /// Another participant already joined the session with this role
    RoleTaken(SessionId, Role),
    /// The handle is no longer a member of its session
    NotJoined(SessionId),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::SessionFull(id) => write!(f, "Session is full: {}", id),
            RelayError::RoleTaken(id, role) => {
                write!(f, "Role {} already taken in session {}", role, id)
            }
            RelayError::NotJoined(id) => write!(f, "Not a member of session {}", id),
        }
    }
}

impl std::error::Error for RelayError {}
