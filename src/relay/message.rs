//! Relay control messages
//!
//! These are the only messages the relay itself interprets. Everything sent
//! after a successful join is forwarded verbatim.

use serde::{Deserialize, Serialize};

/// Role a participant plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Publishes video (the phone)
    Sender,
    /// Consumes video and runs detection
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Control message sent by a client before it is a session member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientControl {
    /// `{"join": {"session": "s1", "role": "sender"}}`
    Join { session: String, role: Role },
}

/// Control message sent by the server in reply to a join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerControl {
    /// Join accepted
    Joined {
        session: String,
        participant: u64,
        role: Role,
    },
    /// Join rejected or malformed
    Error { message: String },
}

impl ServerControl {
    /// Encode as JSON text
    pub fn to_json(&self) -> String {
        // Only string and integer fields, encoding cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
