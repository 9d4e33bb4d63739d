//! Crate-wide error type
//!
//! Each component has its own error enum; this module aggregates them so
//! that server and driver code can use `?` across component boundaries.

use crate::negotiation::NegotiationError;
use crate::pipeline::PipelineError;
use crate::registry::RegistryError;
use crate::relay::RelayError;
use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug)]
pub enum Error {
    /// Socket level I/O failure
    Io(std::io::Error),
    /// WebSocket protocol failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// JSON encoding or decoding failure
    Json(serde_json::Error),
    /// Signaling relay rejected an operation
    Relay(RelayError),
    /// Negotiation step was not valid in the current state
    Negotiation(NegotiationError),
    /// Transport collaborator failed
    Transport(TransportError),
    /// Frame pipeline rejected an operation
    Pipeline(PipelineError),
    /// Connection registry rejected an operation
    Registry(RegistryError),
    /// Peer did not complete the join handshake in time
    JoinTimeout,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Relay(e) => write!(f, "Relay error: {}", e),
            Error::Negotiation(e) => write!(f, "Negotiation error: {}", e),
            Error::Transport(e) => write!(f, "Transport error: {}", e),
            Error::Pipeline(e) => write!(f, "Pipeline error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::JoinTimeout => write!(f, "Timed out waiting for join message"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Relay(e) => Some(e),
            Error::Negotiation(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Pipeline(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::JoinTimeout => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Error::Relay(e)
    }
}

impl From<NegotiationError> for Error {
    fn from(e: NegotiationError) -> Self {
        Error::Negotiation(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<PipelineError> for Error {
    fn from(e: PipelineError) -> Self {
        Error::Pipeline(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}
