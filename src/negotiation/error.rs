//! Negotiation error types

use super::description::SdpType;
use super::state::{NegotiationEvent, NegotiationState};

/// Error type for negotiation steps
///
/// None of these are reported to the remote peer; the driver logs and drops
/// the offending message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// An offer is already outstanding on this connection
    Glare,
    /// The event is not valid in the current state
    InvalidTransition {
        state: NegotiationState,
        event: NegotiationEvent,
    },
    /// A description carried the wrong `type`
    UnexpectedDescription { expected: SdpType, actual: SdpType },
    /// A signaling payload could not be decoded
    Malformed(String),
}

impl std::fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationError::Glare => write!(f, "Offer already outstanding"),
            NegotiationError::InvalidTransition { state, event } => {
                write!(f, "Cannot apply {} in state {}", event, state)
            }
            NegotiationError::UnexpectedDescription { expected, actual } => {
                write!(f, "Expected {:?} description, got {:?}", expected, actual)
            }
            NegotiationError::Malformed(msg) => write!(f, "Malformed signaling message: {}", msg),
        }
    }
}

impl std::error::Error for NegotiationError {}
