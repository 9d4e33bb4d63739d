//! Signaling wire types
//!
//! The relay treats these as opaque bytes; only the negotiating peer decodes
//! them. Field names follow the browser `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` dictionaries so payloads can be passed straight
//! through from JavaScript.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::NegotiationError;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    pub(crate) fn expect(&self, expected: SdpType) -> Result<(), NegotiationError> {
        if self.sdp_type == expected {
            Ok(())
        } else {
            Err(NegotiationError::UnexpectedDescription {
                expected,
                actual: self.sdp_type,
            })
        }
    }
}

/// A connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// One signaling message: `{offer: {...}}`, `{answer: {...}}` or `{candidate: {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalPayload {
    /// Decode from relayed bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, NegotiationError> {
        serde_json::from_slice(data).map_err(|e| NegotiationError::Malformed(e.to_string()))
    }

    /// Encode for the relay
    pub fn to_bytes(&self) -> Bytes {
        // Plain string fields, encoding cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::Candidate(_) => "candidate",
        }
    }
}
