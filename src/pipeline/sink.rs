//! Result sinks
//!
//! Sinks are fire-and-forget: `try_push` must not wait. A result that cannot
//! be delivered right now is dropped by the caller.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::transport::{ChannelSendError, SideChannel};

use super::detection::DetectionResult;

/// Why a result was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// No open channel to deliver on
    Unavailable,
    /// Receiver is not keeping up
    Backpressure,
    /// Result could not be encoded
    Encode(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Unavailable => write!(f, "Sink unavailable"),
            SinkError::Backpressure => write!(f, "Sink backpressure"),
            SinkError::Encode(msg) => write!(f, "Encode error: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<ChannelSendError> for SinkError {
    fn from(e: ChannelSendError) -> Self {
        match e {
            ChannelSendError::Closed => SinkError::Unavailable,
            ChannelSendError::Full => SinkError::Backpressure,
        }
    }
}

/// Destination for detection results
pub trait ResultSink: Send + Sync + 'static {
    fn try_push(&self, result: &DetectionResult) -> Result<(), SinkError>;
}

/// In-process consumers can take results straight off a channel
impl ResultSink for mpsc::Sender<DetectionResult> {
    fn try_push(&self, result: &DetectionResult) -> Result<(), SinkError> {
        self.try_send(result.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SinkError::Unavailable,
        })
    }
}

/// Sink over a connection's side channel
///
/// The channel may open after the sink is created; until then every push
/// reports `Unavailable`.
pub struct ChannelSink<C: SideChannel> {
    channel: RwLock<Option<Arc<C>>>,
}

impl<C: SideChannel> ChannelSink<C> {
    /// Create a sink with no channel yet
    pub fn new() -> Self {
        Self {
            channel: RwLock::new(None),
        }
    }

    /// Create a sink bound to an existing channel
    pub fn with_channel(channel: Arc<C>) -> Self {
        Self {
            channel: RwLock::new(Some(channel)),
        }
    }

    /// Bind (or rebind) the channel
    pub fn set_channel(&self, channel: Arc<C>) {
        let mut slot = self.channel.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(channel);
    }

    /// The bound channel, if any
    pub fn channel(&self) -> Option<Arc<C>> {
        self.channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether a channel is bound and open
    pub fn is_open(&self) -> bool {
        self.channel().is_some_and(|c| c.is_open())
    }
}

impl<C: SideChannel> Default for ChannelSink<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SideChannel> ResultSink for ChannelSink<C> {
    fn try_push(&self, result: &DetectionResult) -> Result<(), SinkError> {
        let channel = self.channel().ok_or(SinkError::Unavailable)?;
        if !channel.is_open() {
            return Err(SinkError::Unavailable);
        }

        let text = result
            .to_json()
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        channel.try_send_text(&text)?;
        Ok(())
    }
}
