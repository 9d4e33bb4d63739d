//! Pipeline error types

use crate::registry::ConnectionId;

/// Error type for pipeline operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The connection already has a running attachment
    AlreadyAttached(ConnectionId),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::AlreadyAttached(id) => {
                write!(f, "Pipeline already attached to connection {}", id)
            }
        }
    }
}

impl std::error::Error for PipelineError {}
