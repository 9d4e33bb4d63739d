//! Statistics for pipelines, detections, the relay and the signaling server

pub mod metrics;

pub use metrics::{DetectionStats, PipelineCounters, PipelineStats, RelayStats, ServerStats};
