//! Frame pipeline: decoded frames in, detection results out
//!
//! One attachment per connection. Each attachment runs two tasks:
//!
//! ```text
//!   FrameSource ──► ingest task ──┬── in_flight set ──► drop (trace)
//!                                 │
//!                                 └── slot (1 frame) ──► worker task
//!                                                          │ Detector::infer
//!                                                          │ threshold filter
//!                                                          ▼
//!                                                     ResultSink::try_push
//! ```
//!
//! # Backpressure
//!
//! The ingest task never waits on inference. A frame is handed to the worker
//! only if the atomic `in_flight` flag could be set; otherwise it is dropped.
//! The worker clears the flag once inference has finished (successfully or
//! not) and the result has been handed to the sink, so at most one inference
//! runs per connection and results stay close to live.

pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod runner;
pub mod sink;

pub use config::PipelineConfig;
pub use detection::{
    filter_detections, BoundingBox, Detection, DetectionResult, Detector, InferenceError,
};
pub use error::PipelineError;
pub use frame::{FrameJob, PixelFormat, VideoFrame};
pub use runner::{FramePipeline, PipelineEvent};
pub use sink::{ChannelSink, ResultSink, SinkError};
