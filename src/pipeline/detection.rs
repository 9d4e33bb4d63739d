//! Detection value types and the detector collaborator
//!
//! Boxes are normalized to the frame: `(0, 0)` is the top-left corner and
//! `(1, 1)` the bottom-right. On the side channel a result looks like:
//!
//! ```json
//! {"seq": 12, "detections": [{"box": [0.1, 0.2, 0.5, 0.9], "label": "person", "confidence": 0.87}]}
//! ```

use std::future::Future;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::frame::VideoFrame;

/// Axis-aligned box in normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create a box, clamping to [0, 1] and ordering corners
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (x1, x2) = (unit(x1), unit(x2));
        let (y1, y2) = (unit(y1), unit(y2));

        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Normalize a box given in pixel coordinates of a `width` x `height` frame
    pub fn from_pixels(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self::new(x1 / w, y1 / h, x2 / w, y2 / h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

fn unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x1, self.y1, self.x2, self.y2].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [x1, y1, x2, y2] = <[f32; 4]>::deserialize(deserializer)?;
        Ok(Self::new(x1, y1, x2, y2))
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    /// Create a detection, clamping confidence to [0, 1]
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: unit(confidence),
        }
    }
}

/// Detections for one frame, tagged with the frame's sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "seq")]
    pub sequence: u64,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(sequence: u64, detections: Vec<Detection>) -> Self {
        Self {
            sequence,
            detections,
        }
    }

    /// Encode as side-channel JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error reported by the detection model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The model failed on this frame
    Model(String),
    /// The frame could not be converted to model input
    InvalidFrame(String),
    /// The model panicked
    Panicked,
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::Model(msg) => write!(f, "Model error: {}", msg),
            InferenceError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            InferenceError::Panicked => write!(f, "Model panicked"),
        }
    }
}

impl std::error::Error for InferenceError {}

/// Object detection model
///
/// Calls may be slow and may fail; the pipeline never runs two calls for the
/// same connection at once.
pub trait Detector: Send + Sync + 'static {
    fn infer(
        &self,
        frame: &VideoFrame,
    ) -> impl Future<Output = Result<Vec<Detection>, InferenceError>> + Send;
}

/// Keep detections at or above `threshold`, at most `max` of them
///
/// Input order is preserved unless the cap applies, in which case the most
/// confident detections are kept, highest first.
pub fn filter_detections(
    mut detections: Vec<Detection>,
    threshold: f32,
    max: usize,
) -> Vec<Detection> {
    detections.retain(|d| d.confidence >= threshold);

    if detections.len() > max {
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(max);
    }

    detections
}
