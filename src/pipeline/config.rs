//! Pipeline configuration

/// Configuration for the frame pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Detections below this confidence are discarded
    pub confidence_threshold: f32,

    /// Maximum detections per result (highest confidence kept)
    pub max_detections: usize,

    /// Send results that contain no detections
    pub emit_empty_results: bool,

    /// Number of inference timings kept for statistics
    pub stats_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_detections: 100,
            emit_empty_results: false,
            stats_window: 100,
        }
    }
}

impl PipelineConfig {
    /// Set the confidence threshold, clamped to [0, 1]
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = if threshold.is_nan() {
            0.0
        } else {
            threshold.clamp(0.0, 1.0)
        };
        self
    }

    /// Set the per-result detection cap
    pub fn max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    /// Send results even when nothing was detected
    pub fn emit_empty_results(mut self, emit: bool) -> Self {
        self.emit_empty_results = emit;
        self
    }

    /// Set the statistics window size (at least 1)
    pub fn stats_window(mut self, size: usize) -> Self {
        self.stats_window = size.max(1);
        self
    }
}
