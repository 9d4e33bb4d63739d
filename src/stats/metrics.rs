//! Statistics and metrics for pipelines and the relay

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::pipeline::Detection;

/// Live counters for one pipeline attachment
///
/// Updated from the ingest and worker tasks without locking.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames_pulled: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    inference_errors: AtomicU64,
    results_sent: AtomicU64,
    results_dropped: AtomicU64,
    /// Last processed sequence plus one, 0 if none yet
    next_sequence: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pulled(&self) {
        self.frames_pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, sequence: u64) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.next_sequence.fetch_max(sequence + 1, Ordering::Relaxed);
    }

    pub(crate) fn record_inference_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.results_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_result_dropped(&self) {
        self.results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PipelineStats {
        let next = self.next_sequence.load(Ordering::Relaxed);

        PipelineStats {
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            results_sent: self.results_sent.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
            last_sequence: next.checked_sub(1),
        }
    }
}

/// Pipeline statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames read from the track
    pub frames_pulled: u64,
    /// Frames dropped because inference was in flight
    pub frames_dropped: u64,
    /// Frames that went through inference
    pub frames_processed: u64,
    /// Inference calls that failed
    pub inference_errors: u64,
    /// Results accepted by the sink
    pub results_sent: u64,
    /// Results the sink could not take
    pub results_dropped: u64,
    /// Sequence number of the last processed frame
    pub last_sequence: Option<u64>,
}

impl PipelineStats {
    /// Fraction of pulled frames that were processed
    pub fn processed_ratio(&self) -> f64 {
        if self.frames_pulled > 0 {
            self.frames_processed as f64 / self.frames_pulled as f64
        } else {
            0.0
        }
    }
}

/// Detection quality and inference timing over a rolling window
#[derive(Debug, Clone)]
pub struct DetectionStats {
    window: usize,
    inference_times: VecDeque<Duration>,
    /// Frames recorded
    pub frames: u64,
    /// Frames with at least one detection
    pub frames_with_detections: u64,
    /// Detections across all frames
    pub total_detections: u64,
    confidence_sum: f64,
    label_counts: HashMap<String, u64>,
}

impl DetectionStats {
    /// Create with a timing window of `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inference_times: VecDeque::with_capacity(window.max(1)),
            frames: 0,
            frames_with_detections: 0,
            total_detections: 0,
            confidence_sum: 0.0,
            label_counts: HashMap::new(),
        }
    }

    /// Record one processed frame
    pub fn record(&mut self, detections: &[Detection], inference_time: Duration) {
        if self.inference_times.len() == self.window {
            self.inference_times.pop_front();
        }
        self.inference_times.push_back(inference_time);

        self.frames += 1;
        if !detections.is_empty() {
            self.frames_with_detections += 1;
        }
        for detection in detections {
            self.total_detections += 1;
            self.confidence_sum += detection.confidence as f64;
            *self.label_counts.entry(detection.label.clone()).or_insert(0) += 1;
        }
    }

    /// Mean confidence across all detections
    pub fn mean_confidence(&self) -> f64 {
        if self.total_detections > 0 {
            self.confidence_sum / self.total_detections as f64
        } else {
            0.0
        }
    }

    /// Percentage of frames with at least one detection
    pub fn detection_rate(&self) -> f64 {
        if self.frames > 0 {
            self.frames_with_detections as f64 * 100.0 / self.frames as f64
        } else {
            0.0
        }
    }

    /// Detections per recorded frame
    pub fn detections_per_frame(&self) -> f64 {
        if self.frames > 0 {
            self.total_detections as f64 / self.frames as f64
        } else {
            0.0
        }
    }

    pub fn mean_inference_time(&self) -> Option<Duration> {
        let count = self.inference_times.len() as u32;
        if count == 0 {
            return None;
        }
        Some(self.inference_times.iter().sum::<Duration>() / count)
    }

    pub fn min_inference_time(&self) -> Option<Duration> {
        self.inference_times.iter().min().copied()
    }

    pub fn max_inference_time(&self) -> Option<Duration> {
        self.inference_times.iter().max().copied()
    }

    pub fn median_inference_time(&self) -> Option<Duration> {
        let mut sorted: Vec<Duration> = self.inference_times.iter().copied().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort();

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2)
        } else {
            Some(sorted[mid])
        }
    }

    /// Inference throughput implied by the mean inference time
    pub fn inference_fps(&self) -> f64 {
        match self.mean_inference_time() {
            Some(mean) if !mean.is_zero() => 1.0 / mean.as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Count for one label
    pub fn label_count(&self, label: &str) -> u64 {
        self.label_counts.get(label).copied().unwrap_or(0)
    }

    /// Most frequent labels, highest count first, ties by name
    pub fn top_labels(&self, n: usize) -> Vec<(String, u64)> {
        let mut labels: Vec<(String, u64)> = self
            .label_counts
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .collect();
        labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        labels.truncate(n);
        labels
    }
}

impl Default for DetectionStats {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Relay statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Live sessions
    pub sessions: usize,
    /// Participants across all sessions
    pub participants: usize,
    /// Messages queued for delivery
    pub messages_relayed: u64,
    /// Participants removed after a failed delivery
    pub evictions: u64,
}

/// Signaling server statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Sockets accepted since start
    pub total_connections: u64,
    /// Sockets currently open
    pub active_connections: u64,
    /// Sockets refused because of the connection limit
    pub rejected_connections: u64,
    /// Uptime
    pub uptime: Duration,
}
