//! Frame pipeline implementation

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::registry::ConnectionId;
use crate::stats::{DetectionStats, PipelineCounters, PipelineStats};
use crate::transport::{FrameSource, TransportError};

use super::config::PipelineConfig;
use super::detection::{filter_detections, DetectionResult, Detector, InferenceError};
use super::error::PipelineError;
use super::frame::FrameJob;
use super::sink::ResultSink;

/// Notification pushed by a running attachment
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A frame went through inference
    FrameProcessed {
        connection_id: ConnectionId,
        sequence: u64,
        detections: usize,
        inference_time: Duration,
    },
    /// The track stopped delivering frames; the connection should close
    TrackEnded {
        connection_id: ConnectionId,
        error: TransportError,
    },
}

/// Hand-off cell between the ingest and worker tasks
struct Slot {
    /// Set by ingest before handing a frame over, cleared by the worker
    in_flight: AtomicBool,
    latest: Mutex<Option<FrameJob>>,
    ready: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            latest: Mutex::new(None),
            ready: Notify::new(),
        }
    }

    /// Claim the worker; false if inference is already in flight
    fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store a frame, replacing any frame not yet taken
    fn put(&self, job: FrameJob) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(job);
        self.ready.notify_one();
    }

    fn take(&self) -> Option<FrameJob> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// A running attachment
struct Attachment {
    track_id: String,
    shutdown: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    worker: JoinHandle<()>,
    counters: Arc<PipelineCounters>,
    detection_stats: Arc<Mutex<DetectionStats>>,
    attached_at: Instant,
}

/// Runs detection on the video tracks of attached connections
///
/// At most one attachment per connection. Attachments are independent: a
/// failing track or model call on one never affects another.
pub struct FramePipeline<D: Detector> {
    detector: Arc<D>,
    config: PipelineConfig,
    attachments: Mutex<HashMap<ConnectionId, Attachment>>,
}

impl<D: Detector> FramePipeline<D> {
    /// Create a pipeline with default configuration
    pub fn new(detector: D) -> Self {
        Self::with_config(detector, PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration
    pub fn with_config(detector: D, config: PipelineConfig) -> Self {
        Self {
            detector: Arc::new(detector),
            config,
            attachments: Mutex::new(HashMap::new()),
        }
    }

    /// Get the pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the shared detector
    pub fn detector(&self) -> &Arc<D> {
        &self.detector
    }

    /// Start pulling frames from `source` for `connection_id`
    ///
    /// Results go to `sink`; lifecycle and per-frame notifications go to
    /// `events`. Must be called from within a tokio runtime.
    pub fn attach<S, K>(
        &self,
        connection_id: ConnectionId,
        source: S,
        sink: Arc<K>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<(), PipelineError>
    where
        S: FrameSource,
        K: ResultSink,
    {
        let mut attachments = self.lock();
        if attachments.contains_key(&connection_id) {
            return Err(PipelineError::AlreadyAttached(connection_id));
        }

        let track_id = source.track_id().to_string();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let slot = Arc::new(Slot::new());
        let counters = Arc::new(PipelineCounters::new());
        let detection_stats = Arc::new(Mutex::new(DetectionStats::new(self.config.stats_window)));

        let ingest = tokio::spawn(ingest_loop(
            connection_id,
            source,
            Arc::clone(&slot),
            Arc::clone(&counters),
            shutdown_rx.clone(),
            events.clone(),
        ));

        let worker = tokio::spawn(worker_loop(Worker {
            connection_id,
            detector: Arc::clone(&self.detector),
            config: self.config.clone(),
            slot,
            sink,
            counters: Arc::clone(&counters),
            detection_stats: Arc::clone(&detection_stats),
            shutdown: shutdown_rx,
            events,
        }));

        tracing::info!(
            connection_id = %connection_id,
            track = %track_id,
            threshold = self.config.confidence_threshold,
            "Pipeline attached"
        );

        attachments.insert(
            connection_id,
            Attachment {
                track_id,
                shutdown,
                ingest,
                worker,
                counters,
                detection_stats,
                attached_at: Instant::now(),
            },
        );

        Ok(())
    }

    /// Stop the attachment for `connection_id` and wait for its tasks
    ///
    /// An in-flight inference call is abandoned; no result is pushed once this
    /// returns. Returns false if nothing was attached. Idempotent.
    pub async fn detach(&self, connection_id: ConnectionId) -> bool {
        let attachment = self.lock().remove(&connection_id);
        let Some(attachment) = attachment else {
            return false;
        };

        let _ = attachment.shutdown.send(true);

        for (task, handle) in [("ingest", attachment.ingest), ("worker", attachment.worker)] {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(
                        connection_id = %connection_id,
                        task = task,
                        "Pipeline task panicked"
                    );
                }
            }
        }

        let stats = attachment.counters.snapshot();
        tracing::info!(
            connection_id = %connection_id,
            track = %attachment.track_id,
            frames_pulled = stats.frames_pulled,
            frames_processed = stats.frames_processed,
            frames_dropped = stats.frames_dropped,
            attached_secs = attachment.attached_at.elapsed().as_secs(),
            "Pipeline detached"
        );

        true
    }

    /// Detach every attachment
    pub async fn detach_all(&self) {
        let ids: Vec<ConnectionId> = self.lock().keys().copied().collect();
        for id in ids {
            self.detach(id).await;
        }
    }

    /// Whether `connection_id` has a running attachment
    pub fn is_attached(&self, connection_id: ConnectionId) -> bool {
        self.lock().contains_key(&connection_id)
    }

    /// Number of running attachments
    pub fn attached_count(&self) -> usize {
        self.lock().len()
    }

    /// Counter snapshot for an attachment
    pub fn stats(&self, connection_id: ConnectionId) -> Option<PipelineStats> {
        self.lock()
            .get(&connection_id)
            .map(|a| a.counters.snapshot())
    }

    /// Detection statistics for an attachment
    pub fn detection_stats(&self, connection_id: ConnectionId) -> Option<DetectionStats> {
        self.lock().get(&connection_id).map(|a| {
            a.detection_stats
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Attachment>> {
        self.attachments.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pull frames and hand them to the worker unless it is busy
async fn ingest_loop<S: FrameSource>(
    connection_id: ConnectionId,
    mut source: S,
    slot: Arc<Slot>,
    counters: Arc<PipelineCounters>,
    mut shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
) {
    let mut sequence: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = source.next_frame() => next,
        };

        match next {
            Ok(frame) => {
                let job = FrameJob::new(sequence, frame);
                sequence += 1;
                counters.record_pulled();

                if slot.try_begin() {
                    slot.put(job);
                } else {
                    counters.record_dropped();
                    tracing::trace!(
                        connection_id = %connection_id,
                        sequence = job.sequence,
                        "Frame dropped, inference in flight"
                    );
                }
            }
            Err(error) => {
                tracing::info!(
                    connection_id = %connection_id,
                    error = %error,
                    frames = sequence,
                    "Track ended"
                );
                let _ = events.send(PipelineEvent::TrackEnded {
                    connection_id,
                    error,
                });
                break;
            }
        }
    }
}

struct Worker<D: Detector, K: ResultSink> {
    connection_id: ConnectionId,
    detector: Arc<D>,
    config: PipelineConfig,
    slot: Arc<Slot>,
    sink: Arc<K>,
    counters: Arc<PipelineCounters>,
    detection_stats: Arc<Mutex<DetectionStats>>,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

/// Run inference on handed-over frames, one at a time
async fn worker_loop<D: Detector, K: ResultSink>(mut w: Worker<D, K>) {
    let id = w.connection_id;

    loop {
        tokio::select! {
            biased;
            _ = w.shutdown.changed() => break,
            _ = w.slot.ready.notified() => {}
        }

        let Some(job) = w.slot.take() else {
            continue;
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = w.shutdown.changed() => break,
            outcome = AssertUnwindSafe(w.detector.infer(&job.frame)).catch_unwind() => outcome,
        };
        let inference_time = started.elapsed();

        let detections = match outcome {
            Ok(Ok(detections)) => detections,
            Ok(Err(error)) => inference_failed(&w, job.sequence, error),
            Err(_) => inference_failed(&w, job.sequence, InferenceError::Panicked),
        };

        let detections = filter_detections(
            detections,
            w.config.confidence_threshold,
            w.config.max_detections,
        );
        let count = detections.len();

        w.counters.record_processed(job.sequence);
        w.detection_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&detections, inference_time);

        if *w.shutdown.borrow() {
            break;
        }

        if count > 0 || w.config.emit_empty_results {
            let result = DetectionResult::new(job.sequence, detections);
            match w.sink.try_push(&result) {
                Ok(()) => w.counters.record_sent(),
                Err(error) => {
                    w.counters.record_result_dropped();
                    tracing::debug!(
                        connection_id = %id,
                        sequence = job.sequence,
                        error = %error,
                        "Result dropped"
                    );
                }
            }
        }

        w.slot.finish();

        let _ = w.events.send(PipelineEvent::FrameProcessed {
            connection_id: id,
            sequence: job.sequence,
            detections: count,
            inference_time,
        });
    }

    // Leave the flag clear so nothing observes a stuck in-flight state
    w.slot.finish();
}

fn inference_failed<D: Detector, K: ResultSink>(
    w: &Worker<D, K>,
    sequence: u64,
    error: InferenceError,
) -> Vec<super::detection::Detection> {
    w.counters.record_inference_error();
    tracing::warn!(
        connection_id = %w.connection_id,
        sequence = sequence,
        error = %error,
        "Inference failed, treating frame as empty"
    );
    Vec::new()
}
