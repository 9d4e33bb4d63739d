//! Detection service
//!
//! Joins signaling sessions in-process as the receiver and runs detection on
//! the video each sender offers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::peer::PeerSession;
use crate::pipeline::{Detector, FramePipeline, PipelineConfig, PipelineEvent};
use crate::registry::ConnectionRegistry;
use crate::relay::{Role, SessionId, SignalingRelay};
use crate::transport::TransportFactory;

/// Receiver side of every served session
pub struct DetectionService<F: TransportFactory, D: Detector> {
    relay: Arc<SignalingRelay>,
    registry: Arc<ConnectionRegistry<F::Transport, D>>,
    pipeline: Arc<FramePipeline<D>>,
    factory: Arc<F>,
    metrics: Option<mpsc::UnboundedSender<PipelineEvent>>,
    shutdown: watch::Sender<bool>,
    sessions: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl<F: TransportFactory, D: Detector> DetectionService<F, D> {
    /// Create a service on `relay`
    pub fn new(relay: Arc<SignalingRelay>, factory: F, detector: D, config: PipelineConfig) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            relay,
            registry: Arc::new(ConnectionRegistry::new()),
            pipeline: Arc::new(FramePipeline::with_config(detector, config)),
            factory: Arc::new(factory),
            metrics: None,
            shutdown,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Push every pipeline event (per-frame timings, track ends) to `metrics`
    pub fn with_metrics(mut self, metrics: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn relay(&self) -> &Arc<SignalingRelay> {
        &self.relay
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<F::Transport, D>> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline<D>> {
        &self.pipeline
    }

    /// Join `session` as receiver and start its driver
    ///
    /// Fails if the session already has a receiver or is full.
    pub async fn serve_session(&self, session: impl Into<SessionId>) -> Result<()> {
        let session = session.into();
        let handle = self.relay.join(session.clone(), Role::Receiver).await?;

        let mut driver = PeerSession::new(
            handle,
            Arc::clone(&self.relay),
            Arc::clone(&self.registry),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.factory),
            self.shutdown.subscribe(),
        );
        if let Some(metrics) = &self.metrics {
            driver = driver.with_metrics(metrics.clone());
        }

        let task = tokio::spawn(driver.run());

        let mut sessions = self.lock_sessions();
        sessions.retain(|_, running| !running.is_finished());
        sessions.insert(session, task);

        Ok(())
    }

    /// Whether a driver is still running for `session`
    pub fn is_serving(&self, session: &SessionId) -> bool {
        self.lock_sessions()
            .get(session)
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop every driver and close every connection
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let tasks: Vec<(SessionId, JoinHandle<()>)> = self.lock_sessions().drain().collect();
        for (session, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(session = %session, error = %e, "Session driver failed");
            }
        }

        self.registry.shutdown().await;
        tracing::info!("Detection service stopped");
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, JoinHandle<()>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
