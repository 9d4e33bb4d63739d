//! Per-session driver task
//!
//! A [`PeerSession`] is the detecting side of one signaling session. It reads
//! relayed messages, creates the connection on the first offer, applies
//! transport and pipeline notifications, and hands terminal connections to the
//! registry for teardown.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::Error;
use crate::negotiation::{IceCandidate, SignalPayload};
use crate::pipeline::{Detector, FramePipeline, PipelineEvent};
use crate::registry::ConnectionRegistry;
use crate::relay::{ParticipantHandle, SignalingRelay};
use crate::transport::{
    PeerTransport, TransportError, TransportEvent, TransportEvents, TransportFactory,
};

use super::connection::PeerConnection;

/// Candidates held for a connection that does not exist yet
const MAX_EARLY_CANDIDATES: usize = 32;

/// The live connection of a session and its transport notifications
struct Link<T: PeerTransport, D: Detector> {
    connection: Arc<PeerConnection<T, D>>,
    events: TransportEvents<T>,
}

/// Driver for one session membership
pub struct PeerSession<F: TransportFactory, D: Detector> {
    handle: ParticipantHandle,
    relay: Arc<SignalingRelay>,
    registry: Arc<ConnectionRegistry<F::Transport, D>>,
    pipeline: Arc<FramePipeline<D>>,
    factory: Arc<F>,
    metrics: Option<mpsc::UnboundedSender<PipelineEvent>>,
    shutdown: watch::Receiver<bool>,
}

impl<F: TransportFactory, D: Detector> PeerSession<F, D> {
    /// Create a driver for an already joined participant
    pub fn new(
        handle: ParticipantHandle,
        relay: Arc<SignalingRelay>,
        registry: Arc<ConnectionRegistry<F::Transport, D>>,
        pipeline: Arc<FramePipeline<D>>,
        factory: Arc<F>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle,
            relay,
            registry,
            pipeline,
            factory,
            metrics: None,
            shutdown,
        }
    }

    /// Forward every pipeline event to `metrics`
    pub fn with_metrics(mut self, metrics: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until the participant leaves the relay or shutdown is signalled
    ///
    /// A connection that fails or closes is torn down and the session keeps
    /// running, so the remote peer can offer again.
    pub async fn run(mut self) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut link: Option<Link<F::Transport, D>> = None;
        let mut early = EarlyCandidates::default();

        tracing::info!(
            session = %self.handle.session_id(),
            participant = %self.handle.id(),
            "Peer session started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                message = self.handle.recv() => match message {
                    Some(data) => {
                        self.on_signal(&mut link, &mut early, &events_tx, data)
                            .await;
                    }
                    None => break,
                },
                event = next_transport_event(&mut link) => match event {
                    Some(event) => self.on_transport_event(&link, event).await,
                    None => {
                        if let Some(link) = &link {
                            tracing::warn!(
                                connection_id = %link.connection.id(),
                                "Transport event stream ended"
                            );
                            link.connection.close().await;
                        }
                    }
                },
                Some(event) = events_rx.recv() => self.on_pipeline_event(&link, event).await,
            }

            if link
                .as_ref()
                .is_some_and(|l| l.connection.state().is_terminal())
            {
                if let Some(ended) = link.take() {
                    self.registry.unregister(ended.connection.id()).await;
                    early.retire();
                }
            }
        }

        if let Some(ended) = link.take() {
            self.registry.unregister(ended.connection.id()).await;
        }
        self.relay.leave(&self.handle).await;

        tracing::info!(
            session = %self.handle.session_id(),
            participant = %self.handle.id(),
            "Peer session ended"
        );
    }

    async fn on_signal(
        &self,
        link: &mut Option<Link<F::Transport, D>>,
        early: &mut EarlyCandidates,
        events: &mpsc::UnboundedSender<PipelineEvent>,
        data: Bytes,
    ) {
        let payload = match SignalPayload::from_slice(&data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    session = %self.handle.session_id(),
                    error = %e,
                    "Ignoring undecodable signaling message"
                );
                return;
            }
        };

        tracing::debug!(
            session = %self.handle.session_id(),
            kind = payload.kind(),
            "Signaling message received"
        );

        if link.is_none() {
            match &payload {
                SignalPayload::Candidate(candidate) => {
                    if !early.push(candidate.clone()) {
                        tracing::debug!(
                            session = %self.handle.session_id(),
                            held = early.len(),
                            "Dropping candidate without a connection"
                        );
                    }
                    return;
                }
                SignalPayload::Answer(_) => {
                    tracing::warn!(
                        session = %self.handle.session_id(),
                        "Ignoring answer without a connection"
                    );
                    return;
                }
                SignalPayload::Offer(_) => {
                    let Some(opened) = self.open_link(events).await else {
                        return;
                    };
                    // Buffered inside the connection until the offer is applied
                    for candidate in early.take() {
                        let _ = opened
                            .connection
                            .handle_signal(SignalPayload::Candidate(candidate))
                            .await;
                    }
                    *link = Some(opened);
                }
            }
        }

        let Some(current) = link.as_ref() else {
            return;
        };

        match current.connection.handle_signal(payload).await {
            Ok(replies) => {
                for reply in replies {
                    self.reply(reply).await;
                }
            }
            Err(Error::Negotiation(e)) => {
                tracing::warn!(
                    connection_id = %current.connection.id(),
                    error = %e,
                    "Ignoring signaling message"
                );
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %current.connection.id(),
                    error = %e,
                    "Signaling step failed"
                );
            }
        }
    }

    async fn open_link(
        &self,
        events: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> Option<Link<F::Transport, D>> {
        let id = self.registry.next_id();

        let (transport, transport_events) = match self.factory.create(id).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(
                    session = %self.handle.session_id(),
                    connection_id = %id,
                    error = %e,
                    "Failed to create transport"
                );
                return None;
            }
        };

        let connection = Arc::new(PeerConnection::new(
            id,
            transport,
            Arc::clone(&self.pipeline),
            events.clone(),
        ));

        if let Err(e) = self.registry.register(Arc::clone(&connection)).await {
            tracing::warn!(connection_id = %id, error = %e, "Failed to register connection");
            connection.close().await;
            return None;
        }

        tracing::info!(
            session = %self.handle.session_id(),
            connection_id = %id,
            "Connection created for offer"
        );

        Some(Link {
            connection,
            events: transport_events,
        })
    }

    async fn on_transport_event(
        &self,
        link: &Option<Link<F::Transport, D>>,
        event: TransportEvent<F::Transport>,
    ) {
        let Some(link) = link else {
            return;
        };

        match link.connection.handle_transport_event(event).await {
            Ok(Some(reply)) => self.reply(reply).await,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    connection_id = %link.connection.id(),
                    error = %e,
                    "Transport event rejected"
                );
            }
        }
    }

    async fn on_pipeline_event(&self, link: &Option<Link<F::Transport, D>>, event: PipelineEvent) {
        if let Some(metrics) = &self.metrics {
            let _ = metrics.send(event.clone());
        }

        let PipelineEvent::TrackEnded {
            connection_id,
            error,
        } = event
        else {
            return;
        };

        let Some(link) = link.as_ref().filter(|l| l.connection.id() == connection_id) else {
            return;
        };

        match error {
            TransportError::TrackEnded => link.connection.close().await,
            _ => link.connection.fail().await,
        };
    }

    async fn reply(&self, payload: SignalPayload) {
        if let Err(e) = self.relay.send(&self.handle, payload.to_bytes()).await {
            tracing::warn!(
                session = %self.handle.session_id(),
                kind = payload.kind(),
                error = %e,
                "Failed to relay reply"
            );
        }
    }
}

/// Remote candidates received before the offer that creates their connection
///
/// Once a connection has been torn down, candidates that trail in for it are
/// discarded until the next offer.
#[derive(Debug, Default)]
struct EarlyCandidates {
    held: Vec<IceCandidate>,
    retired: bool,
}

impl EarlyCandidates {
    /// Returns false if the candidate was discarded
    fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.retired || self.held.len() >= MAX_EARLY_CANDIDATES {
            return false;
        }
        self.held.push(candidate);
        true
    }

    fn len(&self) -> usize {
        self.held.len()
    }

    /// Hand over everything held and accept candidates again
    fn take(&mut self) -> Vec<IceCandidate> {
        self.retired = false;
        std::mem::take(&mut self.held)
    }

    /// The current connection ended
    fn retire(&mut self) {
        self.held.clear();
        self.retired = true;
    }
}

/// Next notification of the current link; pends while there is none
async fn next_transport_event<T: PeerTransport, D: Detector>(
    link: &mut Option<Link<T, D>>,
) -> Option<TransportEvent<T>> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}
