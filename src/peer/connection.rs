//! One negotiated peer link
//!
//! A [`PeerConnection`] ties together the negotiation state machine, the
//! engine-side transport and the pipeline attachment of one connection. All
//! mutation goes through a single async mutex, so no two negotiation steps for
//! the same connection ever interleave, including their transport calls.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};

use crate::error::Result;
use crate::negotiation::{
    CandidateAction, IceCandidate, Negotiation, NegotiationEvent, NegotiationState, SdpType,
    SessionDescription, SignalPayload,
};
use crate::pipeline::{ChannelSink, Detector, FramePipeline, PipelineEvent};
use crate::registry::ConnectionId;
use crate::stats::PipelineStats;
use crate::transport::{
    FrameSource, PeerTransport, SideChannel, TransportError, TransportEvent, TransportState,
};

/// Mutable connection state, guarded by the connection mutex
struct Inner<T: PeerTransport> {
    negotiation: Negotiation,
    transport_state: TransportState,
    /// Track announced before the connection reached `Connected`
    pending_track: Option<T::Track>,
    /// Channel announced before the connection reached `Connected`
    pending_channel: Option<Arc<T::Channel>>,
    /// Created on `Connected` and kept from then on
    sink: Option<Arc<ChannelSink<T::Channel>>>,
    video_track: Option<String>,
    closed_at: Option<Instant>,
}

/// A peer connection and its lifecycle
pub struct PeerConnection<T: PeerTransport, D: Detector> {
    id: ConnectionId,
    transport: T,
    pipeline: Arc<FramePipeline<D>>,
    inner: Mutex<Inner<T>>,
    state_tx: watch::Sender<NegotiationState>,
    pipeline_events: mpsc::UnboundedSender<PipelineEvent>,
    created_at: Instant,
}

impl<T: PeerTransport, D: Detector> PeerConnection<T, D> {
    /// Create a connection in `Idle`
    ///
    /// Pipeline notifications for this connection are sent on `pipeline_events`.
    pub fn new(
        id: ConnectionId,
        transport: T,
        pipeline: Arc<FramePipeline<D>>,
        pipeline_events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);

        Self {
            id,
            transport,
            pipeline,
            inner: Mutex::new(Inner {
                negotiation: Negotiation::new(),
                transport_state: TransportState::New,
                pending_track: None,
                pending_channel: None,
                sink: None,
                video_track: None,
                closed_at: None,
            }),
            state_tx,
            pipeline_events,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Engine-side transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current negotiation state
    pub fn state(&self) -> NegotiationState {
        *self.state_tx.borrow()
    }

    /// Watch negotiation state changes
    ///
    /// A terminal state is published exactly once.
    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// Last state reported by the transport
    pub async fn transport_state(&self) -> TransportState {
        self.inner.lock().await.transport_state
    }

    /// Side channel result sink, present from `Connected` on
    pub async fn side_channel(&self) -> Option<Arc<ChannelSink<T::Channel>>> {
        self.inner.lock().await.sink.clone()
    }

    /// Id of the attached video track
    pub async fn video_track(&self) -> Option<String> {
        self.inner.lock().await.video_track.clone()
    }

    /// When the connection reached a terminal state
    pub async fn closed_at(&self) -> Option<Instant> {
        self.inner.lock().await.closed_at
    }

    /// Pipeline counters, while a track is attached
    pub fn pipeline_stats(&self) -> Option<PipelineStats> {
        self.pipeline.stats(self.id)
    }

    /// Create and apply a local offer
    ///
    /// Fails with `Glare` while another offer is outstanding; the outstanding
    /// offer is left untouched.
    pub async fn create_offer(&self) -> Result<SignalPayload> {
        let mut inner = self.inner.lock().await;
        inner.negotiation.check(NegotiationEvent::CreateOffer)?;

        let offer = self.guard(&mut inner, self.transport.create_offer().await).await?;
        self.guard(&mut inner, self.transport.set_local_description(&offer).await)
            .await?;
        inner.negotiation.create_offer(offer.clone())?;
        self.publish(&inner);

        Ok(SignalPayload::Offer(offer))
    }

    /// Apply a signaling message from the remote peer
    ///
    /// Returns the messages to send back. Negotiation errors leave the
    /// connection untouched and are meant to be logged and dropped; transport
    /// errors fail the connection.
    pub async fn handle_signal(&self, payload: SignalPayload) -> Result<Vec<SignalPayload>> {
        match payload {
            SignalPayload::Offer(offer) => Ok(vec![self.accept_offer(offer).await?]),
            SignalPayload::Answer(answer) => {
                self.accept_answer(answer).await?;
                Ok(Vec::new())
            }
            SignalPayload::Candidate(candidate) => {
                self.accept_candidate(candidate).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SignalPayload> {
        let mut inner = self.inner.lock().await;
        inner.negotiation.check(NegotiationEvent::ReceiveOffer)?;
        offer.expect(SdpType::Offer)?;

        self.guard(&mut inner, self.transport.set_remote_description(&offer).await)
            .await?;
        let replay = inner.negotiation.receive_offer(offer)?;
        self.publish(&inner);
        self.apply_candidates(replay).await;

        let answer = self.guard(&mut inner, self.transport.create_answer().await).await?;
        self.guard(&mut inner, self.transport.set_local_description(&answer).await)
            .await?;
        inner.negotiation.answer_created(answer.clone())?;
        self.publish(&inner);

        Ok(SignalPayload::Answer(answer))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.negotiation.check(NegotiationEvent::ReceiveAnswer)?;
        answer.expect(SdpType::Answer)?;

        self.guard(&mut inner, self.transport.set_remote_description(&answer).await)
            .await?;
        let replay = inner.negotiation.receive_answer(answer)?;
        self.publish(&inner);
        self.apply_candidates(replay).await;

        Ok(())
    }

    async fn accept_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.negotiation.receive_candidate(candidate)? {
            CandidateAction::Apply(candidate) => self.apply_candidates(vec![candidate]).await,
            CandidateAction::Buffered => {
                tracing::debug!(
                    connection_id = %self.id,
                    pending = inner.negotiation.pending_candidates(),
                    "Candidate buffered until remote description"
                );
            }
        }

        Ok(())
    }

    /// Hand candidates to the transport in order
    ///
    /// A rejected candidate only loses that path, so it is logged and skipped.
    async fn apply_candidates(&self, candidates: Vec<IceCandidate>) {
        for candidate in candidates {
            if let Err(e) = self.transport.add_ice_candidate(&candidate).await {
                tracing::warn!(
                    connection_id = %self.id,
                    candidate = %candidate.candidate,
                    error = %e,
                    "Candidate rejected"
                );
            }
        }
    }

    /// Apply a notification from the transport
    ///
    /// Returns a message for the remote peer, if any.
    pub async fn handle_transport_event(
        &self,
        event: TransportEvent<T>,
    ) -> Result<Option<SignalPayload>> {
        match event {
            TransportEvent::StateChanged(state) => {
                self.on_transport_state(state).await?;
                Ok(None)
            }
            TransportEvent::LocalCandidate(candidate) => {
                if self.state().is_terminal() {
                    return Ok(None);
                }
                Ok(Some(SignalPayload::Candidate(candidate)))
            }
            TransportEvent::Track(track) => {
                self.on_track(track).await?;
                Ok(None)
            }
            TransportEvent::Channel(channel) => {
                self.on_channel(channel).await;
                Ok(None)
            }
        }
    }

    async fn on_transport_state(&self, state: TransportState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let previous = std::mem::replace(&mut inner.transport_state, state);

        tracing::debug!(
            connection_id = %self.id,
            from = %previous,
            to = %state,
            "Transport state changed"
        );

        match state {
            TransportState::Connected => {
                if inner.negotiation.state() == NegotiationState::Connected {
                    // Recovered from a temporary disconnect
                    return Ok(());
                }
                inner.negotiation.transport_connected()?;

                let sink = match inner.pending_channel.take() {
                    Some(channel) => ChannelSink::with_channel(channel),
                    None => ChannelSink::new(),
                };
                inner.sink = Some(Arc::new(sink));
                self.publish(&inner);

                if let Some(track) = inner.pending_track.take() {
                    self.attach(&mut inner, track)?;
                }
            }
            TransportState::Failed => {
                self.terminate(&mut inner, NegotiationState::Failed).await;
            }
            TransportState::Closed => {
                self.terminate(&mut inner, NegotiationState::Closed).await;
            }
            TransportState::Disconnected => {
                tracing::info!(connection_id = %self.id, "Transport disconnected");
            }
            TransportState::New | TransportState::Connecting => {}
        }

        Ok(())
    }

    async fn on_track(&self, track: T::Track) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.negotiation.state() {
            state if state.is_terminal() => Ok(()),
            NegotiationState::Connected => self.attach(&mut inner, track),
            _ => {
                tracing::debug!(
                    connection_id = %self.id,
                    track = %track.track_id(),
                    "Track held until connected"
                );
                inner.pending_track = Some(track);
                Ok(())
            }
        }
    }

    async fn on_channel(&self, channel: T::Channel) {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.state().is_terminal() {
            return;
        }

        tracing::info!(
            connection_id = %self.id,
            label = %channel.label(),
            "Side channel opened"
        );

        let channel = Arc::new(channel);
        match &inner.sink {
            Some(sink) => sink.set_channel(channel),
            None => inner.pending_channel = Some(channel),
        }
    }

    /// Start the pipeline on `track`; only valid once connected
    fn attach(&self, inner: &mut Inner<T>, track: T::Track) -> Result<()> {
        let Some(sink) = inner.sink.clone() else {
            inner.pending_track = Some(track);
            return Ok(());
        };

        let track_id = track.track_id().to_string();
        self.pipeline
            .attach(self.id, track, sink, self.pipeline_events.clone())?;
        inner.video_track = Some(track_id);

        Ok(())
    }

    /// Close the connection
    ///
    /// Detaches the pipeline and waits for it, then closes the transport.
    /// Returns false if the connection was already closed or failed.
    pub async fn close(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.terminate(&mut inner, NegotiationState::Closed).await
    }

    /// Mark the connection failed and tear it down
    ///
    /// Returns false if the connection was already closed or failed.
    pub async fn fail(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.terminate(&mut inner, NegotiationState::Failed).await
    }

    async fn terminate(&self, inner: &mut Inner<T>, terminal: NegotiationState) -> bool {
        let changed = match terminal {
            NegotiationState::Failed => inner.negotiation.fail(),
            _ => inner.negotiation.close(),
        };

        self.pipeline.detach(self.id).await;
        inner.pending_track = None;
        inner.pending_channel = None;

        if changed {
            inner.closed_at = Some(Instant::now());
            self.transport.close().await;
            self.publish(inner);
        }

        changed
    }

    /// Fail the connection on a transport error
    async fn guard<R>(
        &self,
        inner: &mut Inner<T>,
        result: std::result::Result<R, TransportError>,
    ) -> Result<R> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.id,
                    error = %e,
                    "Transport step failed"
                );
                self.terminate(inner, NegotiationState::Failed).await;
                Err(e.into())
            }
        }
    }

    fn publish(&self, inner: &Inner<T>) {
        let state = inner.negotiation.state();
        let previous = self.state_tx.send_replace(state);

        if previous != state {
            tracing::info!(
                connection_id = %self.id,
                from = %previous,
                to = %state,
                "Negotiation state changed"
            );
        }
    }
}
