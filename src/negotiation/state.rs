//! Negotiation state machine
//!
//! Tracks the offer/answer exchange of one peer connection from creation to
//! close, independent of any transport.

use std::time::Instant;

use super::description::{IceCandidate, SdpType, SessionDescription};
use super::error::NegotiationError;

/// Negotiation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// No description exchanged yet
    Idle,
    /// Local offer sent, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet created
    HaveRemoteOffer,
    /// Offer and answer both applied
    Stable,
    /// Transport reported connectivity; media may attach
    Connected,
    /// Closed locally or by the transport
    Closed,
    /// Transport failure
    Failed,
}

impl NegotiationState {
    /// Closed or failed
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::HaveLocalOffer => "have-local-offer",
            NegotiationState::HaveRemoteOffer => "have-remote-offer",
            NegotiationState::Stable => "stable",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
            NegotiationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationEvent {
    CreateOffer,
    ReceiveOffer,
    AnswerCreated,
    ReceiveAnswer,
    ReceiveCandidate,
    TransportConnected,
}

impl std::fmt::Display for NegotiationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationEvent::CreateOffer => "createOffer",
            NegotiationEvent::ReceiveOffer => "receiveOffer",
            NegotiationEvent::AnswerCreated => "answerCreated",
            NegotiationEvent::ReceiveAnswer => "receiveAnswer",
            NegotiationEvent::ReceiveCandidate => "receiveCandidate",
            NegotiationEvent::TransportConnected => "transportConnected",
        };
        f.write_str(name)
    }
}

/// What to do with a received candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    /// Remote description is set, hand the candidate to the transport now
    Apply(IceCandidate),
    /// Held until the remote description is applied
    Buffered,
}

/// Explicit negotiation state for one connection
#[derive(Debug)]
pub struct Negotiation {
    state: NegotiationState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Candidates received before the remote description, in arrival order
    pending_candidates: Vec<IceCandidate>,
    /// Candidates released for application (direct or replayed)
    candidates_applied: usize,
    changed_at: Instant,
}

impl Negotiation {
    /// Create a negotiation in `Idle`
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
            candidates_applied: 0,
            changed_at: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// When the state last changed
    pub fn changed_at(&self) -> Instant {
        self.changed_at
    }

    /// Local description, once created
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Remote description, once applied
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Number of candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Number of candidates released to the transport
    pub fn candidates_applied(&self) -> usize {
        self.candidates_applied
    }

    /// Check whether `event` is acceptable without changing anything
    ///
    /// The driver calls this before doing transport work so a rejected step
    /// never reaches the transport.
    pub fn check(&self, event: NegotiationEvent) -> Result<(), NegotiationError> {
        use NegotiationEvent::*;
        use NegotiationState::*;

        let allowed = match (self.state, event) {
            (HaveLocalOffer, CreateOffer) => return Err(NegotiationError::Glare),
            (HaveLocalOffer, ReceiveOffer) => return Err(NegotiationError::Glare),
            (Idle, CreateOffer) | (Idle, ReceiveOffer) => true,
            (HaveRemoteOffer, AnswerCreated) => true,
            (HaveLocalOffer, ReceiveAnswer) => true,
            (Stable, TransportConnected) => true,
            (state, ReceiveCandidate) => !state.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(NegotiationError::InvalidTransition {
                state: self.state,
                event,
            })
        }
    }

    /// `Idle` → `HaveLocalOffer`
    pub fn create_offer(&mut self, offer: SessionDescription) -> Result<(), NegotiationError> {
        self.check(NegotiationEvent::CreateOffer)?;
        offer.expect(SdpType::Offer)?;

        self.local_description = Some(offer);
        self.set_state(NegotiationState::HaveLocalOffer);
        Ok(())
    }

    /// `Idle` → `HaveRemoteOffer`
    ///
    /// Returns buffered candidates, in arrival order, for replay.
    pub fn receive_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<Vec<IceCandidate>, NegotiationError> {
        self.check(NegotiationEvent::ReceiveOffer)?;
        offer.expect(SdpType::Offer)?;

        self.remote_description = Some(offer);
        self.set_state(NegotiationState::HaveRemoteOffer);
        Ok(self.take_pending())
    }

    /// `HaveRemoteOffer` → `Stable` once the local answer is set
    pub fn answer_created(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.check(NegotiationEvent::AnswerCreated)?;
        answer.expect(SdpType::Answer)?;

        self.local_description = Some(answer);
        self.set_state(NegotiationState::Stable);
        Ok(())
    }

    /// `HaveLocalOffer` → `Stable`
    ///
    /// Returns buffered candidates, in arrival order, for replay. A stale or
    /// duplicate answer yields `InvalidTransition` and leaves state untouched.
    pub fn receive_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Vec<IceCandidate>, NegotiationError> {
        self.check(NegotiationEvent::ReceiveAnswer)?;
        answer.expect(SdpType::Answer)?;

        self.remote_description = Some(answer);
        self.set_state(NegotiationState::Stable);
        Ok(self.take_pending())
    }

    /// Accept a remote candidate without changing state
    pub fn receive_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateAction, NegotiationError> {
        self.check(NegotiationEvent::ReceiveCandidate)?;

        if self.remote_description.is_some() {
            self.candidates_applied += 1;
            Ok(CandidateAction::Apply(candidate))
        } else {
            self.pending_candidates.push(candidate);
            Ok(CandidateAction::Buffered)
        }
    }

    /// `Stable` → `Connected`
    pub fn transport_connected(&mut self) -> Result<(), NegotiationError> {
        self.check(NegotiationEvent::TransportConnected)?;
        self.set_state(NegotiationState::Connected);
        Ok(())
    }

    /// Any non-terminal state → `Closed`
    ///
    /// Returns false if already terminal, so the terminal change is observed once.
    pub fn close(&mut self) -> bool {
        self.terminate(NegotiationState::Closed)
    }

    /// Any non-terminal state → `Failed`
    ///
    /// Returns false if already terminal.
    pub fn fail(&mut self) -> bool {
        self.terminate(NegotiationState::Failed)
    }

    fn terminate(&mut self, terminal: NegotiationState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.pending_candidates.clear();
        self.set_state(terminal);
        true
    }

    fn take_pending(&mut self) -> Vec<IceCandidate> {
        let replay = std::mem::take(&mut self.pending_candidates);
        self.candidates_applied += replay.len();
        replay
    }

    fn set_state(&mut self, state: NegotiationState) {
        tracing::trace!(from = %self.state, to = %state, "Negotiation transition");
        self.state = state;
        self.changed_at = Instant::now();
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}
