//! Signaling relay implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::stats::RelayStats;

use super::config::RelayConfig;
use super::error::RelayError;
use super::message::Role;
use super::participant::{ParticipantHandle, ParticipantId, SessionId};

/// Relay-side state for one member of a session
struct Member {
    id: ParticipantId,
    role: Role,
    tx: mpsc::Sender<Bytes>,
}

/// A signaling session with at most `max_participants` members
struct Session {
    members: Vec<Member>,
    created_at: Instant,
    /// Milliseconds since `created_at` of the last join or relayed message
    last_activity_ms: AtomicU64,
}

impl Session {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.created_at
            + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }
}

/// Process-wide message bus for signaling sessions
///
/// Thread-safe via `RwLock`. Sends only take the read lock, so fan-out from
/// independent sessions (and from both members of one session) runs
/// concurrently; joins and leaves take the write lock.
pub struct SignalingRelay {
    /// Map of session id to session
    sessions: RwLock<HashMap<SessionId, Session>>,

    /// Next participant id to hand out
    next_participant_id: AtomicU64,

    /// Messages delivered to a member queue
    messages_relayed: AtomicU64,

    /// Members removed because their queue was closed or full
    evictions: AtomicU64,

    /// Configuration
    config: RelayConfig,
}

impl SignalingRelay {
    /// Create a new relay with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_participant_id: AtomicU64::new(1),
            messages_relayed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            config,
        }
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Join a session, creating it if it doesn't exist
    ///
    /// The new participant only sees messages sent after this call returns.
    pub async fn join(
        &self,
        session_id: impl Into<SessionId>,
        role: Role,
    ) -> Result<ParticipantHandle, RelayError> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(Session::new);

        if session.members.len() >= self.config.max_participants {
            return Err(RelayError::SessionFull(session_id));
        }
        if session.members.iter().any(|m| m.role == role) {
            return Err(RelayError::RoleTaken(session_id, role));
        }

        let id = ParticipantId(self.next_participant_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity);
        session.members.push(Member { id, role, tx });
        session.touch();

        tracing::info!(
            session = %session_id,
            participant = %id,
            role = %role,
            members = session.members.len(),
            "Participant joined"
        );

        Ok(ParticipantHandle::new(id, session_id, role, rx))
    }

    /// Relay a message to every other member of the sender's session
    ///
    /// Returns the number of members the message was queued for. Having no
    /// other members is not an error. Members whose queue is closed or full
    /// are evicted after the fan-out completes.
    pub async fn send(&self, from: &ParticipantHandle, message: Bytes) -> Result<usize, RelayError> {
        let session_id = from.session_id();
        let mut failed = Vec::new();
        let mut delivered = 0;

        {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .filter(|s| s.members.iter().any(|m| m.id == from.id()))
                .ok_or_else(|| RelayError::NotJoined(session_id.clone()))?;

            for member in session.members.iter().filter(|m| m.id != from.id()) {
                match member.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(
                            session = %session_id,
                            participant = %member.id,
                            error = %e,
                            "Relay delivery failed, evicting participant"
                        );
                        failed.push(member.id);
                    }
                }
            }
            session.touch();
        }

        self.messages_relayed.fetch_add(delivered as u64, Ordering::Relaxed);

        for id in failed {
            if self.remove_participant(session_id, id).await {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::debug!(
            session = %session_id,
            from = %from.id(),
            bytes = message.len(),
            delivered = delivered,
            "Message relayed"
        );

        Ok(delivered)
    }

    /// Remove a participant from its session
    ///
    /// Idempotent: leaving twice is the same as leaving once.
    pub async fn leave(&self, handle: &ParticipantHandle) {
        self.remove_participant(handle.session_id(), handle.id()).await;
    }

    /// Returns true if the participant was present
    async fn remove_participant(&self, session_id: &SessionId, id: ParticipantId) -> bool {
        let mut sessions = self.sessions.write().await;

        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        let Some(pos) = session.members.iter().position(|m| m.id == id) else {
            return false;
        };

        // Dropping the sender wakes the participant's pending recv()
        let member = session.members.remove(pos);
        let remaining = session.members.len();

        tracing::info!(
            session = %session_id,
            participant = %id,
            role = %member.role,
            remaining = remaining,
            "Participant left"
        );

        if remaining == 0 {
            sessions.remove(session_id);
            tracing::info!(session = %session_id, "Session closed");
        }

        true
    }

    /// Check whether a session exists
    pub async fn session_exists(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of members currently in a session
    pub async fn member_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.members.len())
            .unwrap_or(0)
    }

    /// Snapshot of relay statistics
    pub async fn stats(&self) -> RelayStats {
        let sessions = self.sessions.read().await;

        RelayStats {
            sessions: sessions.len(),
            participants: sessions.values().map(|s| s.members.len()).sum(),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Run cleanup once
    ///
    /// In sessions with no join or relayed message for longer than
    /// `idle_timeout`, members whose handle was dropped are removed, and the
    /// session goes once no member is left. Members still holding their
    /// handle are never removed here.
    pub async fn cleanup(&self) {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let timeout = self.config.idle_timeout;

        sessions.retain(|id, session| {
            if session.idle_for(now) <= timeout {
                return true;
            }

            let before = session.members.len();
            session.members.retain(|m| !m.tx.is_closed());
            let removed = before - session.members.len();

            if session.members.is_empty() {
                tracing::info!(session = %id, "Session removed by cleanup");
                false
            } else {
                if removed > 0 {
                    tracing::info!(
                        session = %id,
                        removed = removed,
                        remaining = session.members.len(),
                        "Abandoned participants removed by cleanup"
                    );
                }
                true
            }
        });
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let relay = Arc::clone(self);
        let interval = relay.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                relay.cleanup().await;
            }
        })
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}
