//! Relay configuration

use std::time::Duration;

/// One sender plus one receiver
pub const MAX_PARTICIPANTS: usize = 2;

/// Configuration for the signaling relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum participants per session
    ///
    /// Each role is held by at most one member, so a session never has more
    /// than two members; values above 2 have no effect.
    pub max_participants: usize,

    /// Capacity of each participant's outbound queue
    pub send_queue_capacity: usize,

    /// Idle sessions drop abandoned members after this long
    pub idle_timeout: Duration,

    /// How often the cleanup task runs
    pub cleanup_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_participants: MAX_PARTICIPANTS,
            send_queue_capacity: 64,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Set the per-session participant limit, clamped to 1..=2
    ///
    /// A limit of 1 admits only the first joiner, whatever its role.
    pub fn max_participants(mut self, max: usize) -> Self {
        self.max_participants = max.clamp(1, MAX_PARTICIPANTS);
        self
    }

    /// Set the outbound queue capacity (at least 1)
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set the idle session timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
