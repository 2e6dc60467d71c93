use std::time::{Duration, Instant};

/// Proof of a held lock, returned by a successful acquisition.
///
/// `validity` is how long the holder may trust the lock from `acquired_at`,
/// measured on the local monotonic clock. For a single-node lock it equals
/// the requested TTL; for a quorum lock it is the TTL minus the acquisition
/// round's elapsed time and the clock-drift allowance. No step of a critical
/// section may run past [`LockGrant::deadline`].
#[derive(Debug, Clone)]
pub struct LockGrant {
    /// Lock name, e.g. `lock:stock:42`.
    pub name: String,

    /// The token written on every granted node.
    pub token: String,

    /// Monotonic instant at which the acquisition round started.
    pub acquired_at: Instant,

    /// Remaining trust window measured from `acquired_at`.
    pub validity: Duration,

    /// Indices (into the strategy's node list) of the nodes that granted.
    /// The decrement is replayed on exactly this set.
    pub granted_nodes: Vec<usize>,
}

impl LockGrant {
    /// Instant after which the lock must no longer be trusted.
    pub fn deadline(&self) -> Instant {
        self.acquired_at + self.validity
    }

    /// Trust window still remaining, zero once past the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// True once the holder must stop trusting the lock.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Outcome of one acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is held; the grant carries the validity window.
    Granted(LockGrant),

    /// Contention: enough nodes answered, but another holder is in the way
    /// (or the round was too slow to leave a positive validity). Retrying
    /// with backoff is useful.
    Busy,

    /// Node failures made a quorum impossible even without contention.
    /// Retrying immediately is not useful; the service is degraded.
    Unavailable,
}

impl LockAttempt {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockAttempt::Granted(_))
    }
}
