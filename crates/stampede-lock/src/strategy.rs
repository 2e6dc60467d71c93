use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stampede_node::NodeCommands;

use crate::grant::{LockAttempt, LockGrant};

/// Construction-time errors for lock strategies.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("a lock strategy needs at least one coordination node")]
    NoNodes,
}

/// The locking seam the reservation coordinator programs against.
///
/// Acquisition never blocks on contention and never returns a transport
/// error: per-node failures are folded into [`LockAttempt::Busy`] or
/// [`LockAttempt::Unavailable`] so the coordinator's retry policy sees one
/// three-way outcome. Release is unconditionally best-effort; the TTL on
/// every lock record guarantees cleanup even when release attempts fail.
#[async_trait]
pub trait StockLock: Send + Sync {
    /// The configured node set. `LockGrant::granted_nodes` indexes into this.
    fn nodes(&self) -> &[Arc<dyn NodeCommands>];

    /// One acquisition attempt with the given TTL.
    async fn acquire(&self, name: &str, ttl: Duration) -> LockAttempt;

    /// Best-effort release on every configured node, not just the granted
    /// set: a node may have granted while its reply was lost, so the
    /// caller's view of the granted set is not trusted here.
    async fn release(&self, grant: &LockGrant);

    /// Compare-and-refresh the TTL. On success the grant's window is
    /// rewritten in place and `true` is returned; on `false` the old
    /// validity still stands and the caller must finish or abort within it.
    async fn extend(&self, grant: &mut LockGrant, new_ttl: Duration) -> bool;
}
