use std::time::Duration;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::outcome::{
    AcquireOutcome, CompensateOutcome, DecrementOutcome, ExtendOutcome, ReleaseOutcome,
};

/// The primitive command set every coordination node must provide.
///
/// Each mutating method is indivisible with respect to concurrent callers on
/// the same key on the same node. The lock methods take the token chosen by
/// the acquirer; token generation lives in the lock layer so that one fresh
/// token can be replayed across a whole quorum round.
#[async_trait]
pub trait NodeCommands: Send + Sync {
    /// Stable address of this node, used in logs and error reports.
    fn addr(&self) -> &str;

    /// Guarded decrement: subtract `quantity` only if the counter exists and
    /// holds at least that much.
    async fn try_decrement(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<DecrementOutcome, NodeError>;

    /// Compensating increment for a previously applied decrement. Never
    /// creates the counter; an absent key is reported, not repaired.
    async fn compensate(&self, key: &str, quantity: u64)
        -> Result<CompensateOutcome, NodeError>;

    /// Current counter value, if the key exists.
    async fn read_stock(&self, key: &str) -> Result<Option<u64>, NodeError>;

    /// Overwrite the counter. Used at provisioning and by reconciliation,
    /// both of which run under the product lock.
    async fn seed_stock(&self, key: &str, quantity: u64) -> Result<(), NodeError>;

    /// Create the lock record under `name` with `token`, only if absent, with
    /// the TTL set in the same server-side step.
    async fn acquire_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, NodeError>;

    /// Compare-and-delete: remove the record only when it stores `token`.
    async fn release_lock(&self, name: &str, token: &str)
        -> Result<ReleaseOutcome, NodeError>;

    /// Compare-and-refresh: reset the TTL only when the record stores `token`.
    async fn extend_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<ExtendOutcome, NodeError>;
}
