use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::commands::NodeCommands;
use crate::error::NodeError;
use crate::outcome::{
    AcquireOutcome, CompensateOutcome, DecrementOutcome, ExtendOutcome, ReleaseOutcome,
};

struct LockRecord {
    token: String,
    expires_at: Instant,
}

/// In-process coordination node with the same observable semantics as
/// [`crate::RedisNode`]: per-key atomic counter scripts, create-if-absent
/// locks with TTL, compare-and-delete release.
///
/// Each key maps to one dashmap shard entry, so a mutating access holds that
/// entry exclusively for the whole check-then-act, which is exactly the
/// atomicity the Lua scripts give on a real node. Expired lock records are
/// dropped lazily on the next access to their name.
///
/// The node can be taken offline with [`MemoryNode::set_online`]; while
/// offline every command fails with [`NodeError::Unreachable`], which is how
/// the failure-scenario tests kill nodes mid-run.
pub struct MemoryNode {
    addr: String,
    counters: DashMap<String, u64>,
    locks: DashMap<String, LockRecord>,
    online: AtomicBool,
}

impl MemoryNode {
    pub fn new(addr: impl Into<String>) -> Self {
        MemoryNode {
            addr: addr.into(),
            counters: DashMap::new(),
            locks: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate a node crash (or recovery). Offline nodes reject every
    /// command with `Unreachable`; their stored state is kept, as a real
    /// partitioned node would keep its.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Synchronous counter peek for assertions.
    pub fn stock(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|v| *v)
    }

    /// Token of the live lock record under `name`, if any.
    pub fn lock_holder(&self, name: &str) -> Option<String> {
        self.locks
            .get(name)
            .filter(|rec| rec.expires_at > Instant::now())
            .map(|rec| rec.token.clone())
    }

    fn check_online(&self) -> Result<(), NodeError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NodeError::Unreachable {
                addr: self.addr.clone(),
                detail: "node offline".to_string(),
            })
        }
    }

    fn drop_if_expired(&self, name: &str) {
        let now = Instant::now();
        self.locks.remove_if(name, |_, rec| rec.expires_at <= now);
    }
}

#[async_trait::async_trait]
impl NodeCommands for MemoryNode {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn try_decrement(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<DecrementOutcome, NodeError> {
        self.check_online()?;
        match self.counters.get_mut(key) {
            None => Ok(DecrementOutcome::Missing),
            Some(mut stock) => {
                if *stock < quantity {
                    Ok(DecrementOutcome::Insufficient { available: *stock })
                } else {
                    *stock -= quantity;
                    Ok(DecrementOutcome::Applied { remaining: *stock })
                }
            }
        }
    }

    async fn compensate(
        &self,
        key: &str,
        quantity: u64,
    ) -> Result<CompensateOutcome, NodeError> {
        self.check_online()?;
        match self.counters.get_mut(key) {
            None => Ok(CompensateOutcome::Missing),
            Some(mut stock) => {
                *stock += quantity;
                Ok(CompensateOutcome::Applied { stock: *stock })
            }
        }
    }

    async fn read_stock(&self, key: &str) -> Result<Option<u64>, NodeError> {
        self.check_online()?;
        Ok(self.counters.get(key).map(|v| *v))
    }

    async fn seed_stock(&self, key: &str, quantity: u64) -> Result<(), NodeError> {
        self.check_online()?;
        self.counters.insert(key.to_string(), quantity);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, NodeError> {
        self.check_online()?;
        let now = Instant::now();
        let record = LockRecord {
            token: token.to_string(),
            expires_at: now + ttl,
        };
        match self.locks.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(AcquireOutcome::Acquired)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= now {
                    slot.insert(record);
                    Ok(AcquireOutcome::Acquired)
                } else {
                    Ok(AcquireOutcome::Busy)
                }
            }
        }
    }

    async fn release_lock(
        &self,
        name: &str,
        token: &str,
    ) -> Result<ReleaseOutcome, NodeError> {
        self.check_online()?;
        self.drop_if_expired(name);
        match self.locks.remove_if(name, |_, rec| rec.token == token) {
            Some(_) => Ok(ReleaseOutcome::Released),
            None => Ok(ReleaseOutcome::NotHeld),
        }
    }

    async fn extend_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<ExtendOutcome, NodeError> {
        self.check_online()?;
        self.drop_if_expired(name);
        match self.locks.get_mut(name) {
            Some(mut rec) if rec.token == token => {
                rec.expires_at = Instant::now() + ttl;
                Ok(ExtendOutcome::Extended)
            }
            _ => Ok(ExtendOutcome::NotHeld),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOCK: &str = "stock:1";
    const LOCK: &str = "lock:stock:1";

    #[tokio::test]
    async fn decrement_missing_key_is_typed() {
        let node = MemoryNode::new("mem-0");
        let outcome = node.try_decrement(STOCK, 1).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::Missing);
    }

    #[tokio::test]
    async fn decrement_insufficient_leaves_counter_untouched() {
        let node = MemoryNode::new("mem-0");
        node.seed_stock(STOCK, 3).await.unwrap();
        let outcome = node.try_decrement(STOCK, 4).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::Insufficient { available: 3 });
        assert_eq!(node.stock(STOCK), Some(3));
    }

    #[tokio::test]
    async fn decrement_to_exactly_zero_succeeds() {
        let node = MemoryNode::new("mem-0");
        node.seed_stock(STOCK, 5).await.unwrap();
        let outcome = node.try_decrement(STOCK, 5).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::Applied { remaining: 0 });
        let outcome = node.try_decrement(STOCK, 1).await.unwrap();
        assert_eq!(outcome, DecrementOutcome::Insufficient { available: 0 });
    }

    #[tokio::test]
    async fn compensate_never_creates_a_counter() {
        let node = MemoryNode::new("mem-0");
        let outcome = node.compensate(STOCK, 7).await.unwrap();
        assert_eq!(outcome, CompensateOutcome::Missing);
        assert_eq!(node.stock(STOCK), None);
    }

    #[tokio::test]
    async fn compensate_restores_decremented_units() {
        let node = MemoryNode::new("mem-0");
        node.seed_stock(STOCK, 10).await.unwrap();
        node.try_decrement(STOCK, 4).await.unwrap();
        let outcome = node.compensate(STOCK, 4).await.unwrap();
        assert_eq!(outcome, CompensateOutcome::Applied { stock: 10 });
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let node = MemoryNode::new("mem-0");
        let ttl = Duration::from_secs(5);
        assert_eq!(
            node.acquire_lock(LOCK, "a", ttl).await.unwrap(),
            AcquireOutcome::Acquired
        );
        assert_eq!(
            node.acquire_lock(LOCK, "b", ttl).await.unwrap(),
            AcquireOutcome::Busy
        );
        assert_eq!(
            node.release_lock(LOCK, "a").await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            node.acquire_lock(LOCK, "b", ttl).await.unwrap(),
            AcquireOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn release_with_wrong_token_deletes_nothing() {
        let node = MemoryNode::new("mem-0");
        node.acquire_lock(LOCK, "a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            node.release_lock(LOCK, "b").await.unwrap(),
            ReleaseOutcome::NotHeld
        );
        assert_eq!(node.lock_holder(LOCK).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let node = MemoryNode::new("mem-0");
        node.acquire_lock(LOCK, "a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            node.release_lock(LOCK, "a").await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            node.release_lock(LOCK, "a").await.unwrap(),
            ReleaseOutcome::NotHeld
        );
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired_but_not_released() {
        let node = MemoryNode::new("mem-0");
        node.acquire_lock(LOCK, "a", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // The original holder lost the lock to TTL expiry.
        assert_eq!(
            node.release_lock(LOCK, "a").await.unwrap(),
            ReleaseOutcome::NotHeld
        );
        assert_eq!(
            node.acquire_lock(LOCK, "b", Duration::from_secs(5))
                .await
                .unwrap(),
            AcquireOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn extend_refreshes_only_for_the_holder() {
        let node = MemoryNode::new("mem-0");
        node.acquire_lock(LOCK, "a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            node.extend_lock(LOCK, "b", Duration::from_secs(5))
                .await
                .unwrap(),
            ExtendOutcome::NotHeld
        );
        assert_eq!(
            node.extend_lock(LOCK, "a", Duration::from_secs(5))
                .await
                .unwrap(),
            ExtendOutcome::Extended
        );
    }

    #[tokio::test]
    async fn offline_node_rejects_everything() {
        let node = MemoryNode::new("mem-0");
        node.seed_stock(STOCK, 1).await.unwrap();
        node.set_online(false);
        let err = node.try_decrement(STOCK, 1).await.unwrap_err();
        assert!(matches!(err, NodeError::Unreachable { .. }));
        node.set_online(true);
        assert!(node.try_decrement(STOCK, 1).await.is_ok());
    }
}
