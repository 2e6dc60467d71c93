use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};

use stampede_node::{AcquireOutcome, ExtendOutcome, NodeCommands, ReleaseOutcome};

use crate::grant::{LockAttempt, LockGrant};
use crate::strategy::StockLock;
use crate::token::fresh_token;

/// Pessimistic lock on a single coordination node.
///
/// The full TTL is the validity window: there is no acquisition round to
/// subtract and no peer clocks to drift against.
pub struct SingleNodeLock {
    nodes: Vec<Arc<dyn NodeCommands>>,
}

impl SingleNodeLock {
    pub fn new(node: Arc<dyn NodeCommands>) -> Self {
        SingleNodeLock { nodes: vec![node] }
    }

    fn node(&self) -> &Arc<dyn NodeCommands> {
        &self.nodes[0]
    }
}

#[async_trait]
impl StockLock for SingleNodeLock {
    fn nodes(&self) -> &[Arc<dyn NodeCommands>] {
        &self.nodes
    }

    async fn acquire(&self, name: &str, ttl: Duration) -> LockAttempt {
        let token = fresh_token();
        let acquired_at = Instant::now();
        match self.node().acquire_lock(name, &token, ttl).await {
            Ok(AcquireOutcome::Acquired) => LockAttempt::Granted(LockGrant {
                name: name.to_string(),
                token,
                acquired_at,
                validity: ttl,
                granted_nodes: vec![0],
            }),
            Ok(AcquireOutcome::Busy) => LockAttempt::Busy,
            Err(e) => {
                warn!("lock {name}: acquisition failed: {e}");
                LockAttempt::Unavailable
            }
        }
    }

    async fn release(&self, grant: &LockGrant) {
        match self.node().release_lock(&grant.name, &grant.token).await {
            Ok(ReleaseOutcome::Released) => debug!("lock {}: released", grant.name),
            // Already expired or released; the successor is safe either way.
            Ok(ReleaseOutcome::NotHeld) => debug!("lock {}: no longer held", grant.name),
            Err(e) => warn!("lock {}: release failed, TTL will clean up: {e}", grant.name),
        }
    }

    async fn extend(&self, grant: &mut LockGrant, new_ttl: Duration) -> bool {
        let refreshed_at = Instant::now();
        match self
            .node()
            .extend_lock(&grant.name, &grant.token, new_ttl)
            .await
        {
            Ok(ExtendOutcome::Extended) => {
                grant.acquired_at = refreshed_at;
                grant.validity = new_ttl;
                true
            }
            Ok(ExtendOutcome::NotHeld) => false,
            Err(e) => {
                warn!("lock {}: extend failed: {e}", grant.name);
                false
            }
        }
    }
}
