use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};

use stampede_node::{AcquireOutcome, ExtendOutcome, NodeCommands};

use crate::grant::{LockAttempt, LockGrant};
use crate::strategy::{LockError, StockLock};
use crate::token::fresh_token;

/// Per-node result of one acquisition round.
enum Vote {
    Granted(usize),
    Busy,
    Failed,
}

/// Quorum lock over N independent, unreplicated coordination nodes.
///
/// The lock is held iff at least `N/2 + 1` nodes grant the single-node lock
/// under one shared token within a bounded round, and the drift-compensated
/// remaining validity is still positive. Node clocks are never compared;
/// only the local monotonic clock and the drift allowance
/// `ceil(ttl * drift_factor) + drift_floor` are used.
///
/// A minority of crashed or partitioned nodes costs nothing but validity; a
/// majority loss makes acquisition report `Unavailable` until TTLs expire
/// whatever partial state remains.
pub struct QuorumLock {
    nodes: Vec<Arc<dyn NodeCommands>>,
    node_timeout: Duration,
    drift_factor: f64,
    drift_floor: Duration,
    release_attempts: u32,
}

impl QuorumLock {
    /// Build a quorum lock over `nodes` with a per-node RPC budget.
    /// `node_timeout` must be well below the lock TTL or the round's elapsed
    /// time eats the entire validity window.
    pub fn new(
        nodes: Vec<Arc<dyn NodeCommands>>,
        node_timeout: Duration,
    ) -> Result<Self, LockError> {
        if nodes.is_empty() {
            return Err(LockError::NoNodes);
        }
        Ok(QuorumLock {
            nodes,
            node_timeout,
            drift_factor: 0.01,
            drift_floor: Duration::from_millis(2),
            release_attempts: 2,
        })
    }

    pub fn with_drift(mut self, factor: f64, floor: Duration) -> Self {
        self.drift_factor = factor;
        self.drift_floor = floor;
        self
    }

    pub fn with_release_attempts(mut self, attempts: u32) -> Self {
        self.release_attempts = attempts.max(1);
        self
    }

    /// Minimum grant count for the lock to be held: strictly more than half.
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn drift_allowance(&self, ttl: Duration) -> Duration {
        let compensated = (ttl.as_millis() as f64 * self.drift_factor).ceil() as u64;
        Duration::from_millis(compensated) + self.drift_floor
    }

    /// Fire the acquisition at every node in parallel, each attempt capped by
    /// `node_timeout`. A slow, dead, or busy node is a per-node failure, not
    /// an abort of the round.
    async fn acquire_round(&self, name: &str, token: &str, ttl: Duration) -> Vec<Vote> {
        let attempts = self.nodes.iter().enumerate().map(|(index, node)| {
            let addr = node.addr().to_string();
            let rpc = tokio::time::timeout(self.node_timeout, node.acquire_lock(name, token, ttl));
            async move {
                match rpc.await {
                    Ok(Ok(AcquireOutcome::Acquired)) => Vote::Granted(index),
                    Ok(Ok(AcquireOutcome::Busy)) => Vote::Busy,
                    Ok(Err(e)) => {
                        warn!("lock {name}: node {addr} failed during acquisition: {e}");
                        Vote::Failed
                    }
                    Err(_) => {
                        warn!("lock {name}: node {addr} timed out during acquisition");
                        Vote::Failed
                    }
                }
            }
        });
        join_all(attempts).await
    }

    /// Compare-and-delete on every configured node with bounded retries.
    /// Issued against all nodes, not just the granted set: a node may have
    /// granted while its reply was lost.
    async fn release_everywhere(&self, name: &str, token: &str) {
        let tasks = self.nodes.iter().map(|node| async move {
            for _ in 0..self.release_attempts {
                match tokio::time::timeout(self.node_timeout, node.release_lock(name, token)).await
                {
                    Ok(Ok(_)) => return,
                    Ok(Err(e)) => {
                        debug!("lock {name}: release on {} failed: {e}", node.addr());
                    }
                    Err(_) => {
                        debug!("lock {name}: release on {} timed out", node.addr());
                    }
                }
            }
            warn!(
                "lock {name}: could not release on {}, TTL will clean up",
                node.addr()
            );
        });
        join_all(tasks).await;
    }
}

#[async_trait]
impl StockLock for QuorumLock {
    fn nodes(&self) -> &[Arc<dyn NodeCommands>] {
        &self.nodes
    }

    async fn acquire(&self, name: &str, ttl: Duration) -> LockAttempt {
        let token = fresh_token();
        let started = Instant::now();

        let votes = self.acquire_round(name, &token, ttl).await;

        let elapsed = started.elapsed();
        let validity = ttl
            .saturating_sub(elapsed)
            .saturating_sub(self.drift_allowance(ttl));

        let mut granted = Vec::new();
        let mut busy = 0usize;
        for vote in votes {
            match vote {
                Vote::Granted(index) => granted.push(index),
                Vote::Busy => busy += 1,
                Vote::Failed => {}
            }
        }

        let quorum = self.quorum();
        if granted.len() >= quorum && !validity.is_zero() {
            debug!(
                "lock {name}: held on {}/{} nodes, validity {} ms",
                granted.len(),
                self.nodes.len(),
                validity.as_millis()
            );
            return LockAttempt::Granted(LockGrant {
                name: name.to_string(),
                token,
                acquired_at: started,
                validity,
                granted_nodes: granted,
            });
        }

        // Not held. Purge whatever partial state this round created.
        self.release_everywhere(name, &token).await;

        if granted.len() + busy >= quorum {
            // A competing holder (or an overly slow round) explains the
            // misses; retrying after backoff can succeed.
            LockAttempt::Busy
        } else {
            LockAttempt::Unavailable
        }
    }

    async fn release(&self, grant: &LockGrant) {
        self.release_everywhere(&grant.name, &grant.token).await;
    }

    async fn extend(&self, grant: &mut LockGrant, new_ttl: Duration) -> bool {
        let name = grant.name.clone();
        let token = grant.token.clone();
        let refreshed_at = Instant::now();

        let tasks = self.nodes.iter().map(|node| {
            let rpc =
                tokio::time::timeout(self.node_timeout, node.extend_lock(&name, &token, new_ttl));
            async move { matches!(rpc.await, Ok(Ok(ExtendOutcome::Extended))) }
        });
        let refreshed = join_all(tasks).await.into_iter().filter(|ok| *ok).count();

        let validity = new_ttl
            .saturating_sub(refreshed_at.elapsed())
            .saturating_sub(self.drift_allowance(new_ttl));

        if refreshed >= self.quorum() && !validity.is_zero() {
            grant.acquired_at = refreshed_at;
            grant.validity = validity;
            true
        } else {
            warn!(
                "lock {name}: extend refreshed only {refreshed}/{} nodes",
                self.nodes.len()
            );
            false
        }
    }
}
