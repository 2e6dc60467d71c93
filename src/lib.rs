//! stampede: a stock-reservation engine for flash sales.
//!
//! Facade over the workspace crates. The one guarantee is exactly-stock:
//! given an initial stock N, fulfilled purchase units summed over all
//! clients never exceed N, under any concurrency, process crash, or
//! single-node failure in the coordination layer.
//!
//! [`connect_engine`] wires an [`EngineConfig`] to real Redis coordination
//! nodes and produces a ready [`ReservationEngine`]; tests and simulations
//! assemble the same engine over in-memory backends instead.

use std::sync::Arc;

use thiserror::Error;

pub use stampede_engine::{
    lock_name, stock_key, ConfigError, EngineConfig, Metrics, MetricsSnapshot, ReconcileEvent,
    ReconcileReason, Reconciler, Reservation, ReservationEngine, ReserveError, RetryPolicy,
};
pub use stampede_lock::{
    fresh_token, LockAttempt, LockGrant, QuorumLock, SingleNodeLock, StockLock,
};
pub use stampede_node::{
    AcquireOutcome, CompensateOutcome, DecrementOutcome, ExtendOutcome, MemoryNode,
    NodeCommands, NodeError, RedisNode, ReleaseOutcome,
};
pub use stampede_store::{MemoryStore, Product, PurchaseStore, Receipt, StoreError};

/// Errors while assembling an engine from configuration.
#[derive(Debug, Error)]
pub enum EngineBuildError {
    #[error(transparent)]
    Config(#[from] stampede_engine::ConfigError),

    #[error(transparent)]
    Node(#[from] stampede_node::NodeError),

    #[error(transparent)]
    Lock(#[from] stampede_lock::LockError),
}

/// Connect to the configured coordination nodes and assemble the engine
/// with the configured locking strategy.
pub async fn connect_engine(
    config: EngineConfig,
    store: Arc<dyn PurchaseStore>,
) -> Result<ReservationEngine, EngineBuildError> {
    config.validate()?;

    let mut nodes: Vec<Arc<dyn NodeCommands>> = Vec::with_capacity(config.nodes.len());
    for addr in &config.nodes {
        let node = RedisNode::connect(addr, config.node_timeout()).await?;
        nodes.push(Arc::new(node));
    }

    let lock: Arc<dyn StockLock> = if config.use_quorum {
        Arc::new(
            QuorumLock::new(nodes, config.node_timeout())?
                .with_drift(config.drift_factor, config.drift_floor()),
        )
    } else {
        Arc::new(SingleNodeLock::new(Arc::clone(&nodes[0])))
    };

    Ok(ReservationEngine::new(lock, store, config)?)
}
