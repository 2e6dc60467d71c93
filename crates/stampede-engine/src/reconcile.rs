use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use stampede_lock::{LockAttempt, StockLock};
use stampede_node::NodeCommands;
use stampede_store::{PurchaseStore, StoreError};

use crate::coordinator::{lock_name, stock_key};

/// Why a product was queued for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileReason {
    /// Granted nodes disagreed about a decrement.
    DecrementDiverged,
    /// A compensating increment could not be delivered everywhere.
    CompensationFailed,
    /// A stock counter was missing from the admission cache.
    MissingCounter,
    /// A bundle stopped between items.
    PartialBundle,
}

/// A request to realign one product's node counters with durable stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileEvent {
    pub product_id: u64,
    pub reason: ReconcileReason,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The product lock could not be taken; run again later.
    #[error("product {product_id}: lock busy, reconciliation deferred")]
    Busy { product_id: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rewrites node counters from the durable counter, under the product lock.
///
/// Durable stock is the ground truth for how much was actually sold; the
/// node counters are only the admission cache. Reconciliation therefore
/// always copies durable → nodes and never the reverse. Holding the product
/// lock keeps in-flight reservations from interleaving with the overwrite.
pub struct Reconciler {
    lock: Arc<dyn StockLock>,
    store: Arc<dyn PurchaseStore>,
    lock_ttl: Duration,
}

impl Reconciler {
    pub fn new(
        lock: Arc<dyn StockLock>,
        store: Arc<dyn PurchaseStore>,
        lock_ttl: Duration,
    ) -> Self {
        Reconciler {
            lock,
            store,
            lock_ttl,
        }
    }

    /// Align every reachable node's counter for `product_id` with the
    /// durable value. Returns the durable value that was seeded.
    pub async fn reconcile(&self, product_id: u64) -> Result<u64, ReconcileError> {
        let name = lock_name(product_id);
        let grant = match self.lock.acquire(&name, self.lock_ttl).await {
            LockAttempt::Granted(grant) => grant,
            LockAttempt::Busy | LockAttempt::Unavailable => {
                return Err(ReconcileError::Busy { product_id });
            }
        };

        let result = self.seed_from_durable(product_id).await;
        self.lock.release(&grant).await;
        result
    }

    async fn seed_from_durable(&self, product_id: u64) -> Result<u64, ReconcileError> {
        let durable = self.store.durable_stock(product_id).await?;
        let key = stock_key(product_id);
        let mut unreachable = 0usize;
        for node in self.lock.nodes() {
            if let Err(e) = node.seed_stock(&key, durable).await {
                // A dead node rejoins with a stale counter; the next
                // reconciliation pass or reseed covers it.
                warn!("reconcile product {product_id}: node {} unreachable: {e}", node.addr());
                unreachable += 1;
            }
        }
        info!(
            "reconciled product {product_id} to durable stock {durable} \
             ({} of {} nodes)",
            self.lock.nodes().len() - unreachable,
            self.lock.nodes().len()
        );
        Ok(durable)
    }
}
