use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use stampede_lock::{LockAttempt, LockGrant, StockLock};
use stampede_node::{CompensateOutcome, DecrementOutcome, NodeCommands};
use stampede_store::{Product, PurchaseStore, Receipt, StoreError};

use crate::config::{ConfigError, EngineConfig};
use crate::error::ReserveError;
use crate::metrics::{add, bump, Metrics, ProductMetrics};
use crate::reconcile::{ReconcileEvent, ReconcileReason, Reconciler};

/// Compensation attempts per node before giving the key to reconciliation.
const COMPENSATE_ATTEMPTS: u32 = 3;

/// Admission-cache counter key for a product.
pub fn stock_key(product_id: u64) -> String {
    format!("stock:{product_id}")
}

/// Lock name guarding a product's stock.
pub fn lock_name(product_id: u64) -> String {
    format!("lock:stock:{product_id}")
}

/// A fulfilled reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub receipt: Receipt,
    pub product_id: u64,
    pub quantity: u64,
    /// How many coordination nodes granted the lock for this reservation.
    pub granted_nodes: usize,
}

/// Holds a lock grant and guarantees release on every exit path. The normal
/// path calls [`ReleaseGuard::release`]; if the future is cancelled or
/// panics first, `Drop` spawns the release instead, so the coordinator never
/// returns without triggering it.
struct ReleaseGuard {
    lock: Arc<dyn StockLock>,
    grant: Option<LockGrant>,
}

impl ReleaseGuard {
    fn arm(lock: Arc<dyn StockLock>, grant: LockGrant) -> Self {
        ReleaseGuard {
            lock,
            grant: Some(grant),
        }
    }

    async fn release(mut self) {
        if let Some(grant) = self.grant.take() {
            self.lock.release(&grant).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(grant) = self.grant.take() {
            let lock = Arc::clone(&self.lock);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        lock.release(&grant).await;
                    });
                }
                // No runtime left to run the release on; the TTL cleans up.
                Err(_) => warn!("lock {} dropped outside a runtime", grant.name),
            }
        }
    }
}

/// Per-round outcome of replaying the decrement across the granted nodes.
#[derive(Default)]
struct DecrementTally {
    /// Node indices whose decrement was confirmed applied.
    applied: Vec<usize>,
    insufficient: usize,
    missing: usize,
    /// RPC failures: possibly applied on the node, never compensated blindly.
    ambiguous: usize,
}

impl DecrementTally {
    fn diverged(&self) -> bool {
        self.insufficient + self.missing + self.ambiguous > 0
    }
}

/// The reservation coordinator.
///
/// Per request: acquire the product lock (single-node or quorum, per
/// configuration), replay the guarded decrement on the granted nodes,
/// persist the purchase through the collaborator, release the lock, and
/// roll back on every failure in between. The lock is released on success,
/// failure, panic, and cancellation alike.
pub struct ReservationEngine {
    lock: Arc<dyn StockLock>,
    store: Arc<dyn PurchaseStore>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
    pending: Mutex<VecDeque<ReconcileEvent>>,
}

impl ReservationEngine {
    pub fn new(
        lock: Arc<dyn StockLock>,
        store: Arc<dyn PurchaseStore>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ReservationEngine {
            lock,
            store,
            config,
            metrics: Arc::new(Metrics::new()),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mirror the durable stock value onto the durable store and every
    /// configured coordination node. Used at product provisioning.
    pub async fn seed_stock(&self, product_id: u64, quantity: u64) -> Result<(), ReserveError> {
        self.store
            .seed_stock(product_id, quantity)
            .await
            .map_err(|e| store_error(product_id, e))?;
        let key = stock_key(product_id);
        for node in self.lock.nodes() {
            if let Err(e) = node.seed_stock(&key, quantity).await {
                warn!("seeding product {product_id} on {} failed: {e}", node.addr());
                return Err(ReserveError::Unavailable);
            }
        }
        info!("seeded product {product_id} with {quantity} unit(s)");
        Ok(())
    }

    /// Reserve `quantity` units of `product_id` for `buyer`.
    pub async fn reserve(
        &self,
        product_id: u64,
        quantity: u64,
        buyer: &str,
    ) -> Result<Reservation, ReserveError> {
        if quantity == 0 {
            return Err(ReserveError::InvalidQuantity);
        }
        let product = self
            .store
            .get_product(product_id)
            .await
            .map_err(|e| store_error(product_id, e))?;

        let grant = self.acquire_with_retry(product_id).await?;
        let guard = ReleaseGuard::arm(Arc::clone(&self.lock), grant.clone());
        let result = self
            .critical_section(&product, quantity, buyer, &grant)
            .await;
        guard.release().await;
        result
    }

    /// Reserve several products in one purchase. Locks are taken in
    /// ascending product-id order and released in reverse, so concurrent
    /// bundles cannot deadlock; the overall trust window is the minimum of
    /// the per-lock validities.
    pub async fn reserve_bundle(
        &self,
        items: &[(u64, u64)],
        buyer: &str,
    ) -> Result<Vec<Reservation>, ReserveError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
        for &(product_id, quantity) in items {
            if quantity == 0 {
                return Err(ReserveError::InvalidQuantity);
            }
            *merged.entry(product_id).or_insert(0) += quantity;
        }

        let mut plan = Vec::with_capacity(merged.len());
        for (&product_id, &quantity) in &merged {
            let product = self
                .store
                .get_product(product_id)
                .await
                .map_err(|e| store_error(product_id, e))?;
            plan.push((product, quantity));
        }

        // BTreeMap iteration gave us ascending product ids: canonical order.
        let mut guards = Vec::with_capacity(plan.len());
        let mut grants = Vec::with_capacity(plan.len());
        for (product, _) in &plan {
            match self.acquire_with_retry(product.id).await {
                Ok(grant) => {
                    guards.push(ReleaseGuard::arm(Arc::clone(&self.lock), grant.clone()));
                    grants.push(grant);
                }
                Err(e) => {
                    release_reverse(guards).await;
                    return Err(e);
                }
            }
        }

        let result = self.bundle_critical_section(&plan, &grants, buyer).await;
        release_reverse(guards).await;
        result
    }

    /// Reconciliation requests emitted so far, in emission order.
    pub fn drain_reconcile_events(&self) -> Vec<ReconcileEvent> {
        self.pending.lock().drain(..).collect()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.lock),
            Arc::clone(&self.store),
            self.config.lock_ttl(),
        )
    }

    /// Run reconciliation for every queued event. Products whose lock is
    /// busy are re-queued for a later pass. Returns how many products were
    /// realigned.
    pub async fn reconcile_pending(&self) -> usize {
        let events = self.drain_reconcile_events();
        if events.is_empty() {
            return 0;
        }
        let reconciler = self.reconciler();
        let mut done = 0usize;
        let mut seen = Vec::new();
        for event in events {
            if seen.contains(&event.product_id) {
                continue;
            }
            seen.push(event.product_id);
            match reconciler.reconcile(event.product_id).await {
                Ok(_) => done += 1,
                Err(crate::reconcile::ReconcileError::Busy { .. }) => {
                    self.pending.lock().push_back(event);
                }
                Err(e) => error!("reconciliation of product {} failed: {e}", event.product_id),
            }
        }
        done
    }

    fn schedule_reconcile(&self, product_id: u64, reason: ReconcileReason) {
        debug!("scheduling reconciliation for product {product_id}: {reason:?}");
        self.pending.lock().push_back(ReconcileEvent { product_id, reason });
    }

    /// Grant count required for a decrement round to count as applied:
    /// strict majority of the configured node set (one node for the
    /// single-node strategy).
    fn required_majority(&self) -> usize {
        self.lock.nodes().len() / 2 + 1
    }

    fn within_safety(&self, grant: &LockGrant) -> bool {
        grant.remaining() > self.config.safety_margin()
    }

    async fn acquire_with_retry(&self, product_id: u64) -> Result<LockGrant, ReserveError> {
        let name = lock_name(product_id);
        let policy = self.config.retry_policy();
        let metrics = self.metrics.product(product_id);
        let mut attempt = 0u32;
        loop {
            match self.lock.acquire(&name, self.config.lock_ttl()).await {
                LockAttempt::Granted(grant) => return Ok(grant),
                LockAttempt::Busy => {
                    bump(&metrics.lock_contention);
                    attempt += 1;
                    if attempt >= policy.max_retries {
                        bump(&metrics.busy);
                        return Err(ReserveError::Busy);
                    }
                    tokio::time::sleep(policy.delay(attempt - 1)).await;
                }
                LockAttempt::Unavailable => return Err(ReserveError::Unavailable),
            }
        }
    }

    async fn critical_section(
        &self,
        product: &Product,
        quantity: u64,
        buyer: &str,
        grant: &LockGrant,
    ) -> Result<Reservation, ReserveError> {
        let product_id = product.id;
        let metrics = self.metrics.product(product_id);
        let key = stock_key(product_id);

        if !self.within_safety(grant) {
            bump(&metrics.busy);
            return Err(ReserveError::Busy);
        }

        let tally = self.replay_decrement(&key, quantity, grant).await;
        let majority = self.required_majority();

        if tally.applied.len() < majority {
            let err = self.classify_failed_decrement(product_id, quantity, &tally, &metrics);
            self.undo_decrements(product_id, &key, quantity, &tally.applied)
                .await;
            return Err(err);
        }

        if tally.diverged() {
            warn!(
                "product {product_id}: decrement diverged \
                 (applied {}, insufficient {}, missing {}, ambiguous {})",
                tally.applied.len(),
                tally.insufficient,
                tally.missing,
                tally.ambiguous
            );
            self.schedule_reconcile(product_id, ReconcileReason::DecrementDiverged);
        }

        // The lock may expire while we sit here; a purchase written past the
        // deadline could race the next holder, so abort and roll back first.
        if !self.within_safety(grant) {
            warn!("product {product_id}: validity exhausted before persist, rolling back");
            let rolled = self
                .undo_decrements(product_id, &key, quantity, &tally.applied)
                .await;
            return Err(if rolled {
                bump(&metrics.busy);
                ReserveError::Busy
            } else {
                bump(&metrics.inconsistencies);
                ReserveError::Inconsistent { product_id }
            });
        }

        match self
            .store
            .record_purchase(buyer, product_id, quantity, product.total_cents(quantity))
            .await
        {
            Ok(receipt) => {
                bump(&metrics.reserved);
                add(&metrics.units, quantity);
                info!(
                    "reserved {quantity} unit(s) of product {product_id} for {buyer} \
                     (purchase {})",
                    receipt.purchase_id
                );
                Ok(Reservation {
                    receipt,
                    product_id,
                    quantity,
                    granted_nodes: grant.granted_nodes.len(),
                })
            }
            Err(e) => {
                error!("product {product_id}: persistence failed, compensating: {e}");
                self.undo_decrements(product_id, &key, quantity, &tally.applied)
                    .await;
                Err(store_error(product_id, e))
            }
        }
    }

    async fn bundle_critical_section(
        &self,
        plan: &[(Product, u64)],
        grants: &[LockGrant],
        buyer: &str,
    ) -> Result<Vec<Reservation>, ReserveError> {
        let within_all =
            |grants: &[LockGrant]| grants.iter().all(|g| self.within_safety(g));

        // Stage one: admit every item before persisting any, so a refusal
        // rolls back without touching durable state.
        let mut admitted: Vec<Vec<usize>> = Vec::with_capacity(plan.len());
        for (item, ((product, quantity), grant)) in plan.iter().zip(grants).enumerate() {
            let key = stock_key(product.id);
            if !within_all(grants) {
                self.undo_bundle(plan, &admitted).await;
                bump(&self.metrics.product(product.id).busy);
                return Err(ReserveError::Busy);
            }
            let tally = self.replay_decrement(&key, *quantity, grant).await;
            if tally.applied.len() < self.required_majority() {
                let metrics = self.metrics.product(product.id);
                let err =
                    self.classify_failed_decrement(product.id, *quantity, &tally, &metrics);
                self.undo_decrements(product.id, &key, *quantity, &tally.applied)
                    .await;
                self.undo_bundle(plan, &admitted).await;
                return Err(err);
            }
            if tally.diverged() {
                self.schedule_reconcile(product.id, ReconcileReason::DecrementDiverged);
            }
            admitted.push(tally.applied);
            debug!("bundle item {item}: admitted product {}", product.id);
        }

        // Stage two: persist item by item. Receipts already written are
        // durable truth and stand; everything not yet persisted is rolled
        // back if a write fails.
        let mut reservations = Vec::with_capacity(plan.len());
        for (item, (product, quantity)) in plan.iter().enumerate() {
            if !within_all(grants) {
                self.undo_bundle(&plan[item..], &admitted[item..]).await;
                return Err(if reservations.is_empty() {
                    bump(&self.metrics.product(product.id).busy);
                    ReserveError::Busy
                } else {
                    self.schedule_reconcile(product.id, ReconcileReason::PartialBundle);
                    ReserveError::BundleInterrupted {
                        product_id: product.id,
                        detail: "lock validity exhausted".to_string(),
                    }
                });
            }
            match self
                .store
                .record_purchase(buyer, product.id, *quantity, product.total_cents(*quantity))
                .await
            {
                Ok(receipt) => {
                    let metrics = self.metrics.product(product.id);
                    bump(&metrics.reserved);
                    add(&metrics.units, *quantity);
                    reservations.push(Reservation {
                        receipt,
                        product_id: product.id,
                        quantity: *quantity,
                        granted_nodes: grants[item].granted_nodes.len(),
                    });
                }
                Err(e) => {
                    error!("bundle: persistence failed for product {}: {e}", product.id);
                    self.undo_bundle(&plan[item..], &admitted[item..]).await;
                    return Err(if reservations.is_empty() {
                        store_error(product.id, e)
                    } else {
                        self.schedule_reconcile(product.id, ReconcileReason::PartialBundle);
                        ReserveError::BundleInterrupted {
                            product_id: product.id,
                            detail: e.to_string(),
                        }
                    });
                }
            }
        }

        Ok(reservations)
    }

    /// Compensate the admitted decrements of several bundle items.
    async fn undo_bundle(&self, plan: &[(Product, u64)], admitted: &[Vec<usize>]) {
        for ((product, quantity), applied) in plan.iter().zip(admitted) {
            self.undo_decrements(product.id, &stock_key(product.id), *quantity, applied)
                .await;
        }
    }

    fn classify_failed_decrement(
        &self,
        product_id: u64,
        quantity: u64,
        tally: &DecrementTally,
        metrics: &ProductMetrics,
    ) -> ReserveError {
        let majority = self.required_majority();
        if tally.insufficient >= majority {
            bump(&metrics.insufficient);
            ReserveError::InsufficientStock {
                product_id,
                requested: quantity,
            }
        } else if tally.missing >= majority {
            bump(&metrics.inconsistencies);
            self.schedule_reconcile(product_id, ReconcileReason::MissingCounter);
            ReserveError::Inconsistent { product_id }
        } else {
            bump(&metrics.inconsistencies);
            self.schedule_reconcile(product_id, ReconcileReason::DecrementDiverged);
            ReserveError::Inconsistent { product_id }
        }
    }

    /// Replay the guarded decrement on every node that granted the lock.
    async fn replay_decrement(
        &self,
        key: &str,
        quantity: u64,
        grant: &LockGrant,
    ) -> DecrementTally {
        let nodes = self.lock.nodes();
        let timeout = self.config.node_timeout();
        let attempts = grant.granted_nodes.iter().map(|&index| {
            let node = &nodes[index];
            let addr = node.addr().to_string();
            let rpc = tokio::time::timeout(timeout, node.try_decrement(key, quantity));
            async move {
                match rpc.await {
                    Ok(Ok(outcome)) => (index, Some(outcome)),
                    Ok(Err(e)) => {
                        warn!("decrement of {key} on {addr} failed: {e}");
                        (index, None)
                    }
                    Err(_) => {
                        warn!("decrement of {key} on {addr} timed out");
                        (index, None)
                    }
                }
            }
        });

        let mut tally = DecrementTally::default();
        for (index, outcome) in join_all(attempts).await {
            match outcome {
                Some(DecrementOutcome::Applied { .. }) => tally.applied.push(index),
                Some(DecrementOutcome::Insufficient { .. }) => tally.insufficient += 1,
                Some(DecrementOutcome::Missing) => tally.missing += 1,
                None => tally.ambiguous += 1,
            }
        }
        tally
    }

    /// Compensate confirmed decrements, scheduling reconciliation if any
    /// compensation cannot be delivered. Returns true when every node was
    /// restored.
    async fn undo_decrements(
        &self,
        product_id: u64,
        key: &str,
        quantity: u64,
        applied: &[usize],
    ) -> bool {
        if applied.is_empty() {
            return true;
        }
        let metrics = self.metrics.product(product_id);
        add(&metrics.compensations, applied.len() as u64);

        let nodes = self.lock.nodes();
        let timeout = self.config.node_timeout();
        let tasks = applied.iter().map(|&index| {
            let node = &nodes[index];
            async move {
                for _ in 0..COMPENSATE_ATTEMPTS {
                    match tokio::time::timeout(timeout, node.compensate(key, quantity)).await {
                        Ok(Ok(CompensateOutcome::Applied { .. })) => return true,
                        Ok(Ok(CompensateOutcome::Missing)) => {
                            // Counter vanished; nothing to restore here, the
                            // reconciler reseeds it from durable stock.
                            warn!("compensation of {key} on {}: counter missing", node.addr());
                            return false;
                        }
                        Ok(Err(e)) => {
                            warn!("compensation of {key} on {} failed: {e}", node.addr())
                        }
                        Err(_) => warn!("compensation of {key} on {} timed out", node.addr()),
                    }
                }
                false
            }
        });

        let all_restored = join_all(tasks).await.into_iter().all(|ok| ok);
        if !all_restored {
            self.schedule_reconcile(product_id, ReconcileReason::CompensationFailed);
        }
        all_restored
    }
}

async fn release_reverse(guards: Vec<ReleaseGuard>) {
    for guard in guards.into_iter().rev() {
        guard.release().await;
    }
}

fn store_error(product_id: u64, e: StoreError) -> ReserveError {
    match e {
        StoreError::ProductNotFound { .. } => ReserveError::NotFound { product_id },
        other => ReserveError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stampede_lock::SingleNodeLock;
    use stampede_node::{MemoryNode, NodeCommands};
    use stampede_store::MemoryStore;

    fn config() -> EngineConfig {
        EngineConfig {
            nodes: vec!["mem-0".to_string()],
            lock_ttl_ms: 2_000,
            node_timeout_ms: 100,
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            safety_margin_ms: 50,
            ..EngineConfig::default()
        }
    }

    fn single_node_engine(stock: u64) -> (Arc<MemoryNode>, Arc<MemoryStore>, ReservationEngine) {
        let node = Arc::new(MemoryNode::new("mem-0"));
        let store = Arc::new(MemoryStore::new());
        store.add_product(
            Product {
                id: 1,
                name: "widget".to_string(),
                price_cents: 500,
            },
            stock,
        );
        let lock = Arc::new(SingleNodeLock::new(
            Arc::clone(&node) as Arc<dyn NodeCommands>
        ));
        let engine = ReservationEngine::new(
            lock,
            Arc::clone(&store) as Arc<dyn PurchaseStore>,
            config(),
        )
        .unwrap();
        (node, store, engine)
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_before_any_io() {
        let (_, _, engine) = single_node_engine(10);
        assert_eq!(
            engine.reserve(1, 0, "alice").await.unwrap_err(),
            ReserveError::InvalidQuantity
        );
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let (_, _, engine) = single_node_engine(10);
        assert_eq!(
            engine.reserve(99, 1, "alice").await.unwrap_err(),
            ReserveError::NotFound { product_id: 99 }
        );
    }

    #[tokio::test]
    async fn successful_reserve_updates_both_counters_and_releases() {
        let (node, store, engine) = single_node_engine(10);
        node.seed_stock(&stock_key(1), 10).await.unwrap();

        let reservation = engine.reserve(1, 3, "alice").await.unwrap();
        assert_eq!(reservation.quantity, 3);
        assert_eq!(reservation.receipt.total_cents, 1_500);
        assert_eq!(node.stock(&stock_key(1)), Some(7));
        assert_eq!(store.durable_stock(1).await.unwrap(), 7);
        // Lock released: the next reservation proceeds without contention.
        assert_eq!(node.lock_holder(&lock_name(1)), None);
        assert_eq!(engine.metrics().snapshot(1).reserved, 1);
    }

    #[tokio::test]
    async fn insufficient_stock_changes_nothing() {
        let (node, store, engine) = single_node_engine(2);
        node.seed_stock(&stock_key(1), 2).await.unwrap();

        let err = engine.reserve(1, 3, "alice").await.unwrap_err();
        assert_eq!(
            err,
            ReserveError::InsufficientStock {
                product_id: 1,
                requested: 3
            }
        );
        assert_eq!(node.stock(&stock_key(1)), Some(2));
        assert_eq!(store.purchases().len(), 0);
        assert_eq!(node.lock_holder(&lock_name(1)), None);
    }

    #[tokio::test]
    async fn missing_counter_is_inconsistent_not_insufficient() {
        let (node, _, engine) = single_node_engine(5);
        // Admission cache never seeded.
        let err = engine.reserve(1, 1, "alice").await.unwrap_err();
        assert_eq!(err, ReserveError::Inconsistent { product_id: 1 });
        let events = engine.drain_reconcile_events();
        assert!(events
            .iter()
            .any(|e| e.reason == ReconcileReason::MissingCounter));
        assert_eq!(node.lock_holder(&lock_name(1)), None);
    }

    #[tokio::test]
    async fn contended_lock_exhausts_retries_to_busy() {
        let (node, _, engine) = single_node_engine(5);
        node.seed_stock(&stock_key(1), 5).await.unwrap();
        // A rival holds the product lock for longer than the retry budget.
        node.acquire_lock(&lock_name(1), "rival", Duration::from_secs(30))
            .await
            .unwrap();

        let err = engine.reserve(1, 1, "alice").await.unwrap_err();
        assert_eq!(err, ReserveError::Busy);
        assert!(engine.metrics().snapshot(1).lock_contention >= 3);
        // The rival's lock is untouched.
        assert_eq!(node.lock_holder(&lock_name(1)).as_deref(), Some("rival"));
    }

    #[tokio::test]
    async fn unreachable_node_is_unavailable() {
        let (node, _, engine) = single_node_engine(5);
        node.set_online(false);
        assert_eq!(
            engine.reserve(1, 1, "alice").await.unwrap_err(),
            ReserveError::Unavailable
        );
    }

    #[tokio::test]
    async fn persistence_failure_compensates_the_cache() {
        let (node, store, engine) = single_node_engine(5);
        node.seed_stock(&stock_key(1), 5).await.unwrap();
        store.set_failure_rate(1.0);

        let err = engine.reserve(1, 2, "alice").await.unwrap_err();
        assert!(matches!(err, ReserveError::Store(_)));
        // The decrement was rolled back and nothing was sold.
        assert_eq!(node.stock(&stock_key(1)), Some(5));
        assert_eq!(store.durable_stock(1).await.unwrap(), 5);
        assert_eq!(store.purchases().len(), 0);
        assert_eq!(engine.metrics().snapshot(1).compensations, 1);
    }

    #[tokio::test]
    async fn seed_stock_mirrors_durable_onto_nodes() {
        let (node, store, engine) = single_node_engine(0);
        engine.seed_stock(1, 40).await.unwrap();
        assert_eq!(store.durable_stock(1).await.unwrap(), 40);
        assert_eq!(node.stock(&stock_key(1)), Some(40));
    }

    #[tokio::test]
    async fn bundle_locks_in_ascending_order_and_sells_all_or_rolls_back() {
        let node = Arc::new(MemoryNode::new("mem-0"));
        let store = Arc::new(MemoryStore::new());
        for id in [3u64, 1, 2] {
            store.add_product(
                Product {
                    id,
                    name: format!("product-{id}"),
                    price_cents: 100 * id,
                },
                10,
            );
        }
        let lock = Arc::new(SingleNodeLock::new(
            Arc::clone(&node) as Arc<dyn NodeCommands>
        ));
        let engine = ReservationEngine::new(
            lock,
            Arc::clone(&store) as Arc<dyn PurchaseStore>,
            config(),
        )
        .unwrap();
        for id in 1..=3u64 {
            engine.seed_stock(id, 10).await.unwrap();
        }

        // Duplicates merge; items arrive unsorted.
        let reservations = engine
            .reserve_bundle(&[(3, 1), (1, 2), (3, 1)], "alice")
            .await
            .unwrap();
        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations[0].product_id, 1);
        assert_eq!(reservations[1].product_id, 3);
        assert_eq!(reservations[1].quantity, 2);
        assert_eq!(node.stock(&stock_key(3)), Some(8));

        // A refused item rolls the whole bundle back.
        let err = engine
            .reserve_bundle(&[(1, 1), (2, 99)], "bob")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReserveError::InsufficientStock {
                product_id: 2,
                requested: 99
            }
        );
        assert_eq!(node.stock(&stock_key(1)), Some(8));
        assert_eq!(node.stock(&stock_key(2)), Some(10));
        for id in 1..=3u64 {
            assert_eq!(node.lock_holder(&lock_name(id)), None);
        }
    }
}
