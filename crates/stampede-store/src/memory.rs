use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use parking_lot::Mutex;
use rand::Rng;

use crate::error::StoreError;
use crate::store::PurchaseStore;
use crate::types::{Product, Receipt};

struct Inner {
    products: HashMap<u64, Product>,
    stock: HashMap<u64, u64>,
    purchases: Vec<Receipt>,
    next_purchase_id: u64,
    fail_rate: f64,
}

/// In-memory durable store. One mutex spans every call, so each call is one
/// atomic unit, which is the transactional contract `record_purchase` makes.
///
/// `set_failure_rate` makes a fraction of `record_purchase` calls fail with
/// `Unavailable` after no state change, for driving the coordinator's
/// compensation paths in tests.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner {
                products: HashMap::new(),
                stock: HashMap::new(),
                purchases: Vec::new(),
                next_purchase_id: 1,
                fail_rate: 0.0,
            }),
        }
    }

    /// Register a product with its initial durable stock.
    pub fn add_product(&self, product: Product, initial_stock: u64) {
        let mut inner = self.inner.lock();
        inner.stock.insert(product.id, initial_stock);
        inner.products.insert(product.id, product);
    }

    /// Fraction of `record_purchase` calls that fail with `Unavailable`.
    pub fn set_failure_rate(&self, rate: f64) {
        self.inner.lock().fail_rate = rate.clamp(0.0, 1.0);
    }

    /// All purchase rows, in commit order.
    pub fn purchases(&self) -> Vec<Receipt> {
        self.inner.lock().purchases.clone()
    }

    /// Units durably sold for one product.
    pub fn purchased_units(&self, product_id: u64) -> u64 {
        self.inner
            .lock()
            .purchases
            .iter()
            .filter(|r| r.product_id == product_id)
            .map(|r| r.quantity)
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn get_product(&self, product_id: u64) -> Result<Product, StoreError> {
        self.inner
            .lock()
            .products
            .get(&product_id)
            .cloned()
            .ok_or(StoreError::ProductNotFound { product_id })
    }

    async fn record_purchase(
        &self,
        buyer: &str,
        product_id: u64,
        quantity: u64,
        total_cents: u64,
    ) -> Result<Receipt, StoreError> {
        let mut inner = self.inner.lock();

        if inner.fail_rate > 0.0 && rand::thread_rng().gen::<f64>() < inner.fail_rate {
            return Err(StoreError::Unavailable {
                detail: "injected failure".to_string(),
            });
        }

        if !inner.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound { product_id });
        }

        let available = inner.stock.get(&product_id).copied().unwrap_or(0);
        if available < quantity {
            return Err(StoreError::StockConflict {
                product_id,
                available,
                requested: quantity,
            });
        }

        // Purchase row and durable decrement commit together or not at all;
        // the mutex is held across both.
        inner.stock.insert(product_id, available - quantity);
        let receipt = Receipt {
            purchase_id: inner.next_purchase_id,
            buyer: buyer.to_string(),
            product_id,
            quantity,
            total_cents,
            recorded_at: Utc::now(),
        };
        inner.next_purchase_id += 1;
        inner.purchases.push(receipt.clone());
        debug!(
            "recorded purchase {} for product {product_id}: {quantity} units",
            receipt.purchase_id
        );
        Ok(receipt)
    }

    async fn durable_stock(&self, product_id: u64) -> Result<u64, StoreError> {
        let inner = self.inner.lock();
        if !inner.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound { product_id });
        }
        Ok(inner.stock.get(&product_id).copied().unwrap_or(0))
    }

    async fn seed_stock(&self, product_id: u64, quantity: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.products.contains_key(&product_id) {
            return Err(StoreError::ProductNotFound { product_id });
        }
        inner.stock.insert(product_id, quantity);
        Ok(())
    }
}
