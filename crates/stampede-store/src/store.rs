use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Product, Receipt};

/// The transactional interface the reservation coordinator persists through.
/// The coordinator never writes durable state directly.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Resolve a product for pricing and existence checks.
    async fn get_product(&self, product_id: u64) -> Result<Product, StoreError>;

    /// Record a purchase and decrement the durable stock counter in one
    /// atomic unit. Refuses to drive the durable counter negative.
    async fn record_purchase(
        &self,
        buyer: &str,
        product_id: u64,
        quantity: u64,
        total_cents: u64,
    ) -> Result<Receipt, StoreError>;

    /// Remaining durable stock; the value reconciliation seeds caches from.
    async fn durable_stock(&self, product_id: u64) -> Result<u64, StoreError>;

    /// Set the durable stock counter. Used at provisioning.
    async fn seed_stock(&self, product_id: u64, quantity: u64) -> Result<(), StoreError>;
}
