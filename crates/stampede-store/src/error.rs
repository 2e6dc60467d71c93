use thiserror::Error;

/// Errors from the durable store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("product {product_id} not found")]
    ProductNotFound { product_id: u64 },

    /// The durable counter would go negative. Under a correctly held lock
    /// this cannot happen; seeing it means the admission cache let too much
    /// through and the purchase must not be recorded.
    #[error("product {product_id}: durable stock {available} cannot cover {requested}")]
    StockConflict {
        product_id: u64,
        available: u64,
        requested: u64,
    },

    #[error("store unavailable: {detail}")]
    Unavailable { detail: String },
}
