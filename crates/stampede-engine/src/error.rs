use thiserror::Error;

use stampede_store::StoreError;

/// Failure taxonomy of the reservation coordinator.
///
/// Modeled as a sum type on purpose: upstream handling differs per variant
/// (`Busy` and `Inconsistent` are retryable, `InsufficientStock` is terminal
/// for the item, `Unavailable` is a service-level failure), and collapsing
/// variants into one code is how misclassification bugs start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReserveError {
    /// Unknown product.
    #[error("product {product_id} not found")]
    NotFound { product_id: u64 },

    /// Stock observed below the requested quantity. Terminal for this item.
    #[error("product {product_id}: insufficient stock for {requested} unit(s)")]
    InsufficientStock { product_id: u64, requested: u64 },

    /// Requested quantity was zero.
    #[error("requested quantity must be positive")]
    InvalidQuantity,

    /// The product lock could not be acquired within the retry budget, or
    /// the critical section ran out of validity before changing any durable
    /// state. No state changed; retrying is reasonable.
    #[error("product lock busy, retry later")]
    Busy,

    /// Cross-node state diverged and could not be fully rolled back.
    /// Reconciliation has been scheduled; retry after a short delay.
    #[error("product {product_id}: inconsistent coordination state, reconciliation scheduled")]
    Inconsistent { product_id: u64 },

    /// The coordination layer cannot form a quorum (or the only node is
    /// unreachable).
    #[error("coordination nodes unavailable")]
    Unavailable,

    /// Pass-through from the authentication collaborator.
    #[error("caller not authorized")]
    Unauthorized,

    /// The persistence collaborator failed after stock had been reserved;
    /// the reservation was rolled back and the underlying error surfaced.
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),

    /// A bundle stopped after some items were durably purchased. The
    /// completed receipts stand (durable truth); the remaining items were
    /// rolled back and reconciliation covers any residue.
    #[error("bundle interrupted at product {product_id}: {detail}")]
    BundleInterrupted { product_id: u64, detail: String },
}

impl ReserveError {
    /// Whether a client may usefully retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(self, ReserveError::Busy | ReserveError::Inconsistent { .. })
    }
}
