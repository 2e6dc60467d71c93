//! Persistence collaborator.
//!
//! The durable store is the ground truth for how much was actually sold.
//! Coordination-node counters are only the admission cache in front of it;
//! whenever the two disagree, reconciliation rewrites the cache from the
//! durable value, never the other way around.
//!
//! [`MemoryStore`] implements the [`PurchaseStore`] seam in-process with one
//! mutex as its transaction boundary, plus rate-based failure injection for
//! exercising the coordinator's compensation paths.

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::PurchaseStore;
pub use types::{Product, Receipt};
