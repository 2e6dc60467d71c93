//! Reservation coordinator for flash-sale stock.
//!
//! The engine's one guarantee is exactly-stock: summed over all clients,
//! fulfilled purchase units never exceed the seeded stock, regardless of
//! concurrency, process crashes, or single-node failures in the coordination
//! layer. Per request it runs `acquire → decrement → persist → release` under
//! a product lock (single-node or quorum, per configuration), with a rollback
//! path for every failing step and a reconciliation queue for whatever a
//! rollback could not restore.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod retry;

pub use config::{ConfigError, EngineConfig};
pub use coordinator::{lock_name, stock_key, Reservation, ReservationEngine};
pub use error::ReserveError;
pub use metrics::{Metrics, MetricsSnapshot, ProductMetrics};
pub use reconcile::{ReconcileError, ReconcileEvent, ReconcileReason, Reconciler};
pub use retry::RetryPolicy;
