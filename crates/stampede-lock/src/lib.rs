//! Lock primitives for the reservation engine.
//!
//! Two strategies implement the [`StockLock`] seam. [`SingleNodeLock`] is a
//! named mutex on one coordination node: create-if-absent with TTL, released
//! by compare-and-delete. [`QuorumLock`] is the Redlock construction: the
//! lock is held iff strictly more than half of N independent nodes grant the
//! single-node lock within a bounded window, and the remaining validity is
//! still positive after clock-drift compensation.
//!
//! Neither strategy blocks on contention. A busy lock is reported as
//! [`LockAttempt::Busy`] and retried with backoff by the coordinator.

pub mod grant;
pub mod quorum;
pub mod single;
pub mod strategy;
pub mod token;

pub use grant::{LockAttempt, LockGrant};
pub use quorum::QuorumLock;
pub use single::SingleNodeLock;
pub use strategy::{LockError, StockLock};
pub use token::fresh_token;
