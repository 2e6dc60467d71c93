//! Coordination-node client layer.
//!
//! A coordination node is an independent server holding two kinds of state
//! for the reservation engine: non-negative stock counters mutated only
//! through server-side guarded scripts, and lock records written with
//! create-if-absent semantics and removed by compare-and-delete. Nodes are
//! deliberately unreplicated; the quorum lock layer builds its majority on
//! top of a set of them.
//!
//! Two backends implement the [`NodeCommands`] seam: [`RedisNode`] speaks to
//! a real Redis server via Lua scripts, and [`MemoryNode`] provides the same
//! semantics in-process for tests and simulations.

pub mod commands;
pub mod error;
pub mod memory;
pub mod outcome;
pub mod redis_node;

pub use commands::NodeCommands;
pub use error::NodeError;
pub use memory::MemoryNode;
pub use outcome::{
    AcquireOutcome, CompensateOutcome, DecrementOutcome, ExtendOutcome, ReleaseOutcome,
};
pub use redis_node::RedisNode;
