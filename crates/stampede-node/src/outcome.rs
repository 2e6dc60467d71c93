use serde::{Deserialize, Serialize};

/// Result of a guarded decrement on a stock counter.
///
/// `Missing` and `Insufficient` are distinct on purpose: an absent counter
/// means the admission cache was never seeded (or was wiped) and must go to
/// reconciliation, while an insufficient counter is the normal sold-out
/// answer. Collapsing the two turns a cache wipe into a silent sell stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecrementOutcome {
    /// Counter held enough stock; it was decremented to `remaining`.
    Applied { remaining: u64 },

    /// Counter exists but holds fewer units than requested; left untouched.
    Insufficient { available: u64 },

    /// Counter does not exist on this node.
    Missing,
}

/// Result of a compensating increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensateOutcome {
    /// Counter was incremented back to `stock`.
    Applied { stock: u64 },

    /// Counter does not exist; nothing was created.
    Missing,
}

/// Result of a create-if-absent lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireOutcome {
    /// The lock record was created with this caller's token.
    Acquired,

    /// Another holder's unexpired record is present.
    Busy,
}

/// Result of a compare-and-delete release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    /// The record matched the token and was removed.
    Released,

    /// No record, or a record with a different token. Nothing was deleted.
    NotHeld,
}

/// Result of a compare-and-refresh TTL extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendOutcome {
    /// The record matched the token and its expiry was refreshed.
    Extended,

    /// No record, or a record with a different token.
    NotHeld,
}
