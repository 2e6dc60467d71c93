use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sellable product. Pricing is integer cents; the engine never does
/// floating-point money arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price_cents: u64,
}

impl Product {
    /// Total price for `quantity` units.
    pub fn total_cents(&self, quantity: u64) -> u64 {
        self.price_cents * quantity
    }
}

/// A recorded purchase. This is the durable row written transactionally with
/// the durable stock decrement, and doubles as the receipt handed back to
/// the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub purchase_id: u64,
    pub buyer: String,
    pub product_id: u64,
    pub quantity: u64,
    pub total_cents: u64,
    pub recorded_at: DateTime<Utc>,
}
