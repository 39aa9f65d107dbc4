//! Opaque id minting for positions and orders.
//!
//! Ids are prefixed UUIDs without dashes so they stay greppable in logs
//! and unambiguous across entity kinds.

use uuid::Uuid;

fn generate(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Mint a position id (`pos_…`).
pub fn generate_position_id() -> String {
    generate("pos")
}

/// Mint an order id (`ord_…`).
pub fn generate_order_id() -> String {
    generate("ord")
}
