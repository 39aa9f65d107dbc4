//! Perpetual-futures position engine and margin ledger.
//!
//! Risk-first core for a derivatives exchange backend: tracks every open
//! position, reprices them per symbol as reference marks tick, surfaces the
//! positions that crossed the liquidation threshold, and keeps the per-user
//! margin accounts coherent with the portfolio. Order matching, funding,
//! and persistence are external collaborators.

pub mod account;
pub mod bucket;
pub mod ids;
pub mod manager;
pub mod margin;
pub mod position;
pub mod tiers;
pub mod types;

pub use account::*;
pub use bucket::*;
pub use ids::*;
pub use manager::*;
pub use margin::*;
pub use position::*;
pub use tiers::*;
pub use types::*;
