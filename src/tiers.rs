//! Tiered maintenance-margin brackets.
//!
//! Maintenance margin is a step function of position notional: bigger
//! positions pay a higher maintenance rate and are allowed less leverage.
//! The table is small and fixed, so lookup is a linear scan from the
//! lowest bracket; the top bracket is open-ended.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginTier {
    pub min_notional: f64,
    pub max_notional: f64,
    pub maintenance_rate: f64,
    pub max_leverage: u32,
}

/// Default bracket table. Upper bounds are inclusive: a 50,000 USDT
/// position still sits in the 0.4% bracket.
pub const DEFAULT_MARGIN_TIERS: [MarginTier; 8] = [
    MarginTier { min_notional: 0.0, max_notional: 50_000.0, maintenance_rate: 0.004, max_leverage: 125 },
    MarginTier { min_notional: 50_000.0, max_notional: 250_000.0, maintenance_rate: 0.005, max_leverage: 100 },
    MarginTier { min_notional: 250_000.0, max_notional: 1_000_000.0, maintenance_rate: 0.01, max_leverage: 50 },
    MarginTier { min_notional: 1_000_000.0, max_notional: 5_000_000.0, maintenance_rate: 0.025, max_leverage: 20 },
    MarginTier { min_notional: 5_000_000.0, max_notional: 10_000_000.0, maintenance_rate: 0.05, max_leverage: 10 },
    MarginTier { min_notional: 10_000_000.0, max_notional: 20_000_000.0, maintenance_rate: 0.1, max_leverage: 5 },
    MarginTier { min_notional: 20_000_000.0, max_notional: 50_000_000.0, maintenance_rate: 0.125, max_leverage: 4 },
    MarginTier { min_notional: 50_000_000.0, max_notional: f64::INFINITY, maintenance_rate: 0.15, max_leverage: 3 },
];

/// Lowest bracket whose upper bound covers the notional.
pub fn tier_for(notional: f64, tiers: &[MarginTier]) -> Option<&MarginTier> {
    tiers.iter().find(|tier| notional <= tier.max_notional)
}

/// Maintenance margin for a notional under the given bracket table.
/// Returns 0 when the table is empty.
pub fn maintenance_margin(notional: f64, tiers: &[MarginTier]) -> f64 {
    tier_for(notional, tiers)
        .map(|tier| notional * tier.maintenance_rate)
        .unwrap_or(0.0)
}

/// Leverage cap for a notional; the deepest bracket's cap applies past
/// the table's end.
pub fn max_leverage_for(notional: f64, tiers: &[MarginTier]) -> u32 {
    tier_for(notional, tiers)
        .or_else(|| tiers.last())
        .map(|tier| tier.max_leverage)
        .unwrap_or(1)
}
