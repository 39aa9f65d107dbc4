//! Property-based tests for the position and ledger invariants.
//!
//! These verify the quantified invariants hold under random inputs, not
//! just the hand-picked scenario values.

use perps_risk::*;
use proptest::prelude::*;

// Strategies keep values on a cent/sub-unit grid so tolerances stay
// meaningful under f64 arithmetic.
fn price_strategy() -> impl Strategy<Value = f64> {
    (100i64..10_000_000i64).prop_map(|cents| cents as f64 / 100.0) // $1 to $100k
}

fn size_strategy() -> impl Strategy<Value = f64> {
    (1i64..1_000_000i64).prop_map(|units| units as f64 / 10_000.0) // 0.0001 to 100
}

fn leverage_strategy() -> impl Strategy<Value = u32> {
    1u32..=125u32
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

fn open_position(side: Side, price: f64, size: f64, leverage: u32) -> Position {
    let mut position = Position::new("prop_user", "BTCUSDT", MarginMode::Isolated, None);
    position.open(side, price, size, leverage).unwrap();
    position
}

proptest! {
    /// Conservation of PnL: realized pnl equals the sum of per-exit deltas
    /// against the entry price in effect at each exit.
    #[test]
    fn realized_pnl_is_conserved(
        side in side_strategy(),
        open_price in price_strategy(),
        open_size in size_strategy(),
        adds in prop::collection::vec((price_strategy(), size_strategy()), 0..3),
        exit_prices in prop::collection::vec(price_strategy(), 1..4),
    ) {
        let mut position = open_position(side, open_price, open_size, 10);
        let mut expected = 0.0;

        for (price, size) in &adds {
            position.add(*price, *size).unwrap();
        }

        // close out in equal chunks at the generated exit prices, last
        // chunk takes the remainder
        let chunks = exit_prices.len();
        let chunk_size = position.size / chunks as f64;
        for (i, exit) in exit_prices.iter().enumerate() {
            let size = if i + 1 == chunks { position.size } else { chunk_size };
            if size <= position.zero_size() {
                break;
            }
            expected += side.sign() * (exit - position.entry_price) * size;
            position.reduce(*exit, size).unwrap();
        }

        let tolerance = (open_size + adds.iter().map(|(_, s)| s).sum::<f64>()) * 0.01 + 1e-6;
        prop_assert!((position.realized_pnl - expected).abs() <= tolerance,
            "realized {} vs expected {}", position.realized_pnl, expected);
        prop_assert_eq!(position.status, PositionStatus::Closed);
    }

    /// Liquidation-price monotonicity: growing the size (entry, leverage,
    /// side fixed) never moves the liquidation price farther from entry.
    #[test]
    fn liquidation_distance_shrinks_with_size(
        side in side_strategy(),
        entry in price_strategy(),
        leverage in leverage_strategy(),
        small in size_strategy(),
        growth in size_strategy(),
    ) {
        let small_pos = open_position(side, entry, small, leverage);
        let large_pos = open_position(side, entry, small + growth, leverage);

        // signed distance from entry toward the liquidation threshold
        let small_buffer = side.sign() * (entry - small_pos.liquidation_price);
        let large_buffer = side.sign() * (entry - large_pos.liquidation_price);

        prop_assert!(large_buffer <= small_buffer + 1e-6,
            "buffer grew with size: {} -> {}", small_buffer, large_buffer);
    }

    /// Margin identity: initial margin is exactly entry * size / leverage
    /// after any open or add.
    #[test]
    fn initial_margin_identity(
        side in side_strategy(),
        open_price in price_strategy(),
        open_size in size_strategy(),
        leverage in leverage_strategy(),
        add_price in price_strategy(),
        add_size in size_strategy(),
    ) {
        let mut position = open_position(side, open_price, open_size, leverage);
        let expected = position.entry_price * position.size / f64::from(leverage);
        prop_assert!((position.initial_margin - expected).abs() <= expected.abs() * 1e-12);

        position.add(add_price, add_size).unwrap();
        let expected = position.entry_price * position.size / f64::from(leverage);
        prop_assert!((position.initial_margin - expected).abs() <= expected.abs() * 1e-12);
    }

    /// Closed-is-zero: a fully reduced position zeroes size, margins, and
    /// position value.
    #[test]
    fn closed_position_is_zeroed(
        side in side_strategy(),
        open_price in price_strategy(),
        open_size in size_strategy(),
        leverage in leverage_strategy(),
        exit_price in price_strategy(),
    ) {
        let mut position = open_position(side, open_price, open_size, leverage);
        position.close(exit_price).unwrap();

        prop_assert_eq!(position.status, PositionStatus::Closed);
        prop_assert_eq!(position.size, 0.0);
        prop_assert_eq!(position.initial_margin, 0.0);
        prop_assert_eq!(position.maintenance_margin, 0.0);
        prop_assert_eq!(position.position_value, 0.0);
        // entry survives for audit
        prop_assert_eq!(position.entry_price, open_price);
    }

    /// Bucket consistency: after a repricing sweep, survivors are Normal
    /// and safe; everything returned is Liquidating.
    #[test]
    fn bucket_sweep_partitions_cleanly(
        leverages in prop::collection::vec(leverage_strategy(), 1..12),
        entry in price_strategy(),
        mark in price_strategy(),
    ) {
        let bucket = PositionBucket::new(SymbolSpec::new("BTCUSDT"));
        for (i, leverage) in leverages.iter().enumerate() {
            let mut position = Position::new(
                &format!("user_{i}"),
                "BTCUSDT",
                MarginMode::Isolated,
                None,
            );
            position.open(Side::Long, entry, 1.0, *leverage).unwrap();
            bucket.append(position);
        }

        let liquidating = bucket.update_mark_price(mark);

        for position in &liquidating {
            prop_assert_eq!(position.status, PositionStatus::Liquidating);
        }
        for position in bucket.snapshot_all() {
            prop_assert_eq!(position.status, PositionStatus::Normal);
            prop_assert!(!position.is_liquidatable());
        }
        prop_assert_eq!(liquidating.len() + bucket.len(), leverages.len());
    }

    /// Ledger non-negativity: available, frozen, position margin, and order
    /// margin never go below zero, whatever the operation mix.
    #[test]
    fn ledger_fields_stay_non_negative(
        ops in prop::collection::vec((0u8..5u8, (1i64..10_000_000i64)), 1..40),
    ) {
        let account = MarginAccount::new("prop_user");

        for (op, raw) in ops {
            let amount = raw as f64 / 100.0;
            match op {
                0 => { let _ = account.deposit(amount); }
                1 => { let _ = account.withdraw(amount); }
                2 => { let _ = account.freeze_order_margin(amount); }
                3 => { let _ = account.unfreeze_order_margin(amount); }
                _ => account.update_margin_and_pnl(amount, -amount / 2.0),
            }

            let summary = account.summary();
            prop_assert!(summary.available_balance >= 0.0);
            prop_assert!(summary.frozen_balance >= 0.0);
            prop_assert!(summary.position_margin >= 0.0);
            prop_assert!(summary.order_margin >= 0.0);
        }
    }

    /// Freeze/unfreeze inverse: a matched pair restores the prior balances.
    #[test]
    fn freeze_unfreeze_round_trip(
        funding in (100i64..10_000_000i64).prop_map(|c| c as f64 / 100.0),
        fraction in 1u32..=100u32,
    ) {
        let account = MarginAccount::new("prop_user");
        account.deposit(funding).unwrap();

        let amount = funding * f64::from(fraction) / 100.0;
        let before = account.summary();

        account.freeze_order_margin(amount).unwrap();
        account.unfreeze_order_margin(amount).unwrap();

        let after = account.summary();
        prop_assert_eq!(after.balance, before.balance);
        // subtract-then-add may differ by an ulp; that is inside epsilon
        prop_assert!((after.available_balance - before.available_balance).abs() < 1e-9);
        prop_assert_eq!(after.frozen_balance, before.frozen_balance);
        prop_assert_eq!(after.order_margin, before.order_margin);
    }

    /// Tier lookup is total and monotone: every notional lands in a bracket
    /// and the rate never decreases as notional grows.
    #[test]
    fn tier_lookup_total_and_monotone(
        notional_a in (1i64..10_000_000_000i64).prop_map(|c| c as f64 / 100.0),
        notional_b in (1i64..10_000_000_000i64).prop_map(|c| c as f64 / 100.0),
    ) {
        let (lo, hi) = if notional_a <= notional_b {
            (notional_a, notional_b)
        } else {
            (notional_b, notional_a)
        };

        let lo_tier = tier_for(lo, &DEFAULT_MARGIN_TIERS).unwrap();
        let hi_tier = tier_for(hi, &DEFAULT_MARGIN_TIERS).unwrap();

        prop_assert!(lo_tier.maintenance_rate <= hi_tier.maintenance_rate);
        prop_assert!(lo_tier.max_leverage >= hi_tier.max_leverage);
    }
}
