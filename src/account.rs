//! Per-user margin account.
//!
//! The account is a cash ledger: settled balance, the spendable slice of
//! it, the slice frozen for resting orders, and the margin occupied by open
//! positions. All scalar fields live behind one per-account lock; every
//! mutation re-derives the cached `available_balance` and the margin ratio.

use crate::types::Timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountError {
    #[error("insufficient balance: requested {requested:.2}, available {available:.2}")]
    Insufficient { requested: f64, available: f64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

#[derive(Debug, Clone)]
struct AccountState {
    balance: f64,
    available_balance: f64,
    frozen_balance: f64,

    // margin occupied by filled positions vs. reserved for resting orders
    position_margin: f64,
    order_margin: f64,

    unrealized_pnl: f64,
    realized_pnl: f64,

    margin_ratio: f64,
    updated_at: Timestamp,
}

impl AccountState {
    fn new() -> Self {
        Self {
            balance: 0.0,
            available_balance: 0.0,
            frozen_balance: 0.0,
            position_margin: 0.0,
            order_margin: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            margin_ratio: f64::INFINITY,
            updated_at: Timestamp::now(),
        }
    }

    fn equity(&self) -> f64 {
        self.balance + self.unrealized_pnl
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

/// Point-in-time copy of every scalar the account tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub user_id: String,
    pub balance: f64,
    pub available_balance: f64,
    pub frozen_balance: f64,
    pub position_margin: f64,
    pub order_margin: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub account_equity: f64,
    pub margin_ratio: f64,
    pub updated_at: Timestamp,
}

#[derive(Debug)]
pub struct MarginAccount {
    user_id: String,
    state: RwLock<AccountState>,
}

impl MarginAccount {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: RwLock::new(AccountState::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Credit settled cash. Both total and available balance grow.
    pub fn deposit(&self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        let mut state = self.state.write();
        state.balance += amount;
        state.available_balance += amount;
        state.touch();
        Ok(())
    }

    /// Debit settled cash, bounded by the available balance.
    pub fn withdraw(&self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        let mut state = self.state.write();
        if state.available_balance < amount {
            return Err(AccountError::Insufficient {
                requested: amount,
                available: state.available_balance,
            });
        }
        state.balance = (state.balance - amount).max(0.0);
        state.available_balance = (state.available_balance - amount).max(0.0);
        state.touch();
        Ok(())
    }

    /// Reserve margin for a resting order: available -> frozen.
    pub fn freeze_order_margin(&self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        let mut state = self.state.write();
        if amount > state.available_balance {
            return Err(AccountError::Insufficient {
                requested: amount,
                available: state.available_balance,
            });
        }
        state.available_balance = (state.available_balance - amount).max(0.0);
        state.frozen_balance += amount;
        state.order_margin += amount;
        state.touch();
        Ok(())
    }

    /// Release a resting-order reservation: frozen -> available.
    pub fn unfreeze_order_margin(&self, amount: f64) -> Result<(), AccountError> {
        if amount <= 0.0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        let mut state = self.state.write();
        if amount > state.frozen_balance {
            return Err(AccountError::Insufficient {
                requested: amount,
                available: state.frozen_balance,
            });
        }
        state.available_balance += amount;
        state.frozen_balance = (state.frozen_balance - amount).max(0.0);
        state.order_margin = (state.order_margin - amount).max(0.0);
        state.touch();
        Ok(())
    }

    /// Overwrite the position-margin and unrealized-pnl roll-up, re-deriving
    /// available balance and margin ratio. Called by the margin system after
    /// a price sweep or position mutation.
    pub fn update_margin_and_pnl(&self, position_margin: f64, unrealized_pnl: f64) {
        let mut state = self.state.write();
        state.position_margin = position_margin;
        state.unrealized_pnl = unrealized_pnl;

        state.available_balance =
            (state.balance + state.unrealized_pnl - state.position_margin - state.order_margin)
                .max(0.0);

        state.margin_ratio = if position_margin > 0.0 {
            state.equity() / position_margin
        } else {
            f64::INFINITY
        };
        state.touch();
    }

    /// Settle a realized-pnl delta into cash. With negative-balance
    /// protection the balance never goes below zero.
    pub fn settle_realized_pnl(&self, pnl: f64, negative_balance_protection: bool) {
        let mut state = self.state.write();
        state.balance += pnl;
        if negative_balance_protection && state.balance < 0.0 {
            state.balance = 0.0;
        }
        state.available_balance = (state.available_balance + pnl).max(0.0);
        state.realized_pnl += pnl;
        state.touch();
    }

    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    pub fn available_balance(&self) -> f64 {
        self.state.read().available_balance
    }

    pub fn frozen_balance(&self) -> f64 {
        self.state.read().frozen_balance
    }

    pub fn position_margin(&self) -> f64 {
        self.state.read().position_margin
    }

    pub fn order_margin(&self) -> f64 {
        self.state.read().order_margin
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.state.read().unrealized_pnl
    }

    pub fn realized_pnl(&self) -> f64 {
        self.state.read().realized_pnl
    }

    pub fn margin_ratio(&self) -> f64 {
        self.state.read().margin_ratio
    }

    /// balance + unrealized pnl
    pub fn account_equity(&self) -> f64 {
        self.state.read().equity()
    }

    /// position margin + order margin
    pub fn used_margin(&self) -> f64 {
        let state = self.state.read();
        state.position_margin + state.order_margin
    }

    pub fn summary(&self) -> AccountSummary {
        let state = self.state.read();
        AccountSummary {
            user_id: self.user_id.clone(),
            balance: state.balance,
            available_balance: state.available_balance,
            frozen_balance: state.frozen_balance,
            position_margin: state.position_margin,
            order_margin: state.order_margin,
            unrealized_pnl: state.unrealized_pnl,
            realized_pnl: state.realized_pnl,
            account_equity: state.equity(),
            margin_ratio: state.margin_ratio,
            updated_at: state.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_account() -> MarginAccount {
        let account = MarginAccount::new("user1");
        account.deposit(10_000.0).unwrap();
        account
    }

    #[test]
    fn deposit_and_withdraw() {
        let account = funded_account();
        assert_eq!(account.balance(), 10_000.0);
        assert_eq!(account.available_balance(), 10_000.0);

        account.deposit(5_000.0).unwrap();
        assert_eq!(account.balance(), 15_000.0);

        account.withdraw(3_000.0).unwrap();
        assert_eq!(account.balance(), 12_000.0);
        assert_eq!(account.available_balance(), 12_000.0);
    }

    #[test]
    fn withdraw_beyond_available_fails() {
        let account = funded_account();
        let err = account.withdraw(20_000.0).unwrap_err();
        assert!(matches!(err, AccountError::Insufficient { .. }));
        assert_eq!(account.balance(), 10_000.0);
    }

    #[test]
    fn nonpositive_amounts_rejected() {
        let account = funded_account();
        assert!(matches!(account.deposit(0.0), Err(AccountError::InvalidAmount(_))));
        assert!(matches!(account.withdraw(-1.0), Err(AccountError::InvalidAmount(_))));
        assert!(matches!(
            account.freeze_order_margin(0.0),
            Err(AccountError::InvalidAmount(_))
        ));
        assert!(matches!(
            account.unfreeze_order_margin(-5.0),
            Err(AccountError::InvalidAmount(_))
        ));
    }

    #[test]
    fn freeze_moves_available_into_frozen() {
        let account = funded_account();
        account.freeze_order_margin(3_000.0).unwrap();

        assert_eq!(account.available_balance(), 7_000.0);
        assert_eq!(account.frozen_balance(), 3_000.0);
        assert_eq!(account.order_margin(), 3_000.0);
        // total balance is untouched by a reservation
        assert_eq!(account.balance(), 10_000.0);
    }

    #[test]
    fn unfreeze_restores_prior_state() {
        let account = funded_account();
        let before = account.summary();

        account.freeze_order_margin(3_000.0).unwrap();
        account.unfreeze_order_margin(3_000.0).unwrap();

        let after = account.summary();
        assert_eq!(after.balance, before.balance);
        assert_eq!(after.available_balance, before.available_balance);
        assert_eq!(after.frozen_balance, before.frozen_balance);
        assert_eq!(after.order_margin, before.order_margin);
    }

    #[test]
    fn freeze_beyond_available_fails() {
        let account = funded_account();
        assert!(matches!(
            account.freeze_order_margin(10_001.0),
            Err(AccountError::Insufficient { .. })
        ));
    }

    #[test]
    fn unfreeze_beyond_frozen_fails() {
        let account = funded_account();
        account.freeze_order_margin(1_000.0).unwrap();
        assert!(matches!(
            account.unfreeze_order_margin(1_500.0),
            Err(AccountError::Insufficient { .. })
        ));
    }

    #[test]
    fn margin_and_pnl_rollup() {
        let account = funded_account();
        account.update_margin_and_pnl(5_000.0, 1_000.0);

        assert_eq!(account.position_margin(), 5_000.0);
        assert_eq!(account.unrealized_pnl(), 1_000.0);
        assert_eq!(account.account_equity(), 11_000.0);
        // 10000 + 1000 - 5000 - 0
        assert_eq!(account.available_balance(), 6_000.0);
        // (10000 + 1000) / 5000
        assert!((account.margin_ratio() - 2.2).abs() < 1e-9);
    }

    #[test]
    fn rollup_respects_order_margin() {
        let account = funded_account();
        account.freeze_order_margin(2_000.0).unwrap();
        account.update_margin_and_pnl(5_000.0, 0.0);

        // 10000 + 0 - 5000 - 2000
        assert_eq!(account.available_balance(), 3_000.0);
        assert_eq!(account.used_margin(), 7_000.0);
    }

    #[test]
    fn margin_ratio_sentinel_without_positions() {
        let account = funded_account();
        assert!(account.margin_ratio().is_infinite());

        account.update_margin_and_pnl(0.0, 0.0);
        assert!(account.margin_ratio().is_infinite());
    }

    #[test]
    fn available_clamps_at_zero_on_deep_loss() {
        let account = funded_account();
        account.update_margin_and_pnl(5_000.0, -8_000.0);

        assert_eq!(account.available_balance(), 0.0);
        assert_eq!(account.account_equity(), 2_000.0);
    }

    #[test]
    fn settle_realized_pnl_moves_cash() {
        let account = funded_account();

        account.settle_realized_pnl(1_000.0, true);
        assert_eq!(account.balance(), 11_000.0);
        assert_eq!(account.realized_pnl(), 1_000.0);

        account.settle_realized_pnl(-500.0, true);
        assert_eq!(account.balance(), 10_500.0);
        assert_eq!(account.realized_pnl(), 500.0);
    }

    #[test]
    fn negative_balance_protection_clamps() {
        let account = MarginAccount::new("user2");
        account.deposit(100.0).unwrap();

        account.settle_realized_pnl(-250.0, true);
        assert_eq!(account.balance(), 0.0);
        assert_eq!(account.available_balance(), 0.0);
        assert_eq!(account.realized_pnl(), -250.0);

        let unprotected = MarginAccount::new("user3");
        unprotected.deposit(100.0).unwrap();
        unprotected.settle_realized_pnl(-250.0, false);
        assert_eq!(unprotected.balance(), -150.0);
    }

    #[test]
    fn summary_snapshot() {
        let account = funded_account();
        account.freeze_order_margin(1_000.0).unwrap();
        account.update_margin_and_pnl(2_000.0, 500.0);

        let summary = account.summary();
        assert_eq!(summary.user_id, "user1");
        assert_eq!(summary.balance, 10_000.0);
        assert_eq!(summary.frozen_balance, 1_000.0);
        assert_eq!(summary.position_margin, 2_000.0);
        assert_eq!(summary.order_margin, 1_000.0);
        assert_eq!(summary.unrealized_pnl, 500.0);
        assert_eq!(summary.account_equity, 10_500.0);
    }
}
