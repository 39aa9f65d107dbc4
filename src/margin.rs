//! Margin system: the account-level facade over the position engine.
//!
//! Owns the per-user margin accounts and the per-symbol margin
//! requirements, checks pre-trade margin, rolls position margin and
//! unrealized pnl up into accounts, and decides account-level liquidation
//! eligibility. The dependency is one-directional: this module reads
//! positions through the manager, the manager never calls back.

use crate::account::{AccountError, AccountSummary, MarginAccount};
use crate::manager::PositionManager;
use crate::tiers::{self, MarginTier};
use crate::types::PositionStatus;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Margin level reported when a user has no used margin at all.
pub const NO_EXPOSURE_MARGIN_LEVEL: f64 = 999.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarginError {
    #[error("account already exists for user {0}")]
    DuplicateAccount(String),

    #[error("account not found for user {0}")]
    UnknownUser(String),

    #[error("insufficient margin: required {required:.2}, available {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error(transparent)]
    Account(#[from] AccountError),
}

/// Per-symbol margin rules. Overrides the config defaults once registered
/// via [`MarginSystem::set_symbol_requirement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRequirement {
    pub symbol: String,
    pub initial_margin_rate: f64,
    pub maintenance_margin_rate: f64,
    pub min_initial_margin: f64,
    pub max_leverage: u32,
    pub tier_brackets: Vec<MarginTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginConfig {
    pub default_initial_margin_rate: f64,
    pub default_maintenance_margin_rate: f64,
    pub min_transfer_amount: f64,
    pub negative_balance_protection: bool,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            default_initial_margin_rate: 0.10,
            default_maintenance_margin_rate: 0.05,
            min_transfer_amount: 1.0,
            negative_balance_protection: true,
        }
    }
}

pub struct MarginSystem {
    accounts: RwLock<HashMap<String, Arc<MarginAccount>>>,
    requirements: RwLock<HashMap<String, MarginRequirement>>,
    position_mgr: Arc<PositionManager>,
    config: MarginConfig,
}

impl MarginSystem {
    pub fn new(position_mgr: Arc<PositionManager>, config: MarginConfig) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            requirements: RwLock::new(HashMap::new()),
            position_mgr,
            config,
        }
    }

    pub fn config(&self) -> &MarginConfig {
        &self.config
    }

    pub fn create_account(&self, user_id: &str) -> Result<Arc<MarginAccount>, MarginError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(user_id) {
            return Err(MarginError::DuplicateAccount(user_id.to_string()));
        }
        let account = Arc::new(MarginAccount::new(user_id));
        accounts.insert(user_id.to_string(), Arc::clone(&account));
        info!(user = user_id, "margin account created");
        Ok(account)
    }

    pub fn get_account(&self, user_id: &str) -> Result<Arc<MarginAccount>, MarginError> {
        self.accounts
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| MarginError::UnknownUser(user_id.to_string()))
    }

    /// Initial margin required to carry `size` at `price` with the given
    /// leverage: the stricter of the leverage-implied margin and the
    /// symbol's flat initial rate, floored at the symbol minimum.
    pub fn calculate_initial_margin(
        &self,
        symbol: &str,
        size: f64,
        price: f64,
        leverage: u32,
    ) -> f64 {
        let requirement = self.requirement_for(symbol);
        let notional = size * price;

        let by_leverage = notional / f64::from(leverage.max(1));
        let by_rate = notional * requirement.initial_margin_rate;

        by_leverage.max(by_rate).max(requirement.min_initial_margin)
    }

    /// Maintenance margin for a position value: tier lookup when the symbol
    /// has brackets, flat rate otherwise.
    pub fn calculate_maintenance_margin(&self, symbol: &str, position_value: f64) -> f64 {
        let requirement = self.requirement_for(symbol);
        tiers::tier_for(position_value, &requirement.tier_brackets)
            .map(|tier| position_value * tier.maintenance_rate)
            .unwrap_or(position_value * requirement.maintenance_margin_rate)
    }

    /// Pre-trade gate: would the account's available balance cover the
    /// initial margin of this order?
    pub fn check_order_margin(
        &self,
        user_id: &str,
        symbol: &str,
        size: f64,
        price: f64,
        leverage: u32,
    ) -> Result<(), MarginError> {
        let account = self.get_account(user_id)?;
        let required = self.calculate_initial_margin(symbol, size, price, leverage);
        let available = account.available_balance();

        if available < required {
            warn!(user = user_id, symbol, required, available, "order margin check failed");
            return Err(MarginError::InsufficientMargin { required, available });
        }
        Ok(())
    }

    /// Roll the user's open positions up into the account: sum of initial
    /// margins and unrealized pnl over every non-closed position.
    pub fn update_position_margin(&self, user_id: &str) -> Result<(), MarginError> {
        let account = self.get_account(user_id)?;

        // a user with an account but no position history rolls up to zero
        let positions = self
            .position_mgr
            .get_user_positions(user_id)
            .unwrap_or_default();

        let mut position_margin = 0.0;
        let mut unrealized_pnl = 0.0;
        for position in &positions {
            if position.status != PositionStatus::Closed {
                position_margin += position.initial_margin;
                unrealized_pnl += position.unrealized_pnl;
            }
        }

        account.update_margin_and_pnl(position_margin, unrealized_pnl);
        Ok(())
    }

    /// Account equity over used margin. The sentinel 999 means "no
    /// exposure".
    pub fn margin_level(&self, user_id: &str) -> Result<f64, MarginError> {
        let account = self.get_account(user_id)?;
        let used_margin = account.used_margin();

        if used_margin <= 0.0 {
            return Ok(NO_EXPOSURE_MARGIN_LEVEL);
        }
        Ok(account.account_equity() / used_margin)
    }

    /// Account-level liquidation gate (the cross-margin check): equity has
    /// fallen below used margin.
    pub fn is_liquidatable(&self, user_id: &str) -> Result<bool, MarginError> {
        Ok(self.margin_level(user_id)? < 1.0)
    }

    pub fn deposit(&self, user_id: &str, amount: f64) -> Result<(), MarginError> {
        self.check_transfer_amount(amount)?;
        let account = self.get_account(user_id)?;
        account.deposit(amount)?;
        info!(user = user_id, amount, "deposit settled");
        Ok(())
    }

    pub fn withdraw(&self, user_id: &str, amount: f64) -> Result<(), MarginError> {
        self.check_transfer_amount(amount)?;
        let account = self.get_account(user_id)?;
        account.withdraw(amount)?;
        info!(user = user_id, amount, "withdrawal settled");
        Ok(())
    }

    pub fn freeze_order_margin(&self, user_id: &str, amount: f64) -> Result<(), MarginError> {
        let account = self.get_account(user_id)?;
        account.freeze_order_margin(amount)?;
        Ok(())
    }

    pub fn unfreeze_order_margin(&self, user_id: &str, amount: f64) -> Result<(), MarginError> {
        let account = self.get_account(user_id)?;
        account.unfreeze_order_margin(amount)?;
        Ok(())
    }

    /// Settle a realized-pnl delta into the user's cash balance, honoring
    /// negative-balance protection.
    pub fn settle_realized_pnl(&self, user_id: &str, pnl: f64) -> Result<(), MarginError> {
        let account = self.get_account(user_id)?;
        account.settle_realized_pnl(pnl, self.config.negative_balance_protection);
        Ok(())
    }

    pub fn set_symbol_requirement(&self, requirement: MarginRequirement) {
        let mut requirements = self.requirements.write();
        requirements.insert(requirement.symbol.clone(), requirement);
    }

    pub fn get_account_summary(&self, user_id: &str) -> Result<AccountSummary, MarginError> {
        Ok(self.get_account(user_id)?.summary())
    }

    fn requirement_for(&self, symbol: &str) -> MarginRequirement {
        if let Some(requirement) = self.requirements.read().get(symbol) {
            return requirement.clone();
        }

        MarginRequirement {
            symbol: symbol.to_string(),
            initial_margin_rate: self.config.default_initial_margin_rate,
            maintenance_margin_rate: self.config.default_maintenance_margin_rate,
            min_initial_margin: 1.0,
            max_leverage: 125,
            tier_brackets: Vec::new(),
        }
    }

    fn check_transfer_amount(&self, amount: f64) -> Result<(), MarginError> {
        if amount <= 0.0 || amount < self.config.min_transfer_amount {
            return Err(MarginError::InvalidAmount(amount));
        }
        Ok(())
    }
}
