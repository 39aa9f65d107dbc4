// 4.0: single open exposure for (user, symbol, side). owns every derived
// quantity: position value, margins, liquidation price, pnl.
// 4.1: trade mutations (open/add/reduce) overwrite the mark price with the
// trade price, so all derived fields stay coherent right after the fill.

use crate::ids::generate_position_id;
use crate::tiers::{self, DEFAULT_MARGIN_TIERS};
use crate::types::{MarginMode, PositionStatus, PrecisionSetting, Side, Timestamp};
use serde::{Deserialize, Serialize};

/// Margin ratio reported for empty or unpriced positions: far from
/// liquidation.
pub const SAFE_MARGIN_RATIO: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("position already exists, cannot open again")]
    AlreadyOpen,

    #[error("position status is not normal")]
    NotNormal,

    #[error("reduce size exceeds position size")]
    ExceedsSize,

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: PositionStatus,
    pub margin_mode: MarginMode,

    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub position_value: f64,
    pub liquidation_price: f64,

    pub initial_margin: f64,
    pub maintenance_margin: f64,
    pub leverage: u32,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,

    pub open_time: Timestamp,
    pub update_time: Timestamp,

    precision: PrecisionSetting,
}

impl Position {
    /// Empty slot for a user/symbol pair. Becomes live via [`Position::open`].
    pub fn new(
        user_id: &str,
        symbol: &str,
        margin_mode: MarginMode,
        precision: Option<PrecisionSetting>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: generate_position_id(),
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            side: Side::Long,
            status: PositionStatus::Normal,
            margin_mode,
            size: 0.0,
            entry_price: 0.0,
            mark_price: 0.0,
            position_value: 0.0,
            liquidation_price: 0.0,
            initial_margin: 0.0,
            maintenance_margin: 0.0,
            leverage: 1,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            open_time: now,
            update_time: now,
            precision: precision.unwrap_or_default(),
        }
    }

    pub fn zero_price(&self) -> f64 {
        self.precision.zero_price()
    }

    pub fn zero_size(&self) -> f64 {
        self.precision.zero_size()
    }

    /// A position is open while it holds non-zero size.
    pub fn is_open(&self) -> bool {
        self.size > self.zero_size()
    }

    /// Open the slot. Only valid on a Normal, empty position; the side is
    /// fixed from here on.
    pub fn open(
        &mut self,
        side: Side,
        price: f64,
        size: f64,
        leverage: u32,
    ) -> Result<(), PositionError> {
        if self.status != PositionStatus::Normal || self.is_open() {
            return Err(PositionError::AlreadyOpen);
        }
        if price <= self.zero_price() {
            return Err(PositionError::InvalidAmount(price));
        }
        if size <= self.zero_size() {
            return Err(PositionError::InvalidAmount(size));
        }
        if !(1..=125).contains(&leverage) {
            return Err(PositionError::InvalidAmount(f64::from(leverage)));
        }

        self.side = side;
        self.entry_price = price;
        self.mark_price = price;
        self.size = size;
        self.leverage = leverage;

        self.rederive_margins();
        self.rederive_unrealized_pnl();
        self.update_time = Timestamp::now();

        Ok(())
    }

    /// Increase the exposure at a new fill price. Entry becomes the
    /// volume-weighted average; no pnl is realized.
    pub fn add(&mut self, price: f64, size: f64) -> Result<(), PositionError> {
        if self.status != PositionStatus::Normal {
            return Err(PositionError::NotNormal);
        }
        if price <= self.zero_price() {
            return Err(PositionError::InvalidAmount(price));
        }
        if size <= self.zero_size() {
            return Err(PositionError::InvalidAmount(size));
        }

        // new average = (old value + fill value) / (old size + fill size)
        let total_size = self.size + size;
        self.entry_price = (self.entry_price * self.size + price * size) / total_size;
        self.size = total_size;
        self.mark_price = price;

        self.rederive_margins();
        self.rederive_unrealized_pnl();
        self.update_time = Timestamp::now();

        Ok(())
    }

    /// Shrink the exposure at a fill price, realizing pnl on the reduced
    /// slice. Reducing to (epsilon of) zero closes the position.
    pub fn reduce(&mut self, price: f64, size: f64) -> Result<f64, PositionError> {
        if self.status != PositionStatus::Normal {
            return Err(PositionError::NotNormal);
        }
        if price <= self.zero_price() {
            return Err(PositionError::InvalidAmount(price));
        }
        if size <= self.zero_size() {
            return Err(PositionError::InvalidAmount(size));
        }
        if size > self.size + self.zero_size() {
            return Err(PositionError::ExceedsSize);
        }

        // long: (exit - entry) * size, short: (entry - exit) * size
        let pnl = self.side.sign() * (price - self.entry_price) * size;
        self.realized_pnl += pnl;
        self.size -= size;
        self.mark_price = price;

        if self.size <= self.zero_size() {
            // entry price is retained for audit
            self.size = 0.0;
            self.status = PositionStatus::Closed;
            self.position_value = 0.0;
            self.initial_margin = 0.0;
            self.maintenance_margin = 0.0;
            self.liquidation_price = 0.0;
            self.unrealized_pnl = 0.0;
        } else {
            self.rederive_margins();
            self.rederive_unrealized_pnl();
        }

        self.update_time = Timestamp::now();
        Ok(pnl)
    }

    /// Fully close at the given price. Equivalent to reducing the whole size.
    pub fn close(&mut self, price: f64) -> Result<f64, PositionError> {
        let size = self.size;
        self.reduce(price, size)
    }

    /// Reprice against a new reference mark. Only mark-dependent quantities
    /// move; entry, margins, and liquidation price stay put.
    pub fn update_mark_price(&mut self, mark_price: f64) {
        self.mark_price = mark_price;

        if !self.is_open() {
            self.position_value = 0.0;
            self.unrealized_pnl = 0.0;
            return;
        }

        self.position_value = mark_price * self.size;
        self.rederive_unrealized_pnl();
        self.update_time = Timestamp::now();
    }

    /// Equity-to-notional ratio in percent. Empty or unpriced positions
    /// report the safe sentinel. Per-position CROSS margin is reserved and
    /// also reports the sentinel; account-level cross risk lives in the
    /// margin system.
    pub fn margin_ratio(&self) -> f64 {
        if !self.is_open() || self.mark_price <= self.zero_price() {
            return SAFE_MARGIN_RATIO;
        }

        match self.margin_mode {
            MarginMode::Isolated => {
                100.0 * (self.initial_margin + self.unrealized_pnl) / self.position_value
            }
            MarginMode::Cross => SAFE_MARGIN_RATIO,
        }
    }

    /// The margin ratio at which liquidation fires.
    pub fn maintenance_ratio(&self) -> f64 {
        if !self.is_open() || self.mark_price <= self.zero_price() {
            return 0.0;
        }
        100.0 * self.maintenance_margin / self.position_value
    }

    /// True when unrealized loss has eaten initial margin down to the
    /// maintenance floor.
    pub fn is_liquidatable(&self) -> bool {
        self.status == PositionStatus::Normal
            && self.is_open()
            && self.mark_price > self.zero_price()
            && self.margin_ratio() <= self.maintenance_ratio()
    }

    /// Return on the margin actually posted: unrealized pnl over initial
    /// margin.
    pub fn roi(&self) -> f64 {
        if self.initial_margin <= 0.0 {
            return 0.0;
        }
        self.unrealized_pnl / self.initial_margin
    }

    // Re-derive initial margin, maintenance margin, position value, and
    // liquidation price from size/entry/mark. Call after every trade
    // mutation, never on plain repricing.
    fn rederive_margins(&mut self) {
        self.position_value = self.mark_price * self.size;
        self.initial_margin = self.entry_price * self.size / f64::from(self.leverage);
        self.maintenance_margin =
            tiers::maintenance_margin(self.position_value, &DEFAULT_MARGIN_TIERS);

        // the mark move that exhausts (im - mm), measured from entry
        let buffer = (self.initial_margin - self.maintenance_margin) / self.size;
        self.liquidation_price = self.entry_price - self.side.sign() * buffer;
    }

    fn rederive_unrealized_pnl(&mut self) {
        self.unrealized_pnl = self.side.sign() * (self.mark_price - self.entry_price) * self.size;
    }
}
