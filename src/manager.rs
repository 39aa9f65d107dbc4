//! Position routing and indexing.
//!
//! The manager owns one bucket per registered symbol and a per-user index
//! of (position key -> handle). Buckets are built once at construction and
//! never change; the user index and position-mode map sit behind a single
//! read/write lock. Lock order is manager -> bucket, never the reverse.

use crate::bucket::{PositionBucket, SymbolSpec};
use crate::position::{Position, PositionError};
use crate::types::{MarginMode, PositionMode, PositionStatus, Side};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManagerError {
    #[error("symbol {0} is not registered")]
    UnknownSymbol(String),

    #[error("user {0} has no positions")]
    UnknownUser(String),

    #[error("position does not exist")]
    UnknownPosition,

    #[error("cannot change position mode with open positions")]
    ModeSwitchForbidden,

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Non-owning handle to a position. Ownership stays with the symbol bucket;
/// the handle is resolved back through it on every access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRef {
    pub symbol: String,
    pub id: String,
}

#[derive(Debug, Default)]
struct ManagerState {
    // user id -> position key -> handle
    users: HashMap<String, HashMap<String, PositionRef>>,
    modes: HashMap<String, PositionMode>,
}

/// Routes trade events to the right bucket and keeps the per-user view.
#[derive(Debug)]
pub struct PositionManager {
    buckets: HashMap<String, PositionBucket>,
    state: RwLock<ManagerState>,
}

// one-way mode keys by symbol alone; hedge mode splits long and short
// into independent slots
fn position_key(symbol: &str, side: Side, mode: PositionMode) -> String {
    match mode {
        PositionMode::OneWay => symbol.to_string(),
        PositionMode::Hedge => format!("{side}_{symbol}"),
    }
}

impl PositionManager {
    /// Build the manager over a fixed, pre-registered symbol set.
    pub fn new(symbols: impl IntoIterator<Item = SymbolSpec>) -> Self {
        let buckets = symbols
            .into_iter()
            .map(|spec| (spec.symbol.clone(), PositionBucket::new(spec)))
            .collect();
        Self {
            buckets,
            state: RwLock::new(ManagerState::default()),
        }
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.buckets.contains_key(symbol)
    }

    fn bucket(&self, symbol: &str) -> Result<&PositionBucket, ManagerError> {
        self.buckets
            .get(symbol)
            .ok_or_else(|| ManagerError::UnknownSymbol(symbol.to_string()))
    }

    /// Open a new position or add to the live one occupying the same key.
    /// Returns a snapshot of the resulting position.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        margin_mode: MarginMode,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
        size: f64,
        leverage: u32,
    ) -> Result<Position, ManagerError> {
        let bucket = self.bucket(symbol)?;

        let mut state = self.state.write();
        let mode = *state
            .modes
            .entry(user_id.to_string())
            .or_insert(PositionMode::OneWay);
        let key = position_key(symbol, side, mode);
        let positions = state.users.entry(user_id.to_string()).or_default();

        // a live position at the key means this fill is an add
        if let Some(handle) = positions.get(&key) {
            let added = bucket.with_position_mut(&handle.id, |position| {
                if position.is_open() {
                    Some(position.add(price, size).map(|()| position.clone()))
                } else {
                    None
                }
            });
            if let Some(Some(result)) = added {
                let snapshot = result?;
                debug!(user = user_id, symbol, %side, size, price, "added to position");
                return Ok(snapshot);
            }
            // stale handle: the old position closed out, fall through and
            // mint a fresh one
        }

        let mut position =
            Position::new(user_id, symbol, margin_mode, Some(bucket.spec().precision));
        position.open(side, price, size, leverage)?;

        positions.insert(
            key,
            PositionRef {
                symbol: symbol.to_string(),
                id: position.id.clone(),
            },
        );
        let snapshot = position.clone();
        bucket.append(position);

        debug!(user = user_id, symbol, %side, size, price, leverage, "opened position");
        Ok(snapshot)
    }

    /// Add to an existing position without the open-or-add routing. Fails
    /// when the user has nothing live at the key.
    pub fn add_to_position(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<Position, ManagerError> {
        let handle = self.resolve(user_id, symbol, side)?;
        let bucket = self.bucket(&handle.symbol)?;

        let added = bucket
            .with_position_mut(&handle.id, |position| {
                position.add(price, size).map(|()| position.clone())
            })
            .ok_or(ManagerError::UnknownPosition)?;
        let snapshot = added?;

        debug!(user = user_id, symbol, %side, size, price, "added to position");
        Ok(snapshot)
    }

    fn resolve(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
    ) -> Result<PositionRef, ManagerError> {
        let state = self.state.read();
        let positions = state
            .users
            .get(user_id)
            .ok_or_else(|| ManagerError::UnknownUser(user_id.to_string()))?;
        let mode = state.modes.get(user_id).copied().unwrap_or_default();
        let key = position_key(symbol, side, mode);
        positions
            .get(&key)
            .cloned()
            .ok_or(ManagerError::UnknownPosition)
    }

    /// Snapshot of one position, resolved through the user's position key.
    pub fn get_position(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
    ) -> Result<Position, ManagerError> {
        let handle = self.resolve(user_id, symbol, side)?;
        self.bucket(&handle.symbol)?
            .snapshot(&handle.id)
            .ok_or(ManagerError::UnknownPosition)
    }

    /// Partially close a position, realizing pnl on the reduced slice.
    /// Returns the post-reduce snapshot and the realized delta.
    pub fn reduce_position(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<(Position, f64), ManagerError> {
        let handle = self.resolve(user_id, symbol, side)?;
        let bucket = self.bucket(&handle.symbol)?;

        let reduced = bucket
            .with_position_mut(&handle.id, |position| {
                position.reduce(price, size).map(|pnl| (position.clone(), pnl))
            })
            .ok_or(ManagerError::UnknownPosition)?;
        let (snapshot, pnl) = reduced?;

        if snapshot.status == PositionStatus::Closed {
            self.drop_handle(user_id, &snapshot);
            info!(user = user_id, symbol, pnl, "position fully closed");
        }

        Ok((snapshot, pnl))
    }

    /// Fully close a position at the given price.
    pub fn close_position(
        &self,
        user_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
    ) -> Result<(Position, f64), ManagerError> {
        let handle = self.resolve(user_id, symbol, side)?;
        let bucket = self.bucket(&handle.symbol)?;

        let closed = bucket
            .with_position_mut(&handle.id, |position| {
                position.close(price).map(|pnl| (position.clone(), pnl))
            })
            .ok_or(ManagerError::UnknownPosition)?;
        let (snapshot, pnl) = closed?;

        self.drop_handle(user_id, &snapshot);
        info!(user = user_id, symbol, pnl, "position closed");

        Ok((snapshot, pnl))
    }

    /// Reprice one symbol's bucket. The returned positions have crossed the
    /// liquidation threshold, are flagged Liquidating, and now belong to the
    /// caller (the liquidation handler); their user-map handles are pruned
    /// here.
    pub fn update_mark_prices(
        &self,
        symbol: &str,
        price: f64,
    ) -> Result<Vec<Position>, ManagerError> {
        let liquidating = self.bucket(symbol)?.update_mark_price(price);

        if !liquidating.is_empty() {
            for position in &liquidating {
                self.drop_handle(&position.user_id, position);
            }
            info!(
                symbol,
                price,
                count = liquidating.len(),
                "handing positions to liquidation"
            );
        }

        Ok(liquidating)
    }

    /// Switch between one-way and hedge keying. Only allowed while the user
    /// has no open position, since the switch changes key derivation.
    pub fn set_position_mode(&self, user_id: &str, mode: PositionMode) -> Result<(), ManagerError> {
        let mut state = self.state.write();

        if let Some(positions) = state.users.get(user_id) {
            for handle in positions.values() {
                let open = self
                    .buckets
                    .get(&handle.symbol)
                    .and_then(|bucket| bucket.snapshot(&handle.id))
                    .is_some_and(|position| position.is_open());
                if open {
                    return Err(ManagerError::ModeSwitchForbidden);
                }
            }
        }

        state.modes.insert(user_id.to_string(), mode);
        Ok(())
    }

    /// Diagnostic full scan: every indexed position currently over the
    /// liquidation threshold. The hot path is the set returned by
    /// [`PositionManager::update_mark_prices`].
    pub fn get_liquidatable_positions(&self) -> Vec<Position> {
        let state = self.state.read();
        let mut liquidatable = Vec::new();

        for positions in state.users.values() {
            for handle in positions.values() {
                if let Some(position) = self
                    .buckets
                    .get(&handle.symbol)
                    .and_then(|bucket| bucket.snapshot(&handle.id))
                {
                    if position.is_liquidatable() {
                        liquidatable.push(position);
                    }
                }
            }
        }

        liquidatable
    }

    /// Snapshot copies of all of a user's indexed positions.
    pub fn get_user_positions(&self, user_id: &str) -> Result<Vec<Position>, ManagerError> {
        let state = self.state.read();
        let positions = state
            .users
            .get(user_id)
            .ok_or_else(|| ManagerError::UnknownUser(user_id.to_string()))?;

        Ok(positions
            .values()
            .filter_map(|handle| {
                self.buckets
                    .get(&handle.symbol)
                    .and_then(|bucket| bucket.snapshot(&handle.id))
            })
            .collect())
    }

    pub fn position_mode(&self, user_id: &str) -> PositionMode {
        self.state
            .read()
            .modes
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    // remove the user-map handle pointing at this exact position, if any
    fn drop_handle(&self, user_id: &str, position: &Position) {
        let mut state = self.state.write();
        let mode = state.modes.get(user_id).copied().unwrap_or_default();
        let key = position_key(&position.symbol, position.side, mode);
        if let Some(positions) = state.users.get_mut(user_id) {
            if positions.get(&key).is_some_and(|handle| handle.id == position.id) {
                positions.remove(&key);
            }
        }
    }
}
