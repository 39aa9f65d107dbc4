// 5.0: per-symbol position store. one contiguous array per symbol so the
// mark-price fan-out is a single cache-friendly scan under one lock.
// 5.1: the bucket owns its positions. everything else holds (symbol, id)
// handles and comes back through the bucket to read or mutate.

use crate::position::Position;
use crate::types::{PositionStatus, PrecisionSetting};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Registration record for one symbol: its name and decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: String,
    pub precision: PrecisionSetting,
}

impl SymbolSpec {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            precision: PrecisionSetting::default(),
        }
    }

    pub fn with_precision(symbol: &str, precision: PrecisionSetting) -> Self {
        Self {
            symbol: symbol.to_string(),
            precision,
        }
    }
}

#[derive(Debug, Default)]
struct BucketInner {
    positions: Vec<Position>,
    // position id -> slot in `positions`, kept correct across swap-removes
    slots: HashMap<String, usize>,
}

impl BucketInner {
    fn swap_remove(&mut self, index: usize) -> Position {
        let position = self.positions.swap_remove(index);
        self.slots.remove(&position.id);
        if index < self.positions.len() {
            let moved_id = self.positions[index].id.clone();
            self.slots.insert(moved_id, index);
        }
        position
    }
}

/// All active positions for one symbol. Mutations are serialized by the
/// bucket's lock; distinct symbols are independent and can be repriced on
/// separate worker threads.
#[derive(Debug)]
pub struct PositionBucket {
    spec: SymbolSpec,
    inner: RwLock<BucketInner>,
}

impl PositionBucket {
    pub fn new(spec: SymbolSpec) -> Self {
        Self {
            spec,
            inner: RwLock::new(BucketInner::default()),
        }
    }

    pub fn spec(&self) -> &SymbolSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.inner.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().positions.is_empty()
    }

    /// Take ownership of a position.
    pub fn append(&self, position: Position) {
        let mut inner = self.inner.write();
        let index = inner.positions.len();
        inner.slots.insert(position.id.clone(), index);
        inner.positions.push(position);
    }

    /// Read-only copy of a position by id.
    pub fn snapshot(&self, id: &str) -> Option<Position> {
        let inner = self.inner.read();
        inner
            .slots
            .get(id)
            .map(|&index| inner.positions[index].clone())
    }

    /// Read-only copies of every position currently in the bucket.
    pub fn snapshot_all(&self) -> Vec<Position> {
        self.inner.read().positions.clone()
    }

    /// Mutate a position in place under the bucket lock.
    pub fn with_position_mut<R>(&self, id: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        let index = *inner.slots.get(id)?;
        Some(f(&mut inner.positions[index]))
    }

    /// Reprice every Normal position against the new mark. Positions that
    /// cross the liquidation threshold are flipped to Liquidating and moved
    /// out into the returned set; Closed leftovers from earlier trade paths
    /// are dropped along the way.
    pub fn update_mark_price(&self, price: f64) -> Vec<Position> {
        let mut inner = self.inner.write();
        let mut liquidating = Vec::new();

        let mut index = 0;
        while index < inner.positions.len() {
            match inner.positions[index].status {
                PositionStatus::Closed => {
                    // lazy cleanup after Reduce/Close; do not advance, a new
                    // element was swapped into this slot
                    inner.swap_remove(index);
                    continue;
                }
                PositionStatus::Liquidating => {
                    index += 1;
                    continue;
                }
                PositionStatus::Normal => {}
            }

            inner.positions[index].update_mark_price(price);

            if inner.positions[index].is_liquidatable() {
                inner.positions[index].status = PositionStatus::Liquidating;
                liquidating.push(inner.swap_remove(index));
                continue;
            }

            index += 1;
        }

        if !liquidating.is_empty() {
            debug!(
                symbol = %self.spec.symbol,
                price,
                count = liquidating.len(),
                "repricing sweep surfaced liquidatable positions"
            );
        }

        liquidating
    }
}
