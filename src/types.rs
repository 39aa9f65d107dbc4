// 1.0: shared primitives. sides, statuses, modes, timestamps, precision.
// every quantity in the engine is an IEEE-754 double; "zero" always means
// |x| <= epsilon with the epsilon coming from the symbol's PrecisionSetting.

use serde::{Deserialize, Serialize};
use std::fmt;

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: position lifecycle. Normal -> Liquidating happens only inside the
// bucket repricing scan; Normal -> Closed happens when size reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Normal,
    Liquidating,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Normal => write!(f, "normal"),
            PositionStatus::Liquidating => write!(f, "liquidating"),
            PositionStatus::Closed => write!(f, "closed"),
        }
    }
}

// 1.2: one-way = long and short share a single slot per symbol.
// hedge = independent long and short slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PositionMode {
    #[default]
    OneWay,
    Hedge,
}

impl fmt::Display for PositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionMode::OneWay => write!(f, "one-way"),
            PositionMode::Hedge => write!(f, "hedge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarginMode::Cross => write!(f, "CROSS"),
            MarginMode::Isolated => write!(f, "ISOLATED"),
        }
    }
}

// 1.3: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

// 1.4: per-symbol decimal precision. price_precision k means the smallest
// representable price step is 10^-k; anything at or below that is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionSetting {
    pub price_precision: i8,
    pub size_precision: i8,
}

impl Default for PrecisionSetting {
    fn default() -> Self {
        Self {
            price_precision: 2,
            size_precision: 8,
        }
    }
}

impl PrecisionSetting {
    pub fn zero_price(&self) -> f64 {
        10f64.powi(-i32::from(self.price_precision))
    }

    pub fn zero_size(&self) -> f64 {
        10f64.powi(-i32::from(self.size_precision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn default_precision_thresholds() {
        let precision = PrecisionSetting::default();
        assert_eq!(precision.zero_price(), 0.01); // 10^-2
        assert_eq!(precision.zero_size(), 0.00000001); // 10^-8
    }

    #[test]
    fn custom_precision_thresholds() {
        let precision = PrecisionSetting {
            price_precision: 1,
            size_precision: 4,
        };
        assert_eq!(precision.zero_price(), 0.1);
        assert_eq!(precision.zero_size(), 0.0001);
    }

    #[test]
    fn position_mode_defaults_to_one_way() {
        assert_eq!(PositionMode::default(), PositionMode::OneWay);
        assert_eq!(PositionMode::Hedge.to_string(), "hedge");
    }

    #[test]
    fn timestamp_millis_roundtrip() {
        let ts = Timestamp::from_millis(1_700_000_000_000);
        assert_eq!(ts.as_millis(), 1_700_000_000_000);
    }
}
