use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::OrderSide;
use crate::error::CycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_broker_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Self::Long),
            "short" | "sell" => Some(Self::Short),
            _ => None,
        }
    }

    pub fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }

    /// Side of the order that flattens a position on this side.
    pub fn close_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

/// An open position tracked by the ledger, with its protective levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub qty: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Position {
    /// Open a fresh position record. Levels must bracket the entry:
    /// `stop < entry < target` for longs, mirrored for shorts.
    pub fn open(
        symbol: &str,
        side: PositionSide,
        entry_price: f64,
        qty: f64,
        stop_loss: f64,
        take_profit: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, CycleError> {
        let position = Self {
            position_id: format!("pos-{}", &uuid::Uuid::new_v4().to_string()[..8]),
            symbol: symbol.to_ascii_uppercase(),
            side,
            entry_price,
            qty,
            stop_loss,
            take_profit,
            entry_time: now,
            last_update: now,
        };
        position.check_opening()?;
        Ok(position)
    }

    /// Lifetime checks plus `stop < entry < target` (mirrored for shorts),
    /// which only has to hold before the stop has been ratcheted.
    pub fn check_opening(&self) -> Result<(), CycleError> {
        self.check_tracked()?;
        let bracketed = match self.side {
            PositionSide::Long => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            PositionSide::Short => {
                self.take_profit < self.entry_price && self.entry_price < self.stop_loss
            }
        };
        if !bracketed {
            return Err(self.invalid(format!(
                "levels do not bracket entry {:.4} (stop {:.4}, target {:.4})",
                self.entry_price, self.stop_loss, self.take_profit
            )));
        }
        Ok(())
    }

    /// Checks that hold for the whole life of a position. A ratcheted stop may
    /// sit beyond the entry, but never beyond the target.
    pub fn check_tracked(&self) -> Result<(), CycleError> {
        let values = [self.entry_price, self.qty, self.stop_loss, self.take_profit];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(self.invalid("non-finite field".to_string()));
        }
        if self.entry_price <= 0.0 || self.qty <= 0.0 {
            return Err(self.invalid(format!(
                "entry {:.4} and qty {:.4} must be positive",
                self.entry_price, self.qty
            )));
        }
        let ordered = match self.side {
            PositionSide::Long => {
                self.stop_loss < self.take_profit && self.entry_price < self.take_profit
            }
            PositionSide::Short => {
                self.take_profit < self.stop_loss && self.take_profit < self.entry_price
            }
        };
        if !ordered {
            return Err(self.invalid(format!(
                "stop {:.4} / target {:.4} out of order for {} entry {:.4}",
                self.stop_loss,
                self.take_profit,
                self.side.as_str(),
                self.entry_price
            )));
        }
        Ok(())
    }

    fn invalid(&self, detail: String) -> CycleError {
        CycleError::InvalidPosition {
            symbol: self.symbol.clone(),
            detail,
        }
    }

    /// Signed fractional PnL: positive when price moved in the position's favor.
    pub fn pnl_fraction(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) / self.entry_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.qty
    }

    pub fn stop_loss_hit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price <= self.stop_loss,
            PositionSide::Short => price >= self.stop_loss,
        }
    }

    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price >= self.take_profit,
            PositionSide::Short => price <= self.take_profit,
        }
    }
}

/// A position as reported by the broker, the authoritative source for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub side: PositionSide,
    pub avg_entry_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_long_requires_bracketing_levels() {
        let now = Utc::now();
        assert!(Position::open("aaa", PositionSide::Long, 100.0, 5.0, 97.0, 105.0, now).is_ok());
        assert!(Position::open("AAA", PositionSide::Long, 100.0, 5.0, 101.0, 105.0, now).is_err());
        assert!(Position::open("AAA", PositionSide::Short, 100.0, 5.0, 103.0, 95.0, now).is_ok());
        assert!(Position::open("AAA", PositionSide::Short, 100.0, 5.0, 97.0, 95.0, now).is_err());
        assert!(Position::open("AAA", PositionSide::Long, 100.0, 0.0, 97.0, 105.0, now).is_err());
    }

    #[test]
    fn pnl_is_negated_for_shorts() {
        let now = Utc::now();
        let long = Position::open("AAA", PositionSide::Long, 100.0, 2.0, 97.0, 105.0, now).unwrap();
        let short =
            Position::open("AAA", PositionSide::Short, 100.0, 2.0, 103.0, 95.0, now).unwrap();
        assert!((long.pnl_fraction(102.0) - 0.02).abs() < 1e-12);
        assert!((short.pnl_fraction(102.0) + 0.02).abs() < 1e-12);
        assert!((short.unrealized_pnl(98.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ratcheted_long_stop_above_entry_is_still_tracked() {
        let now = Utc::now();
        let mut pos =
            Position::open("AAA", PositionSide::Long, 100.0, 1.0, 97.0, 105.0, now).unwrap();
        pos.stop_loss = 101.5;
        assert!(pos.check_tracked().is_ok());
        pos.stop_loss = 106.0;
        assert!(pos.check_tracked().is_err());
    }
}
