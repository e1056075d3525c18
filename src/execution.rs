use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::CycleError;
use crate::ledger::{LevelPolicy, PositionLedger};
use crate::model::{OrderPlan, OrderSide, Position, PositionSide};

/// A target weight that did not become an order.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTarget {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub orders: Vec<OrderPlan>,
    pub skipped: Vec<SkippedTarget>,
}

/// Turn signed target weights into whole-share market orders.
///
/// `qty = floor(cash * |weight| / price)`. Symbols the ledger already tracks
/// are left alone; the monitor owns their exits.
pub fn plan_orders(
    weights: &BTreeMap<String, f64>,
    cash: f64,
    prices: &BTreeMap<String, f64>,
    ledger: &PositionLedger,
) -> ExecutionPlan {
    let mut orders = Vec::new();
    let mut skipped = Vec::new();
    let mut skip = |symbol: &str, reason: String| {
        tracing::info!(symbol = %symbol, reason = %reason, "Target not executed");
        skipped.push(SkippedTarget {
            symbol: symbol.to_string(),
            reason,
        });
    };

    for (symbol, weight) in weights {
        if ledger.contains(symbol) {
            skip(symbol, "position already tracked".to_string());
            continue;
        }
        if !weight.is_finite() || *weight == 0.0 {
            skip(symbol, format!("weight {} not tradable", weight));
            continue;
        }
        let Some(price) = prices.get(symbol).copied().filter(|p| p.is_finite() && *p > 0.0) else {
            skip(symbol, "no usable reference price".to_string());
            continue;
        };
        if !(cash > 0.0) {
            skip(symbol, format!("cash {:.2} not positive", cash));
            continue;
        }

        let qty = (cash * weight.abs() / price).floor();
        if qty < 1.0 {
            skip(
                symbol,
                format!(
                    "qty too small ({:.2} x {:.4} / {:.2})",
                    cash,
                    weight.abs(),
                    price
                ),
            );
            continue;
        }
        let side = if *weight > 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        orders.push(OrderPlan {
            symbol: symbol.clone(),
            side,
            qty,
            reference_price: price,
        });
    }
    ExecutionPlan { orders, skipped }
}

/// Ledger record for a filled entry order, with levels placed by `policy`.
pub fn position_from_fill(
    plan: &OrderPlan,
    fill_price: f64,
    qty: f64,
    policy: &LevelPolicy,
    atr_proxy: Option<f64>,
    now: DateTime<Utc>,
) -> Result<Position, CycleError> {
    let side = PositionSide::from_order_side(plan.side);
    let (stop_loss, take_profit) = policy.levels(side, fill_price, atr_proxy);
    Position::open(
        &plan.symbol,
        side,
        fill_price,
        qty,
        stop_loss,
        take_profit,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn sizes_whole_shares_and_signs_side() {
        let w = weights(&[("AAA", 0.25), ("BBB", -0.10)]);
        let prices = weights(&[("AAA", 100.0), ("BBB", 30.0)]);
        let plan = plan_orders(&w, 10_000.0, &prices, &PositionLedger::new());
        assert_eq!(plan.orders.len(), 2);
        assert_eq!(plan.orders[0].side, OrderSide::Buy);
        assert_eq!(plan.orders[0].qty, 25.0);
        assert_eq!(plan.orders[1].side, OrderSide::Sell);
        assert_eq!(plan.orders[1].qty, 33.0);
    }

    #[test]
    fn skips_tracked_and_unaffordable() {
        let now = Utc::now();
        let tracked =
            Position::open("AAA", PositionSide::Long, 100.0, 1.0, 97.0, 105.0, now).unwrap();
        let ledger = PositionLedger::from_positions([tracked]).unwrap();
        let w = weights(&[("AAA", 0.25), ("BBB", 0.01)]);
        let prices = weights(&[("AAA", 100.0), ("BBB", 500.0)]);
        let plan = plan_orders(&w, 10_000.0, &prices, &ledger);
        assert!(plan.orders.is_empty());
        assert_eq!(plan.skipped.len(), 2);
    }

    #[test]
    fn fill_uses_atr_levels() {
        let order = OrderPlan {
            symbol: "AAA".to_string(),
            side: OrderSide::Buy,
            qty: 10.0,
            reference_price: 100.0,
        };
        let pos =
            position_from_fill(&order, 100.0, 10.0, &LevelPolicy::default(), Some(1.0), Utc::now())
                .unwrap();
        assert!((pos.stop_loss - 98.0).abs() < 1e-9);
        assert!((pos.take_profit - 103.0).abs() < 1e-9);
    }
}
