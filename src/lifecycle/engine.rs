use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::exit_orchestrator::{CloseInstruction, ExitOrchestrator};
use crate::error::AssetFault;
use crate::event::MonitorEvent;
use crate::ledger::PositionLedger;
use crate::model::{Position, PositionSide};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Favorable move from entry that arms the trailing stop.
    pub trailing_activation: f64,
    /// Profit the tightened stop locks in, as a fraction of entry.
    pub trailing_lock_in: f64,
    pub status_interval_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            trailing_activation: 0.03,
            trailing_lock_in: 0.015,
            status_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    pub closes: Vec<CloseInstruction>,
    pub events: Vec<MonitorEvent>,
    pub skipped: Vec<AssetFault>,
    pub evaluated: usize,
}

impl MonitorReport {
    /// True when the pass changed anything the ledger persists.
    pub fn mutated(&self) -> bool {
        !self.closes.is_empty()
            || self.events.iter().any(|e| {
                matches!(
                    e,
                    MonitorEvent::TrailingStopAdjusted { .. } | MonitorEvent::StatusUpdate { .. }
                )
            })
    }
}

pub struct StopMonitor {
    cfg: MonitorConfig,
}

impl StopMonitor {
    pub fn new(cfg: MonitorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.cfg
    }

    /// One pass over every tracked position. Triggered positions are removed
    /// from the ledger and returned as close instructions.
    pub fn run_pass(
        &self,
        ledger: &mut PositionLedger,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> MonitorReport {
        let mut report = MonitorReport::default();

        for symbol in ledger.symbols() {
            let price = match prices.get(&symbol).copied() {
                None => {
                    report.skipped.push(AssetFault::MissingPrices(symbol));
                    continue;
                }
                Some(p) if !p.is_finite() || p <= 0.0 => {
                    report.skipped.push(AssetFault::NonFinite {
                        symbol,
                        what: "live price",
                    });
                    continue;
                }
                Some(p) => p,
            };
            report.evaluated += 1;

            let Some(position) = ledger.get_mut(&symbol) else {
                continue;
            };

            if let Some(trigger) = ExitOrchestrator::trigger_for(position, price) {
                let Some(removed) = ledger.remove(&symbol) else {
                    continue;
                };
                let close = ExitOrchestrator::close_instruction(removed, trigger, price, now);
                tracing::info!(
                    symbol = %close.symbol,
                    reason = close.reason(),
                    price,
                    pnl = close.pnl,
                    pnl_pct = close.pnl_pct,
                    "Protective level triggered"
                );
                report.closes.push(close);
                continue;
            }

            if let Some((old_stop, new_stop)) = self.ratchet(position, price) {
                tracing::info!(symbol = %symbol, old_stop, new_stop, price, "Trailing stop tightened");
                report.events.push(MonitorEvent::TrailingStopAdjusted {
                    symbol: symbol.clone(),
                    old_stop,
                    new_stop,
                    price,
                });
            }

            if now - position.last_update >= self.status_interval() {
                let pnl_pct = position.pnl_fraction(price) * 100.0;
                tracing::info!(symbol = %symbol, price, pnl_pct, "Position status");
                report.events.push(MonitorEvent::StatusUpdate {
                    symbol: symbol.clone(),
                    entry_price: position.entry_price,
                    price,
                    pnl_pct,
                    stop_loss: position.stop_loss,
                    take_profit: position.take_profit,
                });
                position.last_update = now;
            }
        }
        report
    }

    fn status_interval(&self) -> Duration {
        Duration::try_minutes(self.cfg.status_interval_minutes).unwrap_or(Duration::MAX)
    }

    /// Tighten the stop once price has moved far enough in the position's
    /// favor. A long stop only rises and a short stop only falls.
    pub fn ratchet(&self, position: &mut Position, price: f64) -> Option<(f64, f64)> {
        let entry = position.entry_price;
        let old_stop = position.stop_loss;
        let candidate = match position.side {
            PositionSide::Long => {
                if price < entry * (1.0 + self.cfg.trailing_activation) {
                    return None;
                }
                let candidate = entry * (1.0 + self.cfg.trailing_lock_in);
                if candidate <= old_stop || candidate >= position.take_profit {
                    return None;
                }
                candidate
            }
            PositionSide::Short => {
                if price > entry * (1.0 - self.cfg.trailing_activation) {
                    return None;
                }
                let candidate = entry * (1.0 - self.cfg.trailing_lock_in);
                if candidate >= old_stop || candidate <= position.take_profit {
                    return None;
                }
                candidate
            }
        };
        position.stop_loss = candidate;
        Some((old_stop, candidate))
    }
}
