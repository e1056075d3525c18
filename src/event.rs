use std::collections::BTreeMap;

use crate::lifecycle::{CloseInstruction, ExitTrigger};
use crate::model::Position;
use crate::risk_module::RiskReport;

/// Something a cycle wants a human to know about. Rendered to free-form text
/// for the notifier; nothing downstream parses it.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    TrailingStopAdjusted {
        symbol: String,
        old_stop: f64,
        new_stop: f64,
        price: f64,
    },
    StatusUpdate {
        symbol: String,
        entry_price: f64,
        price: f64,
        pnl_pct: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    PositionClosed(CloseInstruction),
    CloseFailed {
        symbol: String,
        error: String,
    },
    PositionDiscovered(Position),
    PositionDropped {
        symbol: String,
    },
    PositionOpened(Position),
    OrderFailed {
        symbol: String,
        error: String,
    },
}

impl MonitorEvent {
    pub fn render(&self) -> String {
        match self {
            Self::TrailingStopAdjusted {
                symbol, new_stop, ..
            } => format!("Trailing stop adjusted for {}: new SL {:.2}", symbol, new_stop),
            Self::StatusUpdate {
                symbol,
                entry_price,
                price,
                pnl_pct,
                stop_loss,
                take_profit,
            } => format!(
                "Update {}\nEntry: {:.2}, Current: {:.2}\nP&L: {:.2}%\nSL: {:.2}, TP: {:.2}",
                symbol, entry_price, price, pnl_pct, stop_loss, take_profit
            ),
            Self::PositionClosed(close) => {
                let marker = match close.trigger {
                    ExitTrigger::StopLoss => "[SL]",
                    ExitTrigger::TakeProfit => "[TP]",
                };
                format!(
                    "{} Automatic close of {} by {}\nEntry: {:.2}, Exit: {:.2}\nP&L: {:.2} USD ({:.2}%)",
                    marker,
                    close.symbol,
                    close.reason(),
                    close.position.entry_price,
                    close.price,
                    close.pnl,
                    close.pnl_pct
                )
            }
            Self::CloseFailed { symbol, error } => {
                format!("Failed to close {}: {}", symbol, error)
            }
            Self::PositionDiscovered(p) => format!(
                "Found active position in {}: {} {} @ {:.2}. SL: {:.2}, TP: {:.2}",
                p.symbol,
                p.side.as_str(),
                p.qty,
                p.entry_price,
                p.stop_loss,
                p.take_profit
            ),
            Self::PositionDropped { symbol } => {
                format!("{} no longer held by the broker, removed from ledger", symbol)
            }
            Self::PositionOpened(p) => format!(
                "Opened {} {} {} @ {:.2}. SL: {:.2}, TP: {:.2}",
                p.side.as_str(),
                p.qty,
                p.symbol,
                p.entry_price,
                p.stop_loss,
                p.take_profit
            ),
            Self::OrderFailed { symbol, error } => {
                format!("Order for {} failed: {}", symbol, error)
            }
        }
    }
}

/// Daily summary of target weights, with the price each forecast implies.
pub fn render_decision_summary(
    report: &RiskReport,
    last_closes: &BTreeMap<String, f64>,
    forecasts: &BTreeMap<String, f64>,
) -> String {
    if let Some(halt) = &report.halted {
        return format!(
            "Trading halted: drawdown {:.1}% on {} exceeds limit {:.1}%",
            halt.drawdown * 100.0,
            halt.symbol,
            halt.limit * 100.0
        );
    }
    if report.weights.is_empty() {
        return "No trades today after risk filters.".to_string();
    }
    let mut message = String::from("Trades for today:\n");
    for (symbol, weight) in &report.weights {
        let direction = if *weight > 0.0 { "BUY" } else { "SELL" };
        let target = match (last_closes.get(symbol), forecasts.get(symbol)) {
            (Some(close), Some(f)) => format!("${:.2}", close * (1.0 + f)),
            _ => "n/a".to_string(),
        };
        message.push_str(&format!(
            "- {}: {} - Target: {} ({:.1}% of capital)\n",
            symbol,
            direction,
            target,
            weight.abs() * 100.0
        ));
    }
    if let Some(symbol) = &report.safety_valve {
        message.push_str(&format!("(safety valve forced {})\n", symbol));
    }
    message
}
