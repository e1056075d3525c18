use chrono::{DateTime, Utc};

use crate::model::{OrderPlan, OrderSide, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    TakeProfit,
}

/// Instruction for the execution collaborator to flatten one position.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInstruction {
    pub symbol: String,
    pub trigger: ExitTrigger,
    pub side: OrderSide,
    pub qty: f64,
    pub price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub decided_at: DateTime<Utc>,
    /// The ledger record removed by this close, kept so a failed submission
    /// can put it back.
    pub position: Position,
}

impl CloseInstruction {
    pub fn reason(&self) -> &'static str {
        ExitOrchestrator::decide(self.trigger)
    }

    pub fn order_plan(&self) -> OrderPlan {
        OrderPlan {
            symbol: self.symbol.clone(),
            side: self.side,
            qty: self.qty,
            reference_price: self.price,
        }
    }
}

pub struct ExitOrchestrator;

impl ExitOrchestrator {
    pub fn decide(trigger: ExitTrigger) -> &'static str {
        match trigger {
            ExitTrigger::StopLoss => "stop-loss",
            ExitTrigger::TakeProfit => "take-profit",
        }
    }

    /// Which protective level `price` has crossed, if any. Stop-loss wins when
    /// both conditions hold at once.
    pub fn trigger_for(position: &Position, price: f64) -> Option<ExitTrigger> {
        if position.stop_loss_hit(price) {
            Some(ExitTrigger::StopLoss)
        } else if position.take_profit_hit(price) {
            Some(ExitTrigger::TakeProfit)
        } else {
            None
        }
    }

    pub fn close_instruction(
        position: Position,
        trigger: ExitTrigger,
        price: f64,
        now: DateTime<Utc>,
    ) -> CloseInstruction {
        CloseInstruction {
            symbol: position.symbol.clone(),
            trigger,
            side: position.side.close_side(),
            qty: position.qty,
            price,
            pnl: position.unrealized_pnl(price),
            pnl_pct: position.pnl_fraction(price) * 100.0,
            decided_at: now,
            position,
        }
    }
}
