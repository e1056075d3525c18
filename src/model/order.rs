use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_alpaca_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A whole-share market order derived from a target weight or a close instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    /// Price the plan was sized against.
    pub reference_price: f64,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
    pub qty: Option<f64>,
    pub filled_avg_price: Option<f64>,
}
