pub mod forecast;
pub mod order;
pub mod panel;
pub mod position;
pub mod signal;

pub use forecast::{ForecastSet, FusedEntry, FusedForecast};
pub use order::{OrderAck, OrderPlan, OrderSide};
pub use panel::{PricePanel, ReturnMatrix};
pub use position::{BrokerPosition, Position, PositionSide};
pub use signal::{Signal, Signals};
