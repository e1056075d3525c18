use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::model::{BrokerPosition, OrderAck, OrderPlan};
use crate::notify::TelegramNotifier;

/// Brokerage operations the cycles need. Implemented by the Alpaca client and
/// by in-memory fakes in tests.
#[allow(async_fn_in_trait)]
pub trait Broker {
    async fn account_equity(&self) -> Result<f64>;
    /// Cash available for new entries; order sizing runs against this.
    async fn account_cash(&self) -> Result<f64>;
    async fn held_positions(&self) -> Result<Vec<BrokerPosition>>;
    /// Last trade price, `None` when the venue has nothing usable.
    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>>;
    /// Daily closes, oldest first, at most `days` bars.
    async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<(DateTime<Utc>, f64)>>;
    async fn is_market_open(&self) -> Result<bool>;
    async fn submit_market_order(&self, plan: &OrderPlan) -> Result<OrderAck>;
}

#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Writes notifications to the log. Used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        tracing::info!(message = %text, "Notification");
        Ok(())
    }
}

/// Notifier picked at startup from configuration.
pub enum AnyNotifier {
    Telegram(TelegramNotifier),
    Log(LogNotifier),
}

impl Notifier for AnyNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        match self {
            Self::Telegram(n) => n.notify(text).await,
            Self::Log(n) => n.notify(text).await,
        }
    }
}

/// Deliver `text`, logging instead of failing when delivery does not work.
pub async fn notify_best_effort<N: Notifier>(notifier: &N, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Err(e) = notifier.notify(text).await {
        tracing::warn!(error = %e, "Notification delivery failed");
    }
}
