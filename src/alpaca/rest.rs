use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AlpacaConfig;
use crate::error::AppError;
use crate::model::{BrokerPosition, OrderAck, OrderPlan, PositionSide};
use crate::runtime::ports::Broker;

pub struct AlpacaRestClient {
    http: reqwest::Client,
    trading_base_url: String,
    data_base_url: String,
    feed: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccountResponse {
    equity: String,
    cash: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    qty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPositionResponse {
    symbol: String,
    qty: String,
    side: String,
    avg_entry_price: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaClockResponse {
    is_open: bool,
}

impl AlpacaRestClient {
    pub fn new(
        trading_base_url: &str,
        data_base_url: &str,
        api_key: &str,
        api_secret: &str,
        feed: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("APCA-API-KEY-ID", HeaderValue::from_str(api_key)?);
        headers.insert("APCA-API-SECRET-KEY", HeaderValue::from_str(api_secret)?);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build Alpaca HTTP client")?;
        Ok(Self {
            http,
            trading_base_url: trading_base_url.trim_end_matches('/').to_string(),
            data_base_url: data_base_url.trim_end_matches('/').to_string(),
            feed: feed.to_string(),
        })
    }

    pub fn from_config(cfg: &AlpacaConfig) -> Result<Self> {
        Self::new(
            &cfg.trading_base_url,
            &cfg.data_base_url,
            &cfg.api_key,
            &cfg.api_secret,
            &cfg.feed,
        )
    }

    fn compact_error_body(body: &str) -> String {
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() > 180 {
            let cut = (0..=180)
                .rev()
                .find(|i| normalized.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}...", &normalized[..cut])
        } else {
            normalized
        }
    }

    async fn api_error(response: reqwest::Response) -> anyhow::Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        AppError::AlpacaApi {
            status,
            msg: Self::compact_error_body(&body),
        }
        .into()
    }

    pub async fn account(&self) -> Result<AccountSnapshot> {
        let url = format!("{}/v2/account", self.trading_base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("alpaca get account HTTP failed")?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let account: AlpacaAccountResponse = response
            .json()
            .await
            .context("alpaca get account JSON parse failed")?;
        Ok(AccountSnapshot {
            equity: parse_decimal("equity", &account.equity)?,
            cash: parse_decimal("cash", &account.cash)?,
        })
    }

    pub async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        let url = format!("{}/v2/positions", self.trading_base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("alpaca list positions HTTP failed")?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let rows: Vec<AlpacaPositionResponse> = response
            .json()
            .await
            .context("alpaca list positions JSON parse failed")?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(side) = PositionSide::from_broker_str(&row.side) else {
                tracing::warn!(symbol = %row.symbol, side = %row.side, "Unknown position side, skipping");
                continue;
            };
            positions.push(BrokerPosition {
                symbol: row.symbol.to_ascii_uppercase(),
                qty: parse_decimal("qty", &row.qty)?.abs(),
                side,
                avg_entry_price: parse_decimal("avg_entry_price", &row.avg_entry_price)?,
            });
        }
        Ok(positions)
    }

    pub async fn get_latest_trade(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!("{}/v2/stocks/trades/latest", self.data_base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("symbols", symbol), ("feed", self.feed.as_str())])
            .send()
            .await
            .context("alpaca latest trade HTTP failed")?;
        if !response.status().is_success() {
            // Permission or symbol mismatches land here; the caller falls back to bars.
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = %status,
                symbol = %symbol,
                detail = %Self::compact_error_body(&body),
                "alpaca latest trade returned non-success"
            );
            return Ok(None);
        }
        let root: Value = response
            .json()
            .await
            .context("alpaca latest trade JSON parse failed")?;

        let price = root
            .get("trades")
            .and_then(|t| t.get(symbol))
            .or_else(|| root.get("trade"))
            .and_then(|t| t.get("p"))
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite() && *p > 0.0);
        Ok(price)
    }

    /// Daily bars over a calendar window wide enough to hold `days` sessions.
    pub async fn get_daily_bars(&self, symbol: &str, days: usize) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let days = days.clamp(1, 10_000);
        let start = Utc::now() - Duration::days((days as i64 * 7) / 5 + 10);
        let start_s = start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let limit_s = days.to_string();
        let endpoint = format!("{}/v2/stocks/bars", self.data_base_url);

        let root: Value = self
            .http
            .get(&endpoint)
            .query(&[
                ("symbols", symbol),
                ("timeframe", "1Day"),
                ("start", start_s.as_str()),
                ("limit", limit_s.as_str()),
                // Newest first so the limit keeps the latest sessions; re-sorted below.
                ("sort", "desc"),
                ("adjustment", "all"),
                ("feed", self.feed.as_str()),
            ])
            .send()
            .await
            .context("alpaca get_daily_bars HTTP failed")?
            .error_for_status()
            .context("alpaca get_daily_bars returned error status")?
            .json()
            .await
            .context("alpaca get_daily_bars JSON parse failed")?;

        let bars = root
            .get("bars")
            .and_then(|b| b.get(symbol))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut closes = Vec::with_capacity(bars.len());
        for bar in bars {
            let ts = bar.get("t").and_then(Value::as_str).unwrap_or_default();
            let Some(close) = bar.get("c").and_then(Value::as_f64) else {
                continue;
            };
            closes.push((parse_rfc3339(ts)?, close));
        }
        closes.sort_by_key(|(t, _)| *t);
        Ok(closes)
    }

    pub async fn get_clock(&self) -> Result<bool> {
        let url = format!("{}/v2/clock", self.trading_base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("alpaca clock HTTP failed")?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let clock: AlpacaClockResponse = response
            .json()
            .await
            .context("alpaca clock JSON parse failed")?;
        Ok(clock.is_open)
    }

    pub async fn place_market_order_qty(
        &self,
        symbol: &str,
        side: &str,
        qty: f64,
    ) -> Result<OrderAck> {
        if !(qty > 0.0) {
            bail!("refusing to submit {} order for {} with qty {}", side, symbol, qty);
        }
        let url = format!("{}/v2/orders", self.trading_base_url);
        let qty_s = if qty.fract() == 0.0 {
            format!("{}", qty as u64)
        } else {
            format!("{:.4}", qty)
        };
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "market",
            "time_in_force": "day",
            "qty": qty_s,
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("alpaca place market qty order HTTP failed")?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let order: AlpacaOrderResponse = response
            .json()
            .await
            .context("alpaca order response parse failed")?;
        tracing::info!(symbol = %symbol, side = %side, qty, order_id = %order.id, status = %order.status, "Order accepted");
        Ok(OrderAck {
            id: order.id,
            status: order.status,
            qty: order.qty.and_then(|v| v.parse::<f64>().ok()),
            filled_avg_price: order.filled_avg_price.and_then(|v| v.parse::<f64>().ok()),
        })
    }
}

impl Broker for AlpacaRestClient {
    async fn account_equity(&self) -> Result<f64> {
        Ok(self.account().await?.equity)
    }

    async fn account_cash(&self) -> Result<f64> {
        Ok(self.account().await?.cash)
    }

    async fn held_positions(&self) -> Result<Vec<BrokerPosition>> {
        self.list_positions().await
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>> {
        if let Some(price) = self.get_latest_trade(symbol).await? {
            return Ok(Some(price));
        }
        let bars = self.get_daily_bars(symbol, 1).await?;
        Ok(bars.last().map(|(_, c)| *c).filter(|c| *c > 0.0))
    }

    async fn daily_closes(&self, symbol: &str, days: usize) -> Result<Vec<(DateTime<Utc>, f64)>> {
        self.get_daily_bars(symbol, days).await
    }

    async fn is_market_open(&self) -> Result<bool> {
        self.get_clock().await
    }

    async fn submit_market_order(&self, plan: &OrderPlan) -> Result<OrderAck> {
        self.place_market_order_qty(&plan.symbol, plan.side.as_alpaca_str(), plan.qty)
            .await
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("invalid decimal for {}: '{}'", field, raw))
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    let dt =
        DateTime::parse_from_rfc3339(s).with_context(|| format!("invalid timestamp '{}'", s))?;
    Ok(dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_error_body_collapses_whitespace_and_truncates() {
        assert_eq!(
            AlpacaRestClient::compact_error_body("  {\"message\":\n  \"forbidden\"}  "),
            "{\"message\": \"forbidden\"}"
        );
        let long = "x".repeat(400);
        assert_eq!(AlpacaRestClient::compact_error_body(&long).len(), 183);
    }

    #[test]
    fn parses_alpaca_timestamps() {
        let t = parse_rfc3339("2024-03-01T05:00:00Z").unwrap();
        assert_eq!(t.timestamp(), 1_709_269_200);
        assert!(parse_rfc3339("yesterday").is_err());
        assert!(parse_decimal("qty", " 12.5 ").is_ok());
    }
}
