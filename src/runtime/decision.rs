use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::ports::Broker;
use crate::classifier::{classify_all, SignalConfig};
use crate::config::Config;
use crate::error::CycleError;
use crate::event::MonitorEvent;
use crate::execution::{plan_orders, position_from_fill, SkippedTarget};
use crate::fusion::{ForecastProvider, FusionConfig, PredictionFusion};
use crate::ledger::{LedgerStore, LevelPolicy};
use crate::model::{FusedForecast, Position, PricePanel, Signals};
use crate::risk_module::{volatility_and_atr, RiskConfig, RiskGate, RiskInputs, RiskReport};

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub fused: FusedForecast,
    pub signals: Signals,
    pub report: RiskReport,
}

impl DecisionOutcome {
    pub fn forecast_values(&self) -> BTreeMap<String, f64> {
        self.fused
            .iter()
            .map(|(symbol, entry)| (symbol.to_string(), entry.value))
            .collect()
    }
}

/// Fusion, classification and the risk gate wired together. Pure: no I/O.
pub struct DecisionEngine {
    fusion: PredictionFusion,
    signal: SignalConfig,
    gate: RiskGate,
}

impl DecisionEngine {
    pub fn new(fusion: FusionConfig, signal: SignalConfig, risk: RiskConfig) -> Self {
        Self {
            fusion: PredictionFusion::new(fusion),
            signal,
            gate: RiskGate::new(risk),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.fusion.clone(), cfg.signal.clone(), cfg.risk.clone())
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    pub fn run(
        &self,
        panel: &PricePanel,
        providers: &[&dyn ForecastProvider],
        equity: f64,
    ) -> Result<DecisionOutcome, CycleError> {
        let returns = panel.returns();
        let fused = self.fusion.fuse(panel.symbols(), providers, &returns);
        let signals = classify_all(&fused, &self.signal);
        tracing::info!(
            assets = panel.symbols().count(),
            fused = fused.len(),
            actionable = signals.values().filter(|s| s.is_actionable()).count(),
            "Signals classified"
        );

        let report = self.gate.evaluate(&RiskInputs {
            signals: &signals,
            panel,
            equity,
            returns: &returns,
            fused: &fused,
        })?;
        Ok(DecisionOutcome {
            fused,
            signals,
            report,
        })
    }
}

#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub opened: Vec<Position>,
    pub events: Vec<MonitorEvent>,
    pub skipped: Vec<SkippedTarget>,
}

/// Submit entry orders for approved weights and record the fills in the ledger.
/// The ledger is saved once, after every order has been tried.
pub async fn execute_targets<B, S>(
    broker: &B,
    store: &S,
    report: &RiskReport,
    panel: &PricePanel,
    risk: &RiskConfig,
    levels: &LevelPolicy,
    now: DateTime<Utc>,
) -> Result<ExecutionOutcome>
where
    B: Broker,
    S: LedgerStore,
{
    let mut outcome = ExecutionOutcome::default();
    if report.weights.is_empty() {
        return Ok(outcome);
    }

    let mut ledger = store.load().context("failed to load ledger before execution")?;
    let cash = broker
        .account_cash()
        .await
        .context("failed to read account cash")?;

    let mut prices = BTreeMap::new();
    for symbol in report.weights.keys() {
        let live = match broker.latest_price(symbol).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Latest price unavailable, using last close");
                None
            }
        };
        if let Some(price) = live.or_else(|| panel.last_close(symbol).ok()) {
            prices.insert(symbol.clone(), price);
        }
    }

    let plan = plan_orders(&report.weights, cash, &prices, &ledger);
    outcome.skipped = plan.skipped;

    for order in plan.orders {
        let ack = match broker.submit_market_order(&order).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(symbol = %order.symbol, side = %order.side, qty = order.qty, error = %e, "Entry order failed");
                outcome.events.push(MonitorEvent::OrderFailed {
                    symbol: order.symbol.clone(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        };

        let fill_price = ack
            .filled_avg_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(order.reference_price);
        let qty = ack.qty.filter(|q| *q > 0.0).unwrap_or(order.qty);
        let atr = panel
            .closes(&order.symbol)
            .ok()
            .and_then(|closes| volatility_and_atr(&order.symbol, closes, risk.volatility_window).ok())
            .map(|(_, atr)| atr);

        let position = position_from_fill(&order, fill_price, qty, levels, atr, now)
            .and_then(|p| ledger.upsert(p.clone()).map(|_| p));
        match position {
            Ok(position) => {
                tracing::info!(
                    symbol = %position.symbol,
                    order_id = %ack.id,
                    status = %ack.status,
                    qty,
                    entry = fill_price,
                    stop_loss = position.stop_loss,
                    take_profit = position.take_profit,
                    "Position opened"
                );
                outcome.events.push(MonitorEvent::PositionOpened(position.clone()));
                outcome.opened.push(position);
            }
            Err(e) => {
                // The order is live at the broker; reconciliation will pick it up.
                tracing::error!(symbol = %order.symbol, error = %e, "Filled order could not be tracked");
                outcome.events.push(MonitorEvent::OrderFailed {
                    symbol: order.symbol.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if !outcome.opened.is_empty() {
        store.save(&ledger).context("failed to save ledger after execution")?;
    }
    Ok(outcome)
}
