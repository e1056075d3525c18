use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::ports::{notify_best_effort, Broker, Notifier};
use crate::config::Config;
use crate::event::MonitorEvent;
use crate::ledger::{LedgerStore, LevelPolicy, PositionLedger, ReconcileReport};
use crate::lifecycle::{MonitorConfig, MonitorReport, StopMonitor};
use crate::model::BrokerPosition;
use crate::risk_module::volatility_and_atr;

#[derive(Debug, Default)]
pub struct MonitorOutcome {
    pub reconcile: ReconcileReport,
    pub market_open: bool,
    /// `None` when the market was closed and no pass ran.
    pub pass: Option<MonitorReport>,
    /// Every event produced this cycle, in the order it was notified.
    pub events: Vec<MonitorEvent>,
    pub saved: bool,
    pub tracked_after: usize,
}

/// Load, reconcile, evaluate, dispatch closes, persist once, then notify.
pub struct MonitorCycle {
    monitor: StopMonitor,
    levels: LevelPolicy,
    volatility_window: usize,
}

impl MonitorCycle {
    pub fn new(monitor: MonitorConfig, levels: LevelPolicy, volatility_window: usize) -> Self {
        Self {
            monitor: StopMonitor::new(monitor),
            levels,
            volatility_window: volatility_window.max(2),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.monitor.clone(),
            cfg.levels.clone(),
            cfg.risk.volatility_window,
        )
    }

    pub async fn run<B, S, N>(
        &self,
        broker: &B,
        store: &S,
        notifier: &N,
        now: DateTime<Utc>,
    ) -> Result<MonitorOutcome>
    where
        B: Broker,
        S: LedgerStore,
        N: Notifier,
    {
        let mut ledger = store.load().context("failed to load position ledger")?;
        let held = broker
            .held_positions()
            .await
            .context("failed to list broker positions")?;

        let atr_by_symbol = self.untracked_atr(broker, &ledger, &held).await;
        let reconcile = ledger.reconcile(&held, &self.levels, &atr_by_symbol, now);
        let mut dirty = !reconcile.is_noop();

        let mut outcome = MonitorOutcome::default();
        outcome
            .events
            .extend(reconcile.added.iter().cloned().map(MonitorEvent::PositionDiscovered));
        outcome
            .events
            .extend(reconcile.dropped.iter().map(|p| MonitorEvent::PositionDropped {
                symbol: p.symbol.clone(),
            }));
        outcome.reconcile = reconcile;

        outcome.market_open = broker
            .is_market_open()
            .await
            .context("failed to read market clock")?;

        if outcome.market_open {
            let prices = self.latest_prices(broker, &ledger).await;
            let pass = self.monitor.run_pass(&mut ledger, &prices, now);
            dirty |= pass.mutated();
            outcome.events.extend(pass.events.iter().cloned());

            for close in &pass.closes {
                match broker.submit_market_order(&close.order_plan()).await {
                    Ok(ack) => {
                        tracing::info!(
                            symbol = %close.symbol,
                            reason = close.reason(),
                            order_id = %ack.id,
                            status = %ack.status,
                            "Close order submitted"
                        );
                        outcome.events.push(MonitorEvent::PositionClosed(close.clone()));
                    }
                    Err(e) => {
                        tracing::error!(symbol = %close.symbol, error = %e, "Close order failed, restoring position");
                        if let Err(restore) = ledger.reinstate(close.position.clone()) {
                            tracing::error!(symbol = %close.symbol, error = %restore, "Could not restore position");
                        }
                        outcome.events.push(MonitorEvent::CloseFailed {
                            symbol: close.symbol.clone(),
                            error: format!("{:#}", e),
                        });
                    }
                }
            }
            outcome.pass = Some(pass);
        } else {
            tracing::info!(tracked = ledger.len(), "Market closed, positions not evaluated");
        }

        if dirty {
            store.save(&ledger).context("failed to save position ledger")?;
            outcome.saved = true;
        }
        outcome.tracked_after = ledger.len();

        for event in &outcome.events {
            notify_best_effort(notifier, &event.render()).await;
        }
        Ok(outcome)
    }

    /// ATR-proxy for broker holdings the ledger will have to open a record for.
    /// Failures leave the symbol out so the level policy falls back to percentages.
    async fn untracked_atr<B: Broker>(
        &self,
        broker: &B,
        ledger: &PositionLedger,
        held: &[BrokerPosition],
    ) -> HashMap<String, f64> {
        let mut atr = HashMap::new();
        for row in held {
            let symbol = row.symbol.trim().to_ascii_uppercase();
            if ledger.get(&symbol).is_some_and(|p| p.side == row.side) {
                continue;
            }
            let bars = match broker.daily_closes(&symbol, self.volatility_window + 10).await {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Daily bars unavailable for ATR");
                    continue;
                }
            };
            let closes: Vec<f64> = bars.into_iter().map(|(_, c)| c).collect();
            match volatility_and_atr(&symbol, &closes, self.volatility_window) {
                Ok((_, value)) => {
                    atr.insert(symbol, value);
                }
                Err(fault) => {
                    tracing::warn!(symbol = %symbol, error = %fault, "ATR-proxy unavailable, using fixed levels");
                }
            }
        }
        atr
    }

    async fn latest_prices<B: Broker>(&self, broker: &B, ledger: &PositionLedger) -> HashMap<String, f64> {
        let mut prices = HashMap::new();
        for symbol in ledger.symbols() {
            match broker.latest_price(&symbol).await {
                Ok(Some(price)) => {
                    prices.insert(symbol, price);
                }
                Ok(None) => tracing::warn!(symbol = %symbol, "No live price"),
                Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Live price request failed"),
            }
        }
        prices
    }
}
