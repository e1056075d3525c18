use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{AssetFault, CycleError};
use crate::indicator::{simple_returns, worst_latest_drawdown, RollingWindow};
use crate::model::{FusedForecast, PricePanel, ReturnMatrix, Signal, Signals};

/// Stable taxonomy for rejection reasons emitted by the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReasonCode {
    RiskNoPriceData,
    RiskMisaligned,
    RiskInsufficientHistory,
    RiskNonFinite,
    RiskVolatilityCap,
    RiskTrendAgainstBuy,
    RiskTrendAgainstSell,
    RiskNonPositiveStopDistance,
}

impl RejectionReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RiskNoPriceData => "risk.no_price_data",
            Self::RiskMisaligned => "risk.misaligned",
            Self::RiskInsufficientHistory => "risk.insufficient_history",
            Self::RiskNonFinite => "risk.non_finite",
            Self::RiskVolatilityCap => "risk.volatility_cap",
            Self::RiskTrendAgainstBuy => "risk.trend_against_buy",
            Self::RiskTrendAgainstSell => "risk.trend_against_sell",
            Self::RiskNonPositiveStopDistance => "risk.non_positive_stop_distance",
        }
    }

    pub fn from_fault(fault: &AssetFault) -> Self {
        match fault {
            AssetFault::MissingPrices(_) => Self::RiskNoPriceData,
            AssetFault::Misaligned { .. } => Self::RiskMisaligned,
            AssetFault::InsufficientHistory { .. } => Self::RiskInsufficientHistory,
            AssetFault::NonFinite { .. } => Self::RiskNonFinite,
            AssetFault::NonPositiveStopDistance { .. } => Self::RiskNonPositiveStopDistance,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub symbol: String,
    pub signal: Signal,
    pub reason_code: RejectionReasonCode,
    /// Human-readable rejection reason.
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyValveConfig {
    pub enabled: bool,
    /// Weight magnitude forced through when every candidate was filtered out.
    pub weight: f64,
}

impl Default for SafetyValveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_drawdown_allowed: f64,
    pub volatility_cap: f64,
    pub trend_tolerance: f64,
    pub risk_per_trade_fraction: f64,
    pub max_position_weight: f64,
    pub volatility_window: usize,
    pub trend_window: usize,
    pub safety_valve: SafetyValveConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_allowed: 0.20,
            volatility_cap: 0.05,
            trend_tolerance: 0.02,
            risk_per_trade_fraction: 0.02,
            max_position_weight: 0.25,
            volatility_window: 10,
            trend_window: 50,
            safety_valve: SafetyValveConfig::default(),
        }
    }
}

/// Indicators for one asset at the latest period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetRiskProfile {
    pub volatility: f64,
    /// Volatility times latest close, standing in for ATR on close-only data.
    pub atr_proxy: f64,
    pub last_close: f64,
    pub moving_average: Option<f64>,
}

/// Portfolio-wide stop for the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioHalt {
    pub symbol: String,
    pub drawdown: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RiskReport {
    /// Signed target weights; negative means short/sell.
    pub weights: BTreeMap<String, f64>,
    pub halted: Option<PortfolioHalt>,
    pub rejections: Vec<Rejection>,
    /// Symbol forced through by the safety valve, if it fired.
    pub safety_valve: Option<String>,
}

impl RiskReport {
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }
}

pub struct RiskInputs<'a> {
    pub signals: &'a Signals,
    pub panel: &'a PricePanel,
    pub equity: f64,
    pub returns: &'a ReturnMatrix,
    pub fused: &'a FusedForecast,
}

/// `min(max_weight, (risk / atr) * price / equity)`, or `None` when the
/// inputs cannot produce a safe size.
pub fn sizing_weight(
    equity: f64,
    atr_proxy: f64,
    price: f64,
    risk_fraction: f64,
    max_weight: f64,
) -> Option<f64> {
    if !(atr_proxy > 0.0) || !(equity > 0.0) || !price.is_finite() {
        return None;
    }
    let risk_per_trade = risk_fraction * equity;
    let implied_shares = risk_per_trade / atr_proxy;
    let weight = (implied_shares * price / equity).min(max_weight);
    if weight.is_finite() {
        Some(weight.max(0.0))
    } else {
        None
    }
}

/// Sample std of the last `window` simple returns, and that volatility times
/// the latest close. Close-only data has no true range, so this stands in for ATR.
pub fn volatility_and_atr(
    symbol: &str,
    closes: &[f64],
    window: usize,
) -> Result<(f64, f64), AssetFault> {
    let window = window.max(2);
    if closes.len() < window + 1 {
        return Err(AssetFault::InsufficientHistory {
            symbol: symbol.to_string(),
            needed: window + 1,
            available: closes.len(),
        });
    }
    let returns = simple_returns(&closes[closes.len() - window - 1..]);
    let volatility = RollingWindow::from_tail(&returns, window)
        .sample_std()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AssetFault::NonFinite {
            symbol: symbol.to_string(),
            what: "volatility",
        })?;
    let atr = volatility * closes[closes.len() - 1];
    if !atr.is_finite() {
        return Err(AssetFault::NonFinite {
            symbol: symbol.to_string(),
            what: "atr proxy",
        });
    }
    Ok((volatility, atr))
}

pub struct RiskGate {
    cfg: RiskConfig,
}

impl RiskGate {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    /// Circuit breaker, per-asset filters and sizing, then the safety valve.
    /// Only a bad equity value aborts; asset faults are recorded and skipped.
    pub fn evaluate(&self, inputs: &RiskInputs<'_>) -> Result<RiskReport, CycleError> {
        if !inputs.equity.is_finite() || inputs.equity <= 0.0 {
            return Err(CycleError::InvalidEquity(inputs.equity));
        }

        let mut report = RiskReport::default();
        if let Some(halt) = self.check_drawdown(inputs.returns) {
            tracing::warn!(
                symbol = %halt.symbol,
                drawdown = halt.drawdown,
                limit = halt.limit,
                "Portfolio drawdown limit breached, rejecting all signals"
            );
            report.halted = Some(halt);
            return Ok(report);
        }

        let mut actionable = 0usize;
        for (symbol, signal) in inputs.signals {
            if !signal.is_actionable() {
                continue;
            }
            actionable += 1;
            match self.evaluate_asset(symbol, *signal, inputs.panel, inputs.equity) {
                Ok(weight) => {
                    tracing::info!(symbol = %symbol, signal = %signal, weight, "Signal approved");
                    report.weights.insert(symbol.clone(), weight);
                }
                Err(rejection) => {
                    tracing::info!(
                        symbol = %symbol,
                        signal = %signal,
                        reason_code = rejection.reason_code.as_str(),
                        reason = %rejection.reason,
                        "Signal rejected"
                    );
                    report.rejections.push(rejection);
                }
            }
        }

        if actionable > 0 && report.weights.is_empty() && self.cfg.safety_valve.enabled {
            if let Some((symbol, weight)) = self.safety_valve(inputs) {
                tracing::warn!(symbol = %symbol, weight, "Safety valve forcing reduced position");
                report.weights.insert(symbol.clone(), weight);
                report.safety_valve = Some(symbol);
            }
        }
        Ok(report)
    }

    pub fn check_drawdown(&self, returns: &ReturnMatrix) -> Option<PortfolioHalt> {
        let (symbol, drawdown) = worst_latest_drawdown(returns)?;
        if drawdown > self.cfg.max_drawdown_allowed {
            Some(PortfolioHalt {
                symbol,
                drawdown,
                limit: self.cfg.max_drawdown_allowed,
            })
        } else {
            None
        }
    }

    pub fn profile(&self, symbol: &str, panel: &PricePanel) -> Result<AssetRiskProfile, AssetFault> {
        let closes = panel.closes(symbol)?;
        let (volatility, atr_proxy) =
            volatility_and_atr(symbol, closes, self.cfg.volatility_window)?;

        let trend_window = self.cfg.trend_window.max(1);
        let moving_average = if closes.len() >= trend_window {
            RollingWindow::from_tail(closes, trend_window).mean()
        } else {
            None
        };

        Ok(AssetRiskProfile {
            volatility,
            atr_proxy,
            last_close: closes[closes.len() - 1],
            moving_average,
        })
    }

    fn evaluate_asset(
        &self,
        symbol: &str,
        signal: Signal,
        panel: &PricePanel,
        equity: f64,
    ) -> Result<f64, Rejection> {
        let reject = |reason_code: RejectionReasonCode, reason: String| Rejection {
            symbol: symbol.to_string(),
            signal,
            reason_code,
            reason,
        };
        let from_fault =
            |fault: AssetFault| reject(RejectionReasonCode::from_fault(&fault), fault.to_string());

        let profile = self.profile(symbol, panel).map_err(from_fault)?;

        if profile.volatility > self.cfg.volatility_cap {
            return Err(reject(
                RejectionReasonCode::RiskVolatilityCap,
                format!(
                    "volatility {:.4} above cap {:.4}",
                    profile.volatility, self.cfg.volatility_cap
                ),
            ));
        }

        if let Some(ma) = profile.moving_average {
            let price = profile.last_close;
            let tol = self.cfg.trend_tolerance;
            if signal == Signal::Buy && price < ma * (1.0 - tol) {
                return Err(reject(
                    RejectionReasonCode::RiskTrendAgainstBuy,
                    format!("price {:.2} below MA {:.2} less {:.1}%", price, ma, tol * 100.0),
                ));
            }
            if signal == Signal::Sell && price > ma * (1.0 + tol) {
                return Err(reject(
                    RejectionReasonCode::RiskTrendAgainstSell,
                    format!("price {:.2} above MA {:.2} plus {:.1}%", price, ma, tol * 100.0),
                ));
            }
        }

        let magnitude = self
            .position_weight(symbol, &profile, equity)
            .map_err(from_fault)?;
        Ok(signal.direction() * magnitude)
    }

    /// Unsigned weight from fixed-fraction risk over the ATR-proxy stop distance.
    pub fn position_weight(
        &self,
        symbol: &str,
        profile: &AssetRiskProfile,
        equity: f64,
    ) -> Result<f64, AssetFault> {
        if !(profile.atr_proxy > 0.0) {
            return Err(AssetFault::NonPositiveStopDistance {
                symbol: symbol.to_string(),
                distance: profile.atr_proxy,
            });
        }
        sizing_weight(
            equity,
            profile.atr_proxy,
            profile.last_close,
            self.cfg.risk_per_trade_fraction,
            self.cfg.max_position_weight,
        )
        .ok_or_else(|| AssetFault::NonFinite {
            symbol: symbol.to_string(),
            what: "position weight",
        })
    }

    fn safety_valve(&self, inputs: &RiskInputs<'_>) -> Option<(String, f64)> {
        let mut best: Option<(&str, Signal, f64)> = None;
        for (symbol, signal) in inputs.signals {
            if !signal.is_actionable() || inputs.panel.last_close(symbol).is_err() {
                continue;
            }
            let Some(magnitude) = inputs
                .fused
                .value(symbol)
                .map(f64::abs)
                .filter(|m| m.is_finite())
            else {
                continue;
            };
            if best.map_or(true, |(_, _, m)| magnitude > m) {
                best = Some((symbol.as_str(), *signal, magnitude));
            }
        }
        let (symbol, signal, _) = best?;
        let weight = self
            .cfg
            .safety_valve
            .weight
            .abs()
            .min(self.cfg.max_position_weight);
        Some((symbol.to_string(), signal.direction() * weight))
    }
}
