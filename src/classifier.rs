use serde::Deserialize;

use crate::model::{FusedForecast, Signal, Signals};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Minimum absolute expected return before a forecast becomes a trade intent.
    pub threshold: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { threshold: 0.005 }
    }
}

/// BUY above `threshold`, SELL below `-threshold`, HOLD otherwise.
pub fn classify(forecast: f64, threshold: f64) -> Signal {
    if !forecast.is_finite() {
        return Signal::Hold;
    }
    if forecast > threshold {
        Signal::Buy
    } else if forecast < -threshold {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

pub fn classify_all(fused: &FusedForecast, cfg: &SignalConfig) -> Signals {
    fused
        .iter()
        .map(|(symbol, entry)| (symbol.to_string(), classify(entry.value, cfg.threshold)))
        .collect()
}
