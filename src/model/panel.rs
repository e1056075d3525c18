use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::AssetFault;
use crate::indicator::simple_returns;

/// Closing prices per asset, one per trading period, aligned across assets.
#[derive(Debug, Clone, Default)]
pub struct PricePanel {
    series: BTreeMap<String, Vec<f64>>,
    periods: usize,
}

impl PricePanel {
    /// Build a panel from series that are already aligned period by period.
    /// The panel length is the longest series; shorter ones read as misaligned.
    pub fn new(series: BTreeMap<String, Vec<f64>>) -> Self {
        let periods = series.values().map(Vec::len).max().unwrap_or(0);
        Self { series, periods }
    }

    /// Align timestamped closes on the timestamps every asset has in common.
    pub fn from_timestamped(bars: BTreeMap<String, Vec<(DateTime<Utc>, f64)>>) -> Self {
        let mut common: Option<BTreeSet<DateTime<Utc>>> = None;
        for rows in bars.values() {
            let stamps: BTreeSet<DateTime<Utc>> = rows.iter().map(|(ts, _)| *ts).collect();
            common = Some(match common {
                None => stamps,
                Some(prev) => prev.intersection(&stamps).copied().collect(),
            });
        }
        let common = common.unwrap_or_default();

        let mut series = BTreeMap::new();
        for (symbol, mut rows) in bars {
            rows.sort_by_key(|(ts, _)| *ts);
            rows.dedup_by_key(|(ts, _)| *ts);
            let closes: Vec<f64> = rows
                .into_iter()
                .filter(|(ts, _)| common.contains(ts))
                .map(|(_, close)| close)
                .collect();
            series.insert(symbol, closes);
        }
        Self {
            series,
            periods: common.len(),
        }
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Closing prices for `symbol`, checked for presence, alignment and sanity.
    pub fn closes(&self, symbol: &str) -> Result<&[f64], AssetFault> {
        let closes = self
            .series
            .get(symbol)
            .ok_or_else(|| AssetFault::MissingPrices(symbol.to_string()))?;
        if closes.is_empty() {
            return Err(AssetFault::MissingPrices(symbol.to_string()));
        }
        if closes.len() != self.periods {
            return Err(AssetFault::Misaligned {
                symbol: symbol.to_string(),
                len: closes.len(),
                expected: self.periods,
            });
        }
        if closes.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(AssetFault::NonFinite {
                symbol: symbol.to_string(),
                what: "close",
            });
        }
        Ok(closes)
    }

    pub fn last_close(&self, symbol: &str) -> Result<f64, AssetFault> {
        let closes = self.closes(symbol)?;
        closes
            .last()
            .copied()
            .ok_or_else(|| AssetFault::MissingPrices(symbol.to_string()))
    }

    /// Historical simple returns for every asset that has clean data.
    pub fn returns(&self) -> ReturnMatrix {
        let mut matrix = ReturnMatrix::default();
        for symbol in self.series.keys() {
            match self.closes(symbol) {
                Ok(closes) => matrix.insert(symbol.clone(), simple_returns(closes)),
                Err(fault) => {
                    tracing::warn!(symbol = %symbol, error = %fault, "Skipping asset in return matrix")
                }
            }
        }
        matrix
    }
}

/// Per-asset realized simple returns, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ReturnMatrix {
    series: BTreeMap<String, Vec<f64>>,
}

impl ReturnMatrix {
    pub fn new(series: BTreeMap<String, Vec<f64>>) -> Self {
        Self { series }
    }

    pub fn insert(&mut self, symbol: String, returns: Vec<f64>) {
        self.series.insert(symbol, returns);
    }

    pub fn get(&self, symbol: &str) -> Option<&[f64]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.series
            .iter()
            .map(|(symbol, returns)| (symbol.as_str(), returns.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn timestamped_bars_align_on_common_days() {
        let mut bars = BTreeMap::new();
        bars.insert(
            "SPY".to_string(),
            vec![(day(1), 500.0), (day(2), 501.0), (day(4), 503.0)],
        );
        bars.insert(
            "TLT".to_string(),
            vec![(day(4), 93.0), (day(1), 91.0), (day(3), 92.5), (day(2), 92.0)],
        );
        let panel = PricePanel::from_timestamped(bars);
        assert_eq!(panel.periods(), 3);
        assert_eq!(panel.closes("SPY").unwrap(), &[500.0, 501.0, 503.0]);
        assert_eq!(panel.closes("TLT").unwrap(), &[91.0, 92.0, 93.0]);
    }

    #[test]
    fn short_series_is_misaligned() {
        let mut series = BTreeMap::new();
        series.insert("SPY".to_string(), vec![1.0, 2.0, 3.0]);
        series.insert("QQQ".to_string(), vec![1.0, 2.0]);
        let panel = PricePanel::new(series);
        assert!(matches!(
            panel.closes("QQQ"),
            Err(AssetFault::Misaligned { len: 2, expected: 3, .. })
        ));
        assert!(matches!(
            panel.closes("IWM"),
            Err(AssetFault::MissingPrices(_))
        ));
        let returns = panel.returns();
        assert!(returns.get("SPY").is_some());
        assert!(returns.get("QQQ").is_none());
    }
}
