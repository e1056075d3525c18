use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One provider's expected-return forecasts for a single horizon. May be partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSet {
    pub provider: String,
    #[serde(default)]
    pub forecasts: BTreeMap<String, f64>,
}

impl ForecastSet {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            forecasts: BTreeMap::new(),
        }
    }

    pub fn with(mut self, symbol: &str, expected_return: f64) -> Self {
        self.insert(symbol, expected_return);
        self
    }

    pub fn insert(&mut self, symbol: &str, expected_return: f64) {
        self.forecasts
            .insert(symbol.to_ascii_uppercase(), expected_return);
    }

    /// Raw stored value, finite or not.
    pub fn raw(&self, symbol: &str) -> Option<f64> {
        self.forecasts.get(symbol).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.forecasts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forecasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut set: ForecastSet = serde_json::from_str(&payload)
            .with_context(|| format!("failed to parse forecast json {}", path.display()))?;
        set.forecasts = set
            .forecasts
            .into_iter()
            .map(|(symbol, value)| (symbol.to_ascii_uppercase(), value))
            .collect();
        Ok(set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedEntry {
    pub value: f64,
    /// Weight on the first contributing provider in the final blend.
    pub alpha: f64,
    /// Number of providers that contributed.
    pub providers: usize,
}

/// Blended forecast per asset. Recomputed every cycle, never persisted.
#[derive(Debug, Clone, Default)]
pub struct FusedForecast {
    entries: BTreeMap<String, FusedEntry>,
}

impl FusedForecast {
    pub fn insert(&mut self, symbol: String, entry: FusedEntry) {
        self.entries.insert(symbol, entry);
    }

    pub fn get(&self, symbol: &str) -> Option<&FusedEntry> {
        self.entries.get(symbol)
    }

    pub fn value(&self, symbol: &str) -> Option<f64> {
        self.entries.get(symbol).map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FusedEntry)> {
        self.entries.iter().map(|(s, e)| (s.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
