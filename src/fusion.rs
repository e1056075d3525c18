use serde::Deserialize;

use crate::indicator::{mean, population_std};
use crate::model::{ForecastSet, FusedEntry, FusedForecast, ReturnMatrix};

/// A source of scalar expected-return forecasts, owned by the caller.
pub trait ForecastProvider {
    fn name(&self) -> &str;
    fn forecast(&self, symbol: &str) -> Option<f64>;
}

impl ForecastProvider for ForecastSet {
    fn name(&self) -> &str {
        &self.provider
    }

    fn forecast(&self, symbol: &str) -> Option<f64> {
        self.raw(symbol)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Number of intervals in the alpha grid; the grid has `grid_steps + 1` points.
    pub grid_steps: usize,
    /// Added to the score denominator so a flat series cannot divide by zero.
    pub epsilon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            grid_steps: 10,
            epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendCandidate {
    pub alpha: f64,
    pub value: f64,
    pub score: f64,
}

/// Equally spaced alphas over [0, 1], ascending, both ends included.
pub fn blend_grid(steps: usize) -> Vec<f64> {
    let steps = steps.max(1);
    (0..=steps).map(|i| i as f64 / steps as f64).collect()
}

/// Mean over std of the forecast's excess over each realized return.
/// With no realized history the excess series is the forecast alone.
pub fn blend_score(blended: f64, realized: &[f64], epsilon: f64) -> f64 {
    let excess: Vec<f64> = if realized.is_empty() {
        vec![blended]
    } else {
        realized.iter().map(|r| blended - r).collect()
    };
    let m = mean(&excess).unwrap_or(blended);
    let sd = population_std(&excess).unwrap_or(0.0);
    m / (sd + epsilon)
}

/// Score every grid point for `alpha * a + (1 - alpha) * b`.
pub fn score_grid(a: f64, b: f64, realized: &[f64], cfg: &FusionConfig) -> Vec<BlendCandidate> {
    blend_grid(cfg.grid_steps)
        .into_iter()
        .map(|alpha| {
            let value = alpha * a + (1.0 - alpha) * b;
            BlendCandidate {
                alpha,
                value,
                score: blend_score(value, realized, cfg.epsilon),
            }
        })
        .collect()
}

/// Ascending scan; a candidate must strictly beat the incumbent, so the
/// smallest alpha wins any tie.
pub fn select_blend(candidates: &[BlendCandidate]) -> Option<BlendCandidate> {
    let mut best: Option<BlendCandidate> = None;
    let mut best_score = f64::NEG_INFINITY;
    for c in candidates {
        if c.score > best_score {
            best_score = c.score;
            best = Some(*c);
        }
    }
    best
}

pub fn blend_pair(a: f64, b: f64, realized: &[f64], cfg: &FusionConfig) -> BlendCandidate {
    let candidates = score_grid(a, b, realized, cfg);
    select_blend(&candidates).unwrap_or(candidates[0])
}

pub struct PredictionFusion {
    cfg: FusionConfig,
}

impl PredictionFusion {
    pub fn new(cfg: FusionConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.cfg
    }

    /// Blend every provider's forecast for each symbol. Providers are folded in
    /// order; symbols no provider covers are left out.
    pub fn fuse<'a, I>(
        &self,
        symbols: I,
        providers: &[&dyn ForecastProvider],
        realized: &ReturnMatrix,
    ) -> FusedForecast
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fused = FusedForecast::default();
        for symbol in symbols {
            if let Some(entry) = self.fuse_symbol(symbol, providers, realized) {
                fused.insert(symbol.to_string(), entry);
            }
        }
        fused
    }

    pub fn fuse_symbol(
        &self,
        symbol: &str,
        providers: &[&dyn ForecastProvider],
        realized: &ReturnMatrix,
    ) -> Option<FusedEntry> {
        let mut inputs: Vec<(usize, f64)> = Vec::with_capacity(providers.len());
        for (idx, provider) in providers.iter().enumerate() {
            match provider.forecast(symbol) {
                Some(v) if v.is_finite() => inputs.push((idx, v)),
                Some(v) => tracing::warn!(
                    symbol = %symbol,
                    provider = %provider.name(),
                    value = v,
                    "Ignoring non-finite forecast"
                ),
                None => {}
            }
        }

        let realized: Vec<f64> = realized
            .get(symbol)
            .unwrap_or(&[])
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .collect();

        let mut iter = inputs.into_iter();
        let (first_idx, first) = iter.next()?;
        let mut entry = FusedEntry {
            value: first,
            alpha: if first_idx == 0 { 1.0 } else { 0.0 },
            providers: 1,
        };
        for (_, next) in iter {
            let chosen = blend_pair(entry.value, next, &realized, &self.cfg);
            entry = FusedEntry {
                value: chosen.value,
                alpha: chosen.alpha,
                providers: entry.providers + 1,
            };
        }

        tracing::debug!(
            symbol = %symbol,
            value = entry.value,
            alpha = entry.alpha,
            providers = entry.providers,
            "Fused forecast"
        );
        Some(entry)
    }
}
