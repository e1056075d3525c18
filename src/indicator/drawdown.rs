use crate::model::ReturnMatrix;

/// Drawdown from the running peak of compounded returns at every period.
/// The peak starts at the first compounded value, not at 1.
pub fn drawdown_series(returns: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(returns.len());
    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    for r in returns {
        cumulative *= 1.0 + r;
        peak = peak.max(cumulative);
        out.push((peak - cumulative) / peak);
    }
    out
}

/// Drawdown at the most recent period, `None` for empty or degenerate series.
pub fn latest_drawdown(returns: &[f64]) -> Option<f64> {
    if returns.iter().any(|r| !r.is_finite()) {
        return None;
    }
    drawdown_series(returns)
        .last()
        .copied()
        .filter(|dd| dd.is_finite())
}

/// Worst latest-period drawdown across assets, with the asset it came from.
pub fn worst_latest_drawdown(matrix: &ReturnMatrix) -> Option<(String, f64)> {
    let mut worst: Option<(String, f64)> = None;
    for (symbol, returns) in matrix.iter() {
        let Some(dd) = latest_drawdown(returns) else {
            tracing::debug!(symbol = %symbol, "No usable drawdown for asset");
            continue;
        };
        if worst.as_ref().map_or(true, |(_, w)| dd > *w) {
            worst = Some((symbol.to_string(), dd));
        }
    }
    worst
}
