use std::collections::BTreeMap;

use proptest::prelude::*;
use quant_sentinel::error::CycleError;
use quant_sentinel::model::{FusedEntry, FusedForecast, PricePanel, Signal, Signals};
use quant_sentinel::risk_module::{
    sizing_weight, RejectionReasonCode, RiskConfig, RiskGate, RiskInputs, RiskReport,
};

/// Closes whose returns alternate `+r`, `-r`, starting at `start`.
fn alternating(n: usize, start: f64, r: f64) -> Vec<f64> {
    let mut closes = vec![start];
    for i in 0..n - 1 {
        let last = closes[closes.len() - 1];
        let ret = if i % 2 == 0 { r } else { -r };
        closes.push(last * (1.0 + ret));
    }
    closes
}

fn panel(series: &[(&str, Vec<f64>)]) -> PricePanel {
    PricePanel::new(
        series
            .iter()
            .map(|(s, c)| (s.to_string(), c.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn fused(values: &[(&str, f64)]) -> FusedForecast {
    let mut f = FusedForecast::default();
    for (symbol, value) in values {
        f.insert(
            symbol.to_string(),
            FusedEntry {
                value: *value,
                alpha: 0.5,
                providers: 2,
            },
        );
    }
    f
}

fn signals(values: &[(&str, Signal)]) -> Signals {
    values.iter().map(|(s, v)| (s.to_string(), *v)).collect()
}

fn evaluate(
    gate: &RiskGate,
    panel: &PricePanel,
    sigs: &Signals,
    fused: &FusedForecast,
    equity: f64,
) -> Result<RiskReport, CycleError> {
    let returns = panel.returns();
    gate.evaluate(&RiskInputs {
        signals: sigs,
        panel,
        equity,
        returns: &returns,
        fused,
    })
}

fn no_valve() -> RiskConfig {
    let mut cfg = RiskConfig::default();
    cfg.safety_valve.enabled = false;
    cfg
}

#[test]
fn one_percent_volatility_buy_is_capped_at_max_weight() {
    // Sample std of the last ten alternating returns is r * sqrt(10 / 9).
    let r = 0.01 * (0.9_f64).sqrt();
    let p = panel(&[("AAA", alternating(60, 100.0, r))]);
    let gate = RiskGate::new(RiskConfig::default());

    let profile = gate.profile("AAA", &p).expect("clean history");
    assert!((profile.volatility - 0.01).abs() < 1e-6);
    assert!((profile.atr_proxy - profile.volatility * profile.last_close).abs() < 1e-12);

    let report = evaluate(
        &gate,
        &p,
        &signals(&[("AAA", Signal::Buy)]),
        &fused(&[("AAA", 0.02)]),
        10_000.0,
    )
    .expect("valid equity");
    assert_eq!(report.weights.len(), 1);
    assert!((report.weights["AAA"] - 0.25).abs() < 1e-12);
    assert!(report.rejections.is_empty());
    assert!(report.safety_valve.is_none());
}

#[test]
fn sell_weights_are_negative() {
    let r = 0.01 * (0.9_f64).sqrt();
    let p = panel(&[("AAA", alternating(60, 100.0, r))]);
    let report = evaluate(
        &RiskGate::new(RiskConfig::default()),
        &p,
        &signals(&[("AAA", Signal::Sell)]),
        &fused(&[("AAA", -0.02)]),
        10_000.0,
    )
    .expect("valid equity");
    assert!((report.weights["AAA"] + 0.25).abs() < 1e-12);
}

#[test]
fn drawdown_above_limit_halts_everything() {
    let r = 0.01 * (0.9_f64).sqrt();
    let p = panel(&[
        ("AAA", vec![100.0, 100.0, 78.0]),
        ("BBB", alternating(3, 50.0, r)),
    ]);
    let report = evaluate(
        &RiskGate::new(RiskConfig::default()),
        &p,
        &signals(&[("AAA", Signal::Buy), ("BBB", Signal::Sell)]),
        &fused(&[("AAA", 0.03), ("BBB", -0.03)]),
        10_000.0,
    )
    .expect("halt is not an error");
    assert!(report.weights.is_empty());
    let halt = report.halted.expect("halt recorded");
    assert_eq!(halt.symbol, "AAA");
    assert!((halt.drawdown - 0.22).abs() < 1e-9);
    assert!(report.safety_valve.is_none());
}

#[test]
fn volatility_above_cap_is_rejected() {
    let p = panel(&[("AAA", alternating(20, 100.0, 0.06))]);
    let report = evaluate(
        &RiskGate::new(no_valve()),
        &p,
        &signals(&[("AAA", Signal::Buy)]),
        &fused(&[("AAA", 0.02)]),
        10_000.0,
    )
    .expect("valid equity");
    assert!(report.weights.is_empty());
    assert_eq!(
        report.rejections[0].reason_code,
        RejectionReasonCode::RiskVolatilityCap
    );
}

#[test]
fn buy_below_trend_is_rejected_then_forced_by_valve() {
    let mut closes = alternating(59, 100.0, 0.001);
    closes.push(95.0);
    let p = panel(&[("AAA", closes)]);
    let sigs = signals(&[("AAA", Signal::Buy)]);
    let f = fused(&[("AAA", 0.02)]);

    let report = evaluate(&RiskGate::new(no_valve()), &p, &sigs, &f, 10_000.0).expect("ok");
    assert!(report.weights.is_empty());
    assert_eq!(
        report.rejections[0].reason_code,
        RejectionReasonCode::RiskTrendAgainstBuy
    );
    assert_eq!(report.rejections[0].reason_code.as_str(), "risk.trend_against_buy");

    let report =
        evaluate(&RiskGate::new(RiskConfig::default()), &p, &sigs, &f, 10_000.0).expect("ok");
    assert_eq!(report.safety_valve.as_deref(), Some("AAA"));
    assert!((report.weights["AAA"] - 0.10).abs() < 1e-12);
}

#[test]
fn sell_above_trend_is_rejected_then_forced_by_valve() {
    let mut closes = alternating(59, 100.0, 0.001);
    closes.push(105.0);
    let p = panel(&[("AAA", closes)]);
    let sigs = signals(&[("AAA", Signal::Sell)]);
    let f = fused(&[("AAA", -0.02)]);

    let report = evaluate(&RiskGate::new(no_valve()), &p, &sigs, &f, 10_000.0).expect("ok");
    assert!(report.weights.is_empty());
    assert_eq!(
        report.rejections[0].reason_code,
        RejectionReasonCode::RiskTrendAgainstSell
    );
    assert_eq!(report.rejections[0].reason_code.as_str(), "risk.trend_against_sell");

    let report =
        evaluate(&RiskGate::new(RiskConfig::default()), &p, &sigs, &f, 10_000.0).expect("ok");
    assert_eq!(report.safety_valve.as_deref(), Some("AAA"));
    assert!((report.weights["AAA"] + 0.10).abs() < 1e-12);
}

#[test]
fn valve_picks_strongest_forecast_among_rejected() {
    let short = vec![100.0, 101.0, 100.5];
    let p = panel(&[("AAA", short.clone()), ("BBB", short)]);
    let report = evaluate(
        &RiskGate::new(RiskConfig::default()),
        &p,
        &signals(&[("AAA", Signal::Buy), ("BBB", Signal::Sell)]),
        &fused(&[("AAA", 0.01), ("BBB", -0.04)]),
        10_000.0,
    )
    .expect("ok");
    assert_eq!(report.rejections.len(), 2);
    assert!(report
        .rejections
        .iter()
        .all(|r| r.reason_code == RejectionReasonCode::RiskInsufficientHistory));
    assert_eq!(report.safety_valve.as_deref(), Some("BBB"));
    assert!((report.weights["BBB"] + 0.10).abs() < 1e-12);
}

#[test]
fn missing_prices_only_skip_that_asset() {
    let r = 0.01 * (0.9_f64).sqrt();
    let p = panel(&[("AAA", alternating(60, 100.0, r))]);
    let report = evaluate(
        &RiskGate::new(no_valve()),
        &p,
        &signals(&[("AAA", Signal::Buy), ("ZZZ", Signal::Buy)]),
        &fused(&[("AAA", 0.02), ("ZZZ", 0.02)]),
        10_000.0,
    )
    .expect("ok");
    assert_eq!(report.weights.len(), 1);
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].symbol, "ZZZ");
    assert_eq!(
        report.rejections[0].reason_code,
        RejectionReasonCode::RiskNoPriceData
    );
}

#[test]
fn hold_only_signals_never_trigger_the_valve() {
    let p = panel(&[("AAA", vec![100.0, 101.0])]);
    let report = evaluate(
        &RiskGate::new(RiskConfig::default()),
        &p,
        &signals(&[("AAA", Signal::Hold)]),
        &fused(&[("AAA", 0.001)]),
        10_000.0,
    )
    .expect("ok");
    assert!(report.weights.is_empty());
    assert!(report.safety_valve.is_none());
}

#[test]
fn non_positive_equity_aborts() {
    let p = panel(&[("AAA", vec![100.0, 101.0])]);
    let gate = RiskGate::new(RiskConfig::default());
    let sigs = signals(&[("AAA", Signal::Buy)]);
    let f = fused(&[("AAA", 0.02)]);
    assert!(matches!(
        evaluate(&gate, &p, &sigs, &f, 0.0),
        Err(CycleError::InvalidEquity(_))
    ));
    assert!(matches!(
        evaluate(&gate, &p, &sigs, &f, f64::NAN),
        Err(CycleError::InvalidEquity(_))
    ));
}

#[test]
fn sizing_rejects_zero_stop_distance() {
    assert_eq!(sizing_weight(10_000.0, 0.0, 100.0, 0.02, 0.25), None);
    let w = sizing_weight(10_000.0, 50.0, 100.0, 0.02, 0.25).expect("sized");
    assert!((w - 0.04).abs() < 1e-12);
}

proptest! {
    #[test]
    fn weight_never_exceeds_max(
        equity in 1e-3..1e7_f64,
        atr in 1e-6..1e3_f64,
        price in 0.01..1e4_f64,
        risk in 0.001..0.5_f64,
        max_weight in 0.01..1.0_f64,
    ) {
        if let Some(w) = sizing_weight(equity, atr, price, risk, max_weight) {
            prop_assert!(w.abs() <= max_weight);
            prop_assert!(w >= 0.0);
        }
    }
}
