use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use quant_sentinel::ledger::{LevelPolicy, PositionLedger};
use quant_sentinel::model::{BrokerPosition, Position, PositionSide};

fn held(symbol: &str, qty: f64, side: PositionSide, entry: f64) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        qty,
        side,
        avg_entry_price: entry,
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 16, 0, 0).unwrap()
}

#[test]
fn untracked_holdings_get_atr_levels() {
    let mut ledger = PositionLedger::new();
    let atr = HashMap::from([("SPY".to_string(), 4.0)]);
    let report = ledger.reconcile(
        &[
            held("spy", 10.0, PositionSide::Long, 500.0),
            held("TLT", 5.0, PositionSide::Short, 90.0),
        ],
        &LevelPolicy::default(),
        &atr,
        now(),
    );

    assert_eq!(report.added.len(), 2);
    let spy = ledger.get("SPY").expect("normalized symbol");
    assert_eq!((spy.stop_loss, spy.take_profit), (492.0, 512.0));
    assert_eq!(spy.entry_time, now());

    // No ATR for TLT: fixed 3% / 5% fallback, mirrored for the short.
    let tlt = ledger.get("TLT").unwrap();
    assert!((tlt.stop_loss - 92.7).abs() < 1e-9);
    assert!((tlt.take_profit - 85.5).abs() < 1e-9);
}

#[test]
fn atr_too_wide_for_a_long_falls_back_to_percentages() {
    let policy = LevelPolicy::default();
    let (sl, tp) = policy.levels(PositionSide::Long, 10.0, Some(6.0));
    assert!((sl - 9.7).abs() < 1e-12);
    assert!((tp - 10.5).abs() < 1e-12);
    let (sl, tp) = policy.levels(PositionSide::Short, 10.0, Some(4.0));
    assert!((sl - 10.3).abs() < 1e-12);
    assert!((tp - 9.5).abs() < 1e-12);
}

#[test]
fn positions_no_longer_held_are_dropped() {
    let tracked = Position::open("QQQ", PositionSide::Long, 400.0, 3.0, 390.0, 420.0, now()).unwrap();
    let mut ledger = PositionLedger::from_positions([tracked]).unwrap();
    let report = ledger.reconcile(&[], &LevelPolicy::default(), &HashMap::new(), now());
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].symbol, "QQQ");
    assert!(ledger.is_empty());
}

#[test]
fn quantity_drift_resizes_and_keeps_levels() {
    let mut tracked =
        Position::open("QQQ", PositionSide::Long, 400.0, 3.0, 390.0, 420.0, now()).unwrap();
    tracked.stop_loss = 406.0;
    let id = tracked.position_id.clone();
    let mut ledger = PositionLedger::from_positions([tracked]).unwrap();

    let report = ledger.reconcile(
        &[held("QQQ", 5.0, PositionSide::Long, 401.0)],
        &LevelPolicy::default(),
        &HashMap::new(),
        now(),
    );
    assert_eq!(report.resized, vec!["QQQ".to_string()]);
    assert!(report.added.is_empty());
    let qqq = ledger.get("QQQ").unwrap();
    assert_eq!(qqq.qty, 5.0);
    assert_eq!(qqq.stop_loss, 406.0);
    assert_eq!(qqq.position_id, id);
}

#[test]
fn side_flip_reopens_the_record() {
    let tracked = Position::open("GLD", PositionSide::Long, 200.0, 2.0, 194.0, 210.0, now()).unwrap();
    let mut ledger = PositionLedger::from_positions([tracked]).unwrap();
    let report = ledger.reconcile(
        &[held("GLD", 2.0, PositionSide::Short, 205.0)],
        &LevelPolicy::default(),
        &HashMap::new(),
        now(),
    );
    assert_eq!(report.added.len(), 1);
    let gld = ledger.get("GLD").unwrap();
    assert_eq!(gld.side, PositionSide::Short);
    assert!(gld.stop_loss > 205.0 && gld.take_profit < 205.0);
}

#[test]
fn unusable_broker_rows_are_skipped() {
    let mut ledger = PositionLedger::new();
    let report = ledger.reconcile(
        &[held("EEM", 0.0, PositionSide::Long, 40.0)],
        &LevelPolicy::default(),
        &HashMap::new(),
        now(),
    );
    assert!(report.is_noop());
    assert_eq!(report.skipped.len(), 1);
    assert!(ledger.is_empty());
}

#[test]
fn matching_ledger_is_a_noop() {
    let tracked = Position::open("IWM", PositionSide::Long, 200.0, 4.0, 195.0, 210.0, now()).unwrap();
    let mut ledger = PositionLedger::from_positions([tracked.clone()]).unwrap();
    let report = ledger.reconcile(
        &[held("IWM", 4.0, PositionSide::Long, 200.0)],
        &LevelPolicy::default(),
        &HashMap::new(),
        now(),
    );
    assert!(report.is_noop());
    assert_eq!(ledger.get("IWM"), Some(&tracked));
}

#[test]
fn unusable_row_for_a_tracked_asset_keeps_the_record() {
    let tracked = Position::open("QQQ", PositionSide::Long, 400.0, 3.0, 390.0, 420.0, now()).unwrap();
    let mut ledger = PositionLedger::from_positions([tracked.clone()]).unwrap();
    let report = ledger.reconcile(
        &[held("qqq ", 3.0, PositionSide::Long, 0.0)],
        &LevelPolicy::default(),
        &HashMap::new(),
        now(),
    );
    assert!(report.dropped.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "QQQ");
    assert_eq!(ledger.get("QQQ"), Some(&tracked));
}

#[test]
fn upsert_checks_levels_of_new_records_only() {
    let mut ledger = PositionLedger::new();
    let mut bad = Position::open("AAA", PositionSide::Long, 100.0, 1.0, 97.0, 105.0, now()).unwrap();
    bad.stop_loss = 101.0;
    assert!(ledger.upsert(bad.clone()).is_err());
    assert!(ledger.is_empty());

    // The same stop is fine once the record is tracked and ratcheted.
    let mut tracked = Position::open("AAA", PositionSide::Long, 100.0, 1.0, 97.0, 105.0, now()).unwrap();
    ledger.upsert(tracked.clone()).unwrap();
    tracked.stop_loss = 101.0;
    assert!(ledger.upsert(tracked.clone()).unwrap().is_some());
    assert_eq!(ledger.get("AAA").unwrap().stop_loss, 101.0);

    let mut restored = PositionLedger::new();
    restored.reinstate(tracked).unwrap();
    assert_eq!(restored.len(), 1);
}
