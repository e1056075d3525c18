use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use quant_sentinel::error::PersistenceError;
use quant_sentinel::ledger::{JsonLedgerStore, LedgerStore, PositionLedger, SqliteLedgerStore};
use quant_sentinel::model::{Position, PositionSide};

fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qs-ledger-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir.join(name)
}

fn sample_ledger() -> PositionLedger {
    let opened = Utc.with_ymd_and_hms(2024, 5, 6, 14, 30, 0).unwrap()
        + Duration::nanoseconds(123_456_789);
    let mut long = Position::open(
        "SPY",
        PositionSide::Long,
        512.345_678_901_234_5,
        7.0,
        0.1 + 0.2 + 500.0,
        530.000_000_000_000_1,
        opened,
    )
    .unwrap();
    long.last_update = opened + Duration::minutes(61);
    let short = Position::open(
        "TLT",
        PositionSide::Short,
        91.17,
        12.5,
        93.9051,
        86.6115,
        opened + Duration::days(1),
    )
    .unwrap();
    PositionLedger::from_positions([long, short]).unwrap()
}

#[test]
fn json_round_trip_is_exact() {
    let path = scratch_path("trade_ledger.json");
    let store = JsonLedgerStore::new(&path);
    let ledger = sample_ledger();

    store.save(&ledger).expect("save should succeed");
    let loaded = store.load().expect("load should succeed");
    assert_eq!(loaded, ledger);

    let spy = loaded.get("SPY").expect("SPY tracked");
    assert_eq!(spy.entry_price.to_bits(), 512.345_678_901_234_5_f64.to_bits());
    assert_eq!(spy.stop_loss.to_bits(), (0.1 + 0.2 + 500.0_f64).to_bits());

    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn json_missing_file_is_an_empty_ledger() {
    let store = JsonLedgerStore::new(scratch_path("absent.json"));
    assert!(store.load().expect("missing is not an error").is_empty());
}

#[test]
fn json_garbage_fails_loudly_and_is_left_alone() {
    let path = scratch_path("trade_ledger.json");
    std::fs::write(&path, "{ not json").unwrap();
    let store = JsonLedgerStore::new(&path);
    assert!(matches!(store.load(), Err(PersistenceError::Corrupt { .. })));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn json_tampered_positions_fail_checksum() {
    let path = scratch_path("trade_ledger.json");
    let store = JsonLedgerStore::new(&path);
    store.save(&sample_ledger()).unwrap();

    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    doc["positions"]["SPY"]["qty"] = serde_json::json!(700.0);
    std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

    assert!(matches!(
        store.load(),
        Err(PersistenceError::ChecksumMismatch { .. })
    ));
}

#[test]
fn json_failed_save_reports_io_and_keeps_the_previous_file() {
    let path = scratch_path("trade_ledger.json");
    let store = JsonLedgerStore::new(&path);
    let ledger = sample_ledger();
    store.save(&ledger).unwrap();
    let before = std::fs::read_to_string(&path).unwrap();

    // A directory squatting on the temp path makes the write fail.
    std::fs::create_dir(path.with_file_name(".trade_ledger.json.tmp")).unwrap();
    let err = store.save(&PositionLedger::new()).unwrap_err();
    assert!(matches!(err, PersistenceError::Io { .. }));

    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    assert_eq!(store.load().unwrap(), ledger);
}

#[test]
fn json_unknown_version_is_rejected() {
    let path = scratch_path("trade_ledger.json");
    std::fs::write(&path, r#"{"version": 9, "checksum": "", "positions": {}}"#).unwrap();
    assert!(matches!(
        JsonLedgerStore::new(&path).load(),
        Err(PersistenceError::UnsupportedVersion {
            found: 9,
            expected: 1
        })
    ));
}

#[test]
fn sqlite_round_trip_is_exact_and_replaces_the_set() {
    let path = scratch_path("ledger.sqlite");
    let store = SqliteLedgerStore::new(&path);
    let ledger = sample_ledger();

    store.save(&ledger).expect("save should succeed");
    assert_eq!(store.load().expect("load should succeed"), ledger);

    let mut smaller = ledger.clone();
    smaller.remove("SPY");
    store.save(&smaller).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded.symbols(), vec!["TLT".to_string()]);
    assert_eq!(loaded, smaller);
}

#[test]
fn sqlite_empty_database_loads_empty() {
    let store = SqliteLedgerStore::new(scratch_path("fresh.sqlite"));
    assert!(store.load().unwrap().is_empty());
}
