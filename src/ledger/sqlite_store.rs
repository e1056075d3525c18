use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{LedgerStore, PositionLedger};
use crate::error::PersistenceError;
use crate::model::{Position, PositionSide};

const SCHEMA_VERSION: u32 = 1;

/// SQLite-backed ledger. Each save replaces the full position set in one
/// transaction.
#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    path: PathBuf,
}

struct PositionRow {
    symbol: String,
    position_id: String,
    side: String,
    entry_price: f64,
    qty: f64,
    stop_loss: f64,
    take_profit: f64,
    entry_time: String,
    last_update: String,
}

impl SqliteLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_positions (
                symbol TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                qty REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                entry_time TEXT NOT NULL,
                last_update TEXT NOT NULL
            );
            "#,
        )?;
        Ok(conn)
    }

    fn check_version(conn: &Connection) -> Result<(), PersistenceError> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(raw) = stored {
            let found = raw.parse::<u32>().unwrap_or(0);
            if found != SCHEMA_VERSION {
                return Err(PersistenceError::UnsupportedVersion {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
        }
        Ok(())
    }

    fn corrupt(&self, detail: String) -> PersistenceError {
        PersistenceError::Corrupt {
            path: self.path.display().to_string(),
            detail,
        }
    }

    fn parse_time(&self, raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| self.corrupt(format!("bad timestamp '{}': {}", raw, e)))
    }

    fn into_position(&self, row: PositionRow) -> Result<Position, PersistenceError> {
        let side = PositionSide::from_broker_str(&row.side)
            .ok_or_else(|| self.corrupt(format!("bad side '{}' for {}", row.side, row.symbol)))?;
        Ok(Position {
            entry_time: self.parse_time(&row.entry_time)?,
            last_update: self.parse_time(&row.last_update)?,
            position_id: row.position_id,
            symbol: row.symbol,
            side,
            entry_price: row.entry_price,
            qty: row.qty,
            stop_loss: row.stop_loss,
            take_profit: row.take_profit,
        })
    }
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl LedgerStore for SqliteLedgerStore {
    fn load(&self) -> Result<PositionLedger, PersistenceError> {
        let conn = self.open()?;
        Self::check_version(&conn)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol, position_id, side, entry_price, qty, stop_loss, take_profit,
                   entry_time, last_update
            FROM ledger_positions
            ORDER BY symbol ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PositionRow {
                symbol: row.get(0)?,
                position_id: row.get(1)?,
                side: row.get(2)?,
                entry_price: row.get(3)?,
                qty: row.get(4)?,
                stop_loss: row.get(5)?,
                take_profit: row.get(6)?,
                entry_time: row.get(7)?,
                last_update: row.get(8)?,
            })
        })?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(self.into_position(row?)?);
        }
        PositionLedger::from_positions(positions).map_err(|e| self.corrupt(e.to_string()))
    }

    fn save(&self, ledger: &PositionLedger) -> Result<(), PersistenceError> {
        let mut conn = self.open()?;
        Self::check_version(&conn)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM ledger_positions", [])?;
        for p in ledger.iter() {
            tx.execute(
                r#"
                INSERT INTO ledger_positions (
                    symbol, position_id, side, entry_price, qty, stop_loss, take_profit,
                    entry_time, last_update
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    p.symbol,
                    p.position_id,
                    p.side.as_str(),
                    p.entry_price,
                    p.qty,
                    p.stop_loss,
                    p.take_profit,
                    format_time(&p.entry_time),
                    format_time(&p.last_update),
                ],
            )?;
        }
        tx.execute(
            r#"
            INSERT INTO ledger_meta (key, value) VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![SCHEMA_VERSION.to_string()],
        )?;
        tx.commit()?;
        tracing::debug!(path = %self.path.display(), positions = ledger.len(), "Ledger saved");
        Ok(())
    }
}
