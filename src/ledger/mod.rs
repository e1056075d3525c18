pub mod json_store;
pub mod sqlite_store;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{LedgerBackend, LedgerConfig};
use crate::error::{CycleError, PersistenceError};
use crate::model::{BrokerPosition, Position, PositionSide};

pub use json_store::JsonLedgerStore;
pub use sqlite_store::SqliteLedgerStore;

/// Durable home of the ledger. Implementations must publish atomically: a
/// failed save leaves the previously stored ledger readable.
pub trait LedgerStore {
    fn load(&self) -> Result<PositionLedger, PersistenceError>;
    fn save(&self, ledger: &PositionLedger) -> Result<(), PersistenceError>;
}

/// Store selected by `[ledger].backend`.
pub enum AnyLedgerStore {
    Json(JsonLedgerStore),
    Sqlite(SqliteLedgerStore),
}

impl AnyLedgerStore {
    pub fn from_config(cfg: &LedgerConfig) -> Self {
        match cfg.backend {
            LedgerBackend::Json => Self::Json(JsonLedgerStore::new(cfg.path.clone())),
            LedgerBackend::Sqlite => Self::Sqlite(SqliteLedgerStore::new(cfg.path.clone())),
        }
    }
}

impl LedgerStore for AnyLedgerStore {
    fn load(&self) -> Result<PositionLedger, PersistenceError> {
        match self {
            Self::Json(s) => s.load(),
            Self::Sqlite(s) => s.load(),
        }
    }

    fn save(&self, ledger: &PositionLedger) -> Result<(), PersistenceError> {
        match self {
            Self::Json(s) => s.save(ledger),
            Self::Sqlite(s) => s.save(ledger),
        }
    }
}

/// How stop-loss and take-profit levels are placed around a new entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelPolicy {
    pub stop_atr_multiple: f64,
    pub take_profit_atr_multiple: f64,
    /// Fallback distances used when no usable ATR-proxy is available.
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            stop_atr_multiple: 2.0,
            take_profit_atr_multiple: 3.0,
            stop_loss_pct: 0.03,
            take_profit_pct: 0.05,
        }
    }
}

impl LevelPolicy {
    /// `(stop_loss, take_profit)` for an entry on `side`.
    pub fn levels(&self, side: PositionSide, entry: f64, atr_proxy: Option<f64>) -> (f64, f64) {
        if let Some(atr) = atr_proxy.filter(|a| a.is_finite() && *a > 0.0) {
            let stop_dist = self.stop_atr_multiple * atr;
            let target_dist = self.take_profit_atr_multiple * atr;
            let levels = match side {
                PositionSide::Long => (entry - stop_dist, entry + target_dist),
                PositionSide::Short => (entry + stop_dist, entry - target_dist),
            };
            let usable = stop_dist > 0.0
                && target_dist > 0.0
                && match side {
                    PositionSide::Long => levels.0 > 0.0,
                    PositionSide::Short => levels.1 > 0.0,
                };
            if usable {
                return levels;
            }
        }
        match side {
            PositionSide::Long => (
                entry * (1.0 - self.stop_loss_pct),
                entry * (1.0 + self.take_profit_pct),
            ),
            PositionSide::Short => (
                entry * (1.0 + self.stop_loss_pct),
                entry * (1.0 - self.take_profit_pct),
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub added: Vec<Position>,
    pub dropped: Vec<Position>,
    pub resized: Vec<String>,
    /// Broker rows that could not be tracked, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty() && self.resized.is_empty()
    }
}

/// Open positions keyed by symbol. One writer per cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions<I>(positions: I) -> Result<Self, CycleError>
    where
        I: IntoIterator<Item = Position>,
    {
        let mut ledger = Self::new();
        for position in positions {
            ledger.reinstate(position)?;
        }
        Ok(ledger)
    }

    /// Insert or replace the position for its symbol. Returns the replaced one.
    ///
    /// An update of the record already tracked under the same `position_id`
    /// only needs the lifetime checks; anything else is a new record and its
    /// levels must bracket the entry.
    pub fn upsert(&mut self, position: Position) -> Result<Option<Position>, CycleError> {
        let is_update = self
            .positions
            .get(&position.symbol)
            .is_some_and(|p| p.position_id == position.position_id);
        if is_update {
            position.check_tracked()?;
        } else {
            position.check_opening()?;
        }
        Ok(self.positions.insert(position.symbol.clone(), position))
    }

    /// Put back a record that was tracked before, e.g. loaded from storage or
    /// restored after a failed close. Its stop may already sit past the entry.
    pub fn reinstate(&mut self, position: Position) -> Result<Option<Position>, CycleError> {
        position.check_tracked()?;
        Ok(self.positions.insert(position.symbol.clone(), position))
    }

    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub(crate) fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    /// Bring the ledger in line with what the broker reports as held.
    /// Untracked holdings get levels from `policy` and the asset's ATR-proxy;
    /// tracked symbols the broker no longer holds are dropped.
    pub fn reconcile(
        &mut self,
        held: &[BrokerPosition],
        policy: &LevelPolicy,
        atr_by_symbol: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut held_symbols = HashSet::new();

        for row in held {
            let symbol = row.symbol.trim().to_ascii_uppercase();
            if symbol.is_empty() {
                report.skipped.push((row.symbol.clone(), "empty symbol".to_string()));
                continue;
            }
            // Still held even if the row is unusable; keep any existing record.
            held_symbols.insert(symbol.clone());

            let qty = row.qty.abs();
            if !(qty > 0.0) || !(row.avg_entry_price > 0.0) {
                tracing::warn!(symbol = %symbol, qty = row.qty, entry = row.avg_entry_price, "Unusable broker row");
                report.skipped.push((
                    symbol,
                    format!("qty {} / entry {} not usable", row.qty, row.avg_entry_price),
                ));
                continue;
            }

            if let Some(existing) = self.positions.get_mut(&symbol) {
                if existing.side == row.side {
                    if (existing.qty - qty).abs() > 1e-9 {
                        tracing::info!(symbol = %symbol, from = existing.qty, to = qty, "Tracked quantity resized");
                        existing.qty = qty;
                        report.resized.push(symbol);
                    }
                    continue;
                }
                tracing::warn!(symbol = %symbol, "Broker side differs from ledger, re-opening record");
            }

            let atr = atr_by_symbol.get(&symbol).copied();
            let (stop_loss, take_profit) = policy.levels(row.side, row.avg_entry_price, atr);
            match Position::open(
                &symbol,
                row.side,
                row.avg_entry_price,
                qty,
                stop_loss,
                take_profit,
                now,
            ) {
                Ok(position) => {
                    tracing::info!(
                        symbol = %symbol,
                        side = position.side.as_str(),
                        qty,
                        entry = position.entry_price,
                        stop_loss,
                        take_profit,
                        "Tracking broker position"
                    );
                    self.positions.insert(symbol, position.clone());
                    report.added.push(position);
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Cannot track broker position");
                    report.skipped.push((symbol, e.to_string()));
                }
            }
        }

        let stale: Vec<String> = self
            .positions
            .keys()
            .filter(|s| !held_symbols.contains(*s))
            .cloned()
            .collect();
        for symbol in stale {
            if let Some(position) = self.positions.remove(&symbol) {
                tracing::info!(symbol = %symbol, "Dropping position no longer held by broker");
                report.dropped.push(position);
            }
        }
        report
    }
}
