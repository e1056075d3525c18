use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{LedgerStore, PositionLedger};
use crate::error::PersistenceError;
use crate::model::Position;

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    version: u32,
    checksum: String,
    positions: BTreeMap<String, Position>,
}

#[derive(Debug, Deserialize)]
struct LedgerHeader {
    version: u32,
}

/// Versioned JSON ledger file, published with write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn corrupt(&self, detail: String) -> PersistenceError {
        PersistenceError::Corrupt {
            path: self.path.display().to_string(),
            detail,
        }
    }
}

pub fn positions_checksum(positions: &BTreeMap<String, Position>) -> Result<String, PersistenceError> {
    let canonical = serde_json::to_string(positions)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> Result<PositionLedger, PersistenceError> {
        let payload = match std::fs::read_to_string(&self.path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PositionLedger::new());
            }
            Err(e) => return Err(self.io_err(&self.path, e)),
        };

        let header: LedgerHeader = serde_json::from_str(&payload)
            .map_err(|e| self.corrupt(format!("unreadable header: {}", e)))?;
        if header.version != LEDGER_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: header.version,
                expected: LEDGER_VERSION,
            });
        }
        let doc: LedgerDocument = serde_json::from_str(&payload)
            .map_err(|e| self.corrupt(format!("unreadable body: {}", e)))?;

        let computed = positions_checksum(&doc.positions)?;
        if computed != doc.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                stored: doc.checksum,
                computed,
            });
        }
        for (key, position) in &doc.positions {
            if key != &position.symbol {
                return Err(self.corrupt(format!(
                    "key {} holds position for {}",
                    key, position.symbol
                )));
            }
        }
        PositionLedger::from_positions(doc.positions.into_values())
            .map_err(|e| self.corrupt(e.to_string()))
    }

    fn save(&self, ledger: &PositionLedger) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(parent, e))?;
        }

        let positions = ledger.as_map().clone();
        let doc = LedgerDocument {
            version: LEDGER_VERSION,
            checksum: positions_checksum(&positions)?,
            positions,
        };
        let json = serde_json::to_string_pretty(&doc)?;

        let tmp = self.temp_path();
        let mut file = std::fs::File::create(&tmp).map_err(|e| self.io_err(&tmp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_err(&tmp, e))?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            self.io_err(&self.path, e)
        })?;

        tracing::debug!(path = %self.path.display(), positions = ledger.len(), "Ledger saved");
        Ok(())
    }
}
