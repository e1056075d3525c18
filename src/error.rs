use thiserror::Error;

/// Whether a per-asset fault came from bad inputs or from a computation that
/// could not be carried out on otherwise valid inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Input,
    Computation,
}

/// A failure scoped to a single asset. The asset is skipped; every other asset
/// in the cycle keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetFault {
    #[error("no price data for {0}")]
    MissingPrices(String),

    #[error("{symbol} has {len} periods, panel has {expected}")]
    Misaligned {
        symbol: String,
        len: usize,
        expected: usize,
    },

    #[error("{symbol}: need {needed} observations, have {available}")]
    InsufficientHistory {
        symbol: String,
        needed: usize,
        available: usize,
    },

    #[error("{symbol}: non-finite {what}")]
    NonFinite { symbol: String, what: &'static str },

    #[error("{symbol}: stop distance {distance} is not positive")]
    NonPositiveStopDistance { symbol: String, distance: f64 },
}

impl AssetFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::MissingPrices(_) | Self::Misaligned { .. } | Self::NonFinite { .. } => {
                FaultKind::Input
            }
            Self::InsufficientHistory { .. } | Self::NonPositiveStopDistance { .. } => {
                FaultKind::Computation
            }
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::MissingPrices(symbol) => symbol,
            Self::Misaligned { symbol, .. }
            | Self::InsufficientHistory { symbol, .. }
            | Self::NonFinite { symbol, .. }
            | Self::NonPositiveStopDistance { symbol, .. } => symbol,
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("ledger IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ledger file {path} is corrupt: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("ledger checksum mismatch (stored {stored}, computed {computed})")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("unsupported ledger version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("ledger sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Errors that abort a whole cycle. Everything else is scoped to one asset.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("account equity must be finite and positive, got {0}")]
    InvalidEquity(f64),

    #[error("invalid position for {symbol}: {detail}")]
    InvalidPosition { symbol: String, detail: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("alpaca API error (status {status}): {msg}")]
    AlpacaApi { status: u16, msg: String },

    #[error("telegram API error (status {status}): {msg}")]
    TelegramApi { status: u16, msg: String },
}
