use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classifier::SignalConfig;
use crate::fusion::FusionConfig;
use crate::ledger::LevelPolicy;
use crate::lifecycle::MonitorConfig;
use crate::risk_module::RiskConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub alpaca: AlpacaConfig,
    pub universe: UniverseConfig,
    #[serde(default)]
    pub forecasts: Vec<ForecastSourceConfig>,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub levels: LevelPolicy,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaConfig {
    pub trading_base_url: String,
    pub data_base_url: String,
    #[serde(default = "default_feed")]
    pub feed: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub api_secret: String,
}

fn default_feed() -> String {
    "iex".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
    #[serde(default = "default_history_days")]
    pub history_days: usize,
}

fn default_history_days() -> usize {
    252
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastSourceConfig {
    pub provider: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Json,
            path: PathBuf::from("data/trade_ledger.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Submit orders for approved weights instead of only reporting them.
    pub submit_orders: bool,
    /// Size against this equity instead of the broker account value.
    pub equity_override: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
    #[serde(skip)]
    pub bot_token: Option<String>,
    #[serde(skip)]
    pub chat_id: Option<String>,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_telegram_api(),
            bot_token: None,
            chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl UniverseConfig {
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.bot_token, &self.chat_id), (Some(t), Some(c)) if !t.is_empty() && !c.is_empty())
    }
}

/// One week.
pub const MAX_STATUS_INTERVAL_MINUTES: i64 = 7 * 24 * 60;

fn config_path() -> PathBuf {
    std::env::var("QS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/default.toml"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::load_from_path(&config_path())?;

        config.alpaca.api_key =
            non_empty_env("ALPACA_API_KEY").context("ALPACA_API_KEY not set in .env or environment")?;
        config.alpaca.api_secret = non_empty_env("ALPACA_SECRET_KEY")
            .context("ALPACA_SECRET_KEY not set in .env or environment")?;
        if let Some(url) = non_empty_env("ALPACA_BASE_URL") {
            config.alpaca.trading_base_url = url;
        }
        if let Some(url) = non_empty_env("ALPACA_DATA_URL") {
            config.alpaca.data_base_url = url;
        }
        if let Some(path) = non_empty_env("QS_LEDGER_PATH") {
            config.ledger.path = PathBuf::from(path);
        }
        config.telegram.bot_token = non_empty_env("TELEGRAM_API_TOKEN");
        config.telegram.chat_id = non_empty_env("TELEGRAM_CHAT_ID");
        if !config.telegram.is_configured() {
            tracing::warn!("Telegram token or chat id not configured; notifications go to the log");
        }

        Ok(config)
    }

    /// Parse and validate a config file without touching the environment.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.universe.tradable_symbols().is_empty() {
            bail!("universe.symbols must list at least one symbol");
        }
        if self.fusion.grid_steps == 0 {
            bail!("fusion.grid_steps must be > 0");
        }
        if !(self.fusion.epsilon > 0.0) {
            bail!("fusion.epsilon must be > 0");
        }
        if !(self.signal.threshold >= 0.0) {
            bail!("signal.threshold must be >= 0");
        }
        let r = &self.risk;
        if !(r.max_position_weight > 0.0 && r.max_position_weight <= 1.0) {
            bail!("risk.max_position_weight must be in (0, 1]");
        }
        if !(r.risk_per_trade_fraction > 0.0 && r.risk_per_trade_fraction < 1.0) {
            bail!("risk.risk_per_trade_fraction must be in (0, 1)");
        }
        if !(r.max_drawdown_allowed > 0.0) || !(r.volatility_cap > 0.0) || !(r.trend_tolerance >= 0.0) {
            bail!("risk.max_drawdown_allowed and risk.volatility_cap must be > 0, risk.trend_tolerance >= 0");
        }
        if r.volatility_window < 2 || r.trend_window == 0 {
            bail!("risk.volatility_window must be >= 2 and risk.trend_window > 0");
        }
        if !(r.safety_valve.weight > 0.0) {
            bail!("risk.safety_valve.weight must be > 0");
        }
        let l = &self.levels;
        if !(l.stop_loss_pct > 0.0 && l.stop_loss_pct < 1.0)
            || !(l.take_profit_pct > 0.0 && l.take_profit_pct < 1.0)
        {
            bail!("levels.stop_loss_pct and levels.take_profit_pct must be in (0, 1)");
        }
        if !(l.stop_atr_multiple > 0.0) || !(l.take_profit_atr_multiple > 0.0) {
            bail!("levels ATR multiples must be > 0");
        }
        let m = &self.monitor;
        if !(m.trailing_activation > 0.0) || !(m.trailing_lock_in >= 0.0) {
            bail!("monitor.trailing_activation must be > 0 and monitor.trailing_lock_in >= 0");
        }
        if m.trailing_lock_in >= m.trailing_activation {
            bail!("monitor.trailing_lock_in must be below monitor.trailing_activation");
        }
        if m.status_interval_minutes <= 0 || m.status_interval_minutes > MAX_STATUS_INTERVAL_MINUTES {
            bail!(
                "monitor.status_interval_minutes must be in 1..={}",
                MAX_STATUS_INTERVAL_MINUTES
            );
        }
        if let Some(equity) = self.execution.equity_override {
            if !(equity > 0.0) {
                bail!("execution.equity_override must be > 0");
            }
        }
        Ok(())
    }
}
