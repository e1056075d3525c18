use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use quant_sentinel::alpaca::AlpacaRestClient;
use quant_sentinel::config::Config;
use quant_sentinel::event::render_decision_summary;
use quant_sentinel::fusion::ForecastProvider;
use quant_sentinel::ledger::AnyLedgerStore;
use quant_sentinel::model::{ForecastSet, PricePanel};
use quant_sentinel::notify::TelegramNotifier;
use quant_sentinel::runtime::{
    execute_targets, notify_best_effort, AnyNotifier, Broker, DecisionEngine, LogNotifier,
};

async fn load_panel(broker: &AlpacaRestClient, config: &Config) -> PricePanel {
    let mut bars = BTreeMap::new();
    for symbol in config.universe.tradable_symbols() {
        match broker
            .daily_closes(&symbol, config.universe.history_days)
            .await
        {
            Ok(series) if !series.is_empty() => {
                bars.insert(symbol, series);
            }
            Ok(_) => tracing::warn!(symbol = %symbol, "No daily bars returned"),
            Err(e) => tracing::warn!(symbol = %symbol, error = %format!("{:#}", e), "Daily bars request failed"),
        }
    }
    PricePanel::from_timestamped(bars)
}

fn load_forecasts(config: &Config) -> Vec<ForecastSet> {
    let mut sets = Vec::new();
    for source in &config.forecasts {
        match ForecastSet::load_json(&source.path) {
            Ok(mut set) => {
                set.provider = source.provider.clone();
                tracing::info!(provider = %set.provider, assets = set.len(), "Forecasts loaded");
                sets.push(set);
            }
            Err(e) => tracing::warn!(
                provider = %source.provider,
                path = %source.path.display(),
                error = %format!("{:#}", e),
                "Forecast source skipped"
            ),
        }
    }
    sets
}

async fn run(config: &Config, execute: bool, notifier: &AnyNotifier) -> Result<()> {
    let broker = AlpacaRestClient::from_config(&config.alpaca)?;

    let panel = load_panel(&broker, config).await;
    if panel.is_empty() {
        bail!("no price history available for any symbol in the universe");
    }
    tracing::info!(
        assets = panel.symbols().count(),
        periods = panel.periods(),
        "Price panel loaded"
    );

    let forecasts = load_forecasts(config);
    if forecasts.iter().all(ForecastSet::is_empty) {
        bail!("no forecasts available from any configured provider");
    }
    let providers: Vec<&dyn ForecastProvider> =
        forecasts.iter().map(|f| f as &dyn ForecastProvider).collect();

    let equity = match config.execution.equity_override {
        Some(equity) => equity,
        None => broker
            .account_equity()
            .await
            .context("failed to read account equity")?,
    };

    let engine = DecisionEngine::from_config(config);
    let outcome = engine.run(&panel, &providers, equity)?;

    let last_closes: BTreeMap<String, f64> = panel
        .symbols()
        .filter_map(|s| panel.last_close(s).ok().map(|c| (s.to_string(), c)))
        .collect();
    let summary = render_decision_summary(&outcome.report, &last_closes, &outcome.forecast_values());
    tracing::info!(
        approved = outcome.report.weights.len(),
        rejected = outcome.report.rejections.len(),
        halted = outcome.report.is_halted(),
        "Decision cycle complete"
    );

    if execute && !outcome.report.weights.is_empty() {
        let store = AnyLedgerStore::from_config(&config.ledger);
        let executed = execute_targets(
            &broker,
            &store,
            &outcome.report,
            &panel,
            &config.risk,
            &config.levels,
            Utc::now(),
        )
        .await?;
        for event in &executed.events {
            notify_best_effort(notifier, &event.render()).await;
        }
        tracing::info!(
            opened = executed.opened.len(),
            skipped = executed.skipped.len(),
            "Execution finished"
        );
    }

    notify_best_effort(notifier, &summary).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Make sure .env exists with ALPACA_API_KEY and ALPACA_SECRET_KEY");
            std::process::exit(1);
        }
    };
    quant_sentinel::init_tracing(&config.logging);

    let execute =
        std::env::args().any(|a| a == "--execute") || config.execution.submit_orders;
    tracing::info!(
        trading_url = %config.alpaca.trading_base_url,
        symbols = config.universe.tradable_symbols().len(),
        providers = config.forecasts.len(),
        execute,
        "Starting quant-sentinel decision cycle"
    );

    let notifier = match TelegramNotifier::from_config(&config.telegram)? {
        Some(telegram) => AnyNotifier::Telegram(telegram),
        None => AnyNotifier::Log(LogNotifier),
    };

    if let Err(e) = run(&config, execute, &notifier).await {
        tracing::error!(error = %format!("{:#}", e), "Decision cycle failed");
        notify_best_effort(&notifier, &format!("Decision cycle failed: {:#}", e)).await;
        return Err(e);
    }
    Ok(())
}
