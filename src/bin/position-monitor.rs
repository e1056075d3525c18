use anyhow::Result;
use chrono::Utc;

use quant_sentinel::alpaca::AlpacaRestClient;
use quant_sentinel::config::Config;
use quant_sentinel::ledger::AnyLedgerStore;
use quant_sentinel::notify::TelegramNotifier;
use quant_sentinel::runtime::{notify_best_effort, AnyNotifier, LogNotifier, MonitorCycle};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    quant_sentinel::init_tracing(&config.logging);
    tracing::info!(
        ledger = %config.ledger.path.display(),
        interval_minutes = config.monitor.status_interval_minutes,
        "Starting position monitor"
    );

    let notifier = match TelegramNotifier::from_config(&config.telegram)? {
        Some(telegram) => AnyNotifier::Telegram(telegram),
        None => AnyNotifier::Log(LogNotifier),
    };
    let broker = AlpacaRestClient::from_config(&config.alpaca)?;
    let store = AnyLedgerStore::from_config(&config.ledger);
    let cycle = MonitorCycle::from_config(&config);

    match cycle.run(&broker, &store, &notifier, Utc::now()).await {
        Ok(outcome) => {
            tracing::info!(
                market_open = outcome.market_open,
                added = outcome.reconcile.added.len(),
                dropped = outcome.reconcile.dropped.len(),
                closes = outcome.pass.as_ref().map_or(0, |p| p.closes.len()),
                events = outcome.events.len(),
                tracked = outcome.tracked_after,
                saved = outcome.saved,
                "Monitoring complete"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Monitor cycle failed");
            notify_best_effort(&notifier, &format!("Position monitor failed: {:#}", e)).await;
            Err(e)
        }
    }
}
