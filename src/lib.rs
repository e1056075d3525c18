pub mod alpaca;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod fusion;
pub mod indicator;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod risk_module;
pub mod runtime;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
