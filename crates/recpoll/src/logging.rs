//! Process-wide structured logging.
//!
//! Installs a `tracing` subscriber with an [`EnvFilter`] (the configured level,
//! overridden by `RUST_LOG`) and either human-readable or JSON output. Records
//! emitted through the `log` facade by the storage layer are bridged in.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Builds the filter: `RUST_LOG` when set and valid, else the configured level.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging once per process. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let (plain, json) = match config.format {
            LogFormat::Plain => (Some(fmt::layer().with_target(true)), None),
            LogFormat::Json => (
                None,
                Some(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true)
                        .with_span_list(false),
                ),
            ),
        };

        let subscriber = tracing_subscriber::registry()
            .with(build_filter(config))
            .with(plain)
            .with(json);

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // Embedding application already installed one.
            tracing::debug!("Global tracing subscriber already set, keeping it");
        }

        if tracing_log::LogTracer::init().is_err() {
            tracing::debug!("log facade already has a logger, skipping bridge");
        }

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            "Logging initialized"
        );
    });
}
