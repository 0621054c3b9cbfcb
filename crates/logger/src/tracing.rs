use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output shape of the log lines, picked from `RUST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        let raw = var("RUST_LOG_FORMAT")
            .inspect_err(|error| {
                warn!("Failed to read RUST_LOG_FORMAT, falling back to compact: {error}")
            })
            .unwrap_or_default();
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber for a binary.
///
/// `RUST_LOG` overrides the INFO default, `RUST_LOG_FORMAT=json` emits one
/// JSON object per event. `service` is recorded on the startup event.
pub fn init_tracing(service: &str) {
    initialize_tracing(LevelFilter::INFO, LogFormat::from_env());
    tracing::info!(service, "tracing initialized");
}

fn initialize_tracing(level: LevelFilter, format: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(log_layer).try_init();
}
