//! Console logging setup.
//!
//! `RUST_LOG` takes precedence over the configured filter so a run can be
//! made more verbose without touching config.toml.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// EnvFilter directive string, e.g. "info,data_reconciler=debug".
    pub level_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level_filter: "info,data_reconciler=info".to_string() }
    }
}

pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Console logging initialized (filter: {})", config.level_filter);
}
