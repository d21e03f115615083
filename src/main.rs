use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use data_reconciler::api::{ApiConfig, BinanceKlinesClient};
use data_reconciler::common::structs::TimeRange;
use data_reconciler::integrity::GapDetector;
use data_reconciler::logging::{init_logging, LoggingConfig};
use data_reconciler::metadata::{MetadataConfig, SymbolMetadataCache};
use data_reconciler::reconcile::{Reconciler, ReconcilerConfig};
use data_reconciler::storage::LmdbCandleStore;

/// Application configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct TomlConfig {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>, // e.g. ["1m", "1h", "1d"]
    pub lookback_hours: i64,    // Audit window ending now
    pub storage_path: String,
    pub metadata_path: Option<String>,
    pub logging: Option<LoggingTomlConfig>,
    pub reconcile: Option<ReconcileTomlConfig>,
}

/// Logging configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct LoggingTomlConfig {
    pub level_filter: Option<String>,
}

/// Reconciler tuning from config.toml
#[derive(Debug, Clone, Deserialize)]
struct ReconcileTomlConfig {
    pub max_concurrent_fetches: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
    pub full_redownload_below: Option<f64>,
}

#[derive(Debug, Clone)]
struct AppConfig {
    symbols: Vec<String>,
    intervals: Vec<String>,
    lookback_hours: i64,
    storage_path: PathBuf,
    metadata: MetadataConfig,
    logging: LoggingConfig,
    reconciler: ReconcilerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            intervals: vec!["1m".to_string(), "1h".to_string()],
            lookback_hours: 72,
            storage_path: PathBuf::from("data"),
            metadata: MetadataConfig::default(),
            logging: LoggingConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a config.toml file.
    fn from_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let toml_config: TomlConfig = toml::from_str(&content)?;

        let mut metadata = MetadataConfig::default();
        if let Some(path) = toml_config.metadata_path {
            metadata.path = PathBuf::from(path);
        }

        let mut logging = LoggingConfig::default();
        if let Some(section) = toml_config.logging {
            if let Some(filter) = section.level_filter {
                logging.level_filter = filter;
            }
        }

        let mut reconciler = ReconcilerConfig::default();
        if let Some(section) = toml_config.reconcile {
            if let Some(v) = section.max_concurrent_fetches {
                reconciler.max_concurrent_fetches = v;
            }
            if let Some(v) = section.fetch_timeout_seconds {
                reconciler.fetch_timeout = Duration::from_secs(v);
            }
            if let Some(v) = section.full_redownload_below {
                reconciler.full_redownload_below = v;
            }
        }

        Ok(Self {
            symbols: toml_config.symbols,
            intervals: toml_config.intervals,
            lookback_hours: toml_config.lookback_hours,
            storage_path: PathBuf::from(toml_config.storage_path),
            metadata,
            logging,
            reconciler,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match AppConfig::from_toml("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml ({}), using defaults", e);
            AppConfig::default()
        }
    };

    init_logging(&config.logging);
    info!(
        "Auditing {} symbol(s) x {} interval(s) over the last {}h",
        config.symbols.len(),
        config.intervals.len(),
        config.lookback_hours
    );

    let mut metadata = SymbolMetadataCache::load(config.metadata.clone())?;
    let http = reqwest::Client::new();
    if let Err(e) = metadata.refresh_if_stale(&http).await {
        warn!("Symbol metadata refresh failed, continuing with cached data: {}", e);
    }

    let store = LmdbCandleStore::new(&config.storage_path);
    let source = BinanceKlinesClient::new(ApiConfig::binance_futures())?;
    let reconciler = Reconciler::new(
        store,
        source,
        metadata,
        GapDetector::default(),
        config.reconciler.clone(),
    );

    let window = TimeRange::last_hours(config.lookback_hours);
    let mut degraded = 0usize;

    for symbol in &config.symbols {
        for interval in &config.intervals {
            match reconciler.reconcile(symbol, interval, window).await {
                Ok(outcome) => {
                    info!(
                        "{} {}: {} records ({:.2}% complete before repair), {} fetched, {} range(s) failed, persisted={}",
                        symbol,
                        interval,
                        outcome.candles.len(),
                        outcome.report.completeness_ratio * 100.0,
                        outcome.fetched,
                        outcome.failed_ranges.len(),
                        outcome.persisted
                    );
                    if !outcome.persisted || !outcome.failed_ranges.is_empty() {
                        degraded += 1;
                    }
                }
                Err(e) => {
                    error!("{} {}: reconciliation failed: {}", symbol, interval, e);
                    degraded += 1;
                }
            }
        }
    }

    if degraded > 0 {
        warn!("Finished with {} degraded series; rerun to retry the remaining gaps", degraded);
    } else {
        info!("All series reconciled cleanly");
    }
    Ok(())
}
