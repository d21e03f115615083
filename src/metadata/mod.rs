//! Symbol listing metadata and missing-data classification.
//!
//! The cache is an explicitly constructed component: callers inject it into
//! the reconciler instead of reaching for a process-wide singleton. The
//! refresh policy (at most once per UTC day) is an explicit date field
//! checked on each call.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::common::constants::{BINANCE_FUTURES_BASE_URL, EXCHANGE_INFO_PATH};
use crate::common::structs::{TimeRange, TimestampMS};

/// Read access to the first-known-trading instant of a symbol.
pub trait ListingMetadata {
    fn listing_instant(&self, symbol: &str) -> Option<TimestampMS>;
}

/// Why a symbol has zero records in a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDataKind {
    /// The window (partially) predates the symbol's listing.
    NewListing,
    /// Data should exist and does not.
    Corruption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDataClassification {
    pub kind: MissingDataKind,
    /// Effective backfill window. `None` means the listing postdates the
    /// whole window and there is nothing to fetch.
    pub fetch_window: Option<TimeRange>,
}

/// Classify a zero-record window against the symbol's listing instant.
///
/// Unknown symbols are treated conservatively as corruption: a full-window
/// repair is attempted rather than silently skipping.
pub fn classify_missing<M: ListingMetadata>(
    metadata: &M,
    symbol: &str,
    window: TimeRange,
) -> MissingDataClassification {
    let listing = match metadata.listing_instant(symbol) {
        Some(listing) => listing,
        None => {
            warn!("No listing metadata for {}, assuming corruption", symbol);
            return MissingDataClassification {
                kind: MissingDataKind::Corruption,
                fetch_window: Some(window),
            };
        }
    };

    if listing > window.start {
        let fetch_window = if listing < window.end {
            Some(TimeRange::new(listing, window.end))
        } else {
            None
        };
        debug!(
            "{} listed at {} inside window [{}, {}), narrowing backfill",
            symbol, listing, window.start, window.end
        );
        MissingDataClassification { kind: MissingDataKind::NewListing, fetch_window }
    } else {
        MissingDataClassification {
            kind: MissingDataKind::Corruption,
            fetch_window: Some(window),
        }
    }
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Exchange info parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub path: PathBuf,
    pub exchange_info_url: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("metadata/symbols.json"),
            exchange_info_url: format!("{}{}", BINANCE_FUTURES_BASE_URL, EXCHANGE_INFO_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SymbolEntry {
    listing_date: NaiveDate,
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataFile {
    last_updated: NaiveDate,
    symbols: FxHashMap<String, SymbolEntry>,
}

/// Persistent cache of symbol listing dates, refreshed from the exchange at
/// most once per day.
#[derive(Debug)]
pub struct SymbolMetadataCache {
    config: MetadataConfig,
    symbols: FxHashMap<String, SymbolEntry>,
    last_refreshed: Option<NaiveDate>,
}

impl SymbolMetadataCache {
    /// Load the cache from disk; a missing file yields an empty cache.
    pub fn load(config: MetadataConfig) -> Result<Self, MetadataError> {
        let (symbols, last_refreshed) = match std::fs::read_to_string(&config.path) {
            Ok(body) => {
                let file: MetadataFile = serde_json::from_str(&body)?;
                (file.symbols, Some(file.last_updated))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (FxHashMap::default(), None)
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            "Loaded symbol metadata: {} symbols, last refreshed {:?}",
            symbols.len(),
            last_refreshed
        );
        Ok(Self { config, symbols, last_refreshed })
    }

    pub fn is_known(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn should_refresh(&self, today: NaiveDate) -> bool {
        self.last_refreshed != Some(today)
    }

    /// Pull the exchange symbol list if it has not been pulled today.
    /// Returns the number of symbols added or updated.
    pub async fn refresh_if_stale(
        &mut self,
        client: &reqwest::Client,
    ) -> Result<usize, MetadataError> {
        let today = Utc::now().date_naive();
        if !self.should_refresh(today) {
            debug!("Symbol metadata already refreshed today, skipping");
            return Ok(0);
        }

        info!("Refreshing symbol metadata from {}", self.config.exchange_info_url);
        let body = client
            .get(&self.config.exchange_info_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let updated = self.apply_exchange_info(&body, today)?;
        self.save()?;
        info!("Symbol metadata refreshed: {} symbols updated", updated);
        Ok(updated)
    }

    /// Merge an exchangeInfo response body into the cache.
    fn apply_exchange_info(
        &mut self,
        body: &str,
        today: NaiveDate,
    ) -> Result<usize, MetadataError> {
        let info: serde_json::Value = serde_json::from_str(body)?;
        let symbols = info
            .get("symbols")
            .and_then(|s| s.as_array())
            .ok_or_else(|| MetadataError::Parse("missing 'symbols' array".to_string()))?;

        let mut updated = 0usize;
        for entry in symbols {
            let name = match entry.get("symbol").and_then(|s| s.as_str()) {
                Some(name) if name.ends_with("USDT") => name,
                _ => continue,
            };
            let status = entry
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("UNKNOWN");

            let listing_date = entry
                .get("onboardDate")
                .and_then(|d| d.as_i64())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(|dt| dt.date_naive())
                .unwrap_or_else(|| default_listing_date(name));

            self.symbols.insert(
                name.to_string(),
                SymbolEntry {
                    listing_date,
                    status: if status == "TRADING" { "active" } else { "inactive" }.to_string(),
                },
            );
            updated += 1;
        }

        self.last_refreshed = Some(today);
        Ok(updated)
    }

    /// Persist the cache, staging to a temp file and renaming into place.
    fn save(&self) -> Result<(), MetadataError> {
        let file = MetadataFile {
            last_updated: self.last_refreshed.unwrap_or_else(|| Utc::now().date_naive()),
            symbols: self.symbols.clone(),
        };

        let dir = self.config.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(serde_json::to_string_pretty(&file)?.as_bytes())?;
        staged
            .persist(&self.config.path)
            .map_err(|e| MetadataError::Io(e.error))?;
        Ok(())
    }

    /// Register a symbol directly (startup seeding and tests).
    pub fn insert(&mut self, symbol: &str, listing_date: NaiveDate) {
        self.symbols.insert(
            symbol.to_string(),
            SymbolEntry { listing_date, status: "active".to_string() },
        );
    }
}

impl ListingMetadata for SymbolMetadataCache {
    fn listing_instant(&self, symbol: &str) -> Option<TimestampMS> {
        self.symbols.get(symbol).map(|entry| {
            entry
                .listing_date
                .and_hms_opt(0, 0, 0)
                .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
                .unwrap_or_default()
        })
    }
}

/// Futures pairs without an onboard date get the original tiered estimates.
fn default_listing_date(symbol: &str) -> NaiveDate {
    let date = match symbol {
        "BTCUSDT" | "ETHUSDT" | "BNBUSDT" => (2019, 9, 25),
        "ADAUSDT" | "DOTUSDT" | "LINKUSDT" => (2020, 1, 1),
        _ => (2021, 1, 1),
    };
    NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap_or_default()
}
