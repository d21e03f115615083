use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use rustc_hash::FxHashMap;

use super::*;
use crate::api::{ApiError, KlineSource};
use crate::calendar::Interval;
use crate::common::constants::{MS_PER_HOUR, MS_PER_MINUTE};
use crate::common::structs::{Candle, TimeRange, TimestampMS};
use crate::integrity::GapDetector;
use crate::metadata::ListingMetadata;
use crate::storage::{CandleStore, StorageError, WriteFormat};

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> TimestampMS {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp_millis()
}

fn candle_at(open_time: TimestampMS, width: i64, close: f64) -> Candle {
    Candle {
        open_time,
        close_time: open_time + width - 1,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10.0,
        number_of_trades: 42,
        taker_buy_volume: 6.0,
        closed: true,
    }
}

/// Candles at every bucket of `[start, end)` except the listed indexes.
fn series(
    start: TimestampMS,
    end: TimestampMS,
    width: i64,
    close: f64,
    skip: &[usize],
) -> Vec<Candle> {
    let mut out = Vec::new();
    let mut bucket = start;
    let mut idx = 0usize;
    while bucket < end {
        if !skip.contains(&idx) {
            out.push(candle_at(bucket, width, close));
        }
        bucket += width;
        idx += 1;
    }
    out
}

#[derive(Clone, Default)]
struct MemoryStore {
    candles: Arc<Mutex<BTreeMap<TimestampMS, Candle>>>,
    fail_writes: bool,
    writes: Arc<Mutex<Vec<WriteFormat>>>,
}

impl MemoryStore {
    fn seeded(candles: Vec<Candle>) -> Self {
        let store = Self::default();
        store
            .candles
            .lock()
            .unwrap()
            .extend(candles.into_iter().map(|c| (c.open_time, c)));
        store
    }

    fn write_formats(&self) -> Vec<WriteFormat> {
        self.writes.lock().unwrap().clone()
    }
}

impl CandleStore for MemoryStore {
    async fn query(
        &self,
        _symbol: &str,
        _interval: Interval,
        range: TimeRange,
    ) -> Result<Vec<Candle>, StorageError> {
        Ok(self
            .candles
            .lock()
            .unwrap()
            .range(range.start..range.end)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn write(
        &self,
        _symbol: &str,
        _interval: Interval,
        candles: &[Candle],
        format: WriteFormat,
    ) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Database("injected write failure".to_string()));
        }
        self.writes.lock().unwrap().push(format);
        self.candles
            .lock()
            .unwrap()
            .extend(candles.iter().map(|c| (c.open_time, c.clone())));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct ScriptedSource {
    series: Arc<BTreeMap<TimestampMS, Candle>>,
    fail_starts: Arc<Vec<TimestampMS>>,
    rate_limit_starts: Arc<Vec<TimestampMS>>,
    calls: Arc<Mutex<Vec<TimeRange>>>,
}

impl ScriptedSource {
    fn with_series(candles: Vec<Candle>) -> Self {
        Self {
            series: Arc::new(candles.into_iter().map(|c| (c.open_time, c)).collect()),
            ..Self::default()
        }
    }

    fn failing_at(mut self, starts: Vec<TimestampMS>) -> Self {
        self.fail_starts = Arc::new(starts);
        self
    }

    fn rate_limited_at(mut self, starts: Vec<TimestampMS>) -> Self {
        self.rate_limit_starts = Arc::new(starts);
        self
    }

    fn calls(&self) -> Vec<TimeRange> {
        self.calls.lock().unwrap().clone()
    }
}

impl KlineSource for ScriptedSource {
    async fn fetch(
        &self,
        _symbol: &str,
        _interval: Interval,
        range: TimeRange,
        limit: u32,
    ) -> Result<Vec<Candle>, ApiError> {
        self.calls.lock().unwrap().push(range);
        if self.rate_limit_starts.contains(&range.start) {
            return Err(ApiError::RateLimit("retry after 60 seconds".to_string()));
        }
        if self.fail_starts.contains(&range.start) {
            return Err(ApiError::Network("injected fetch failure".to_string()));
        }
        Ok(self
            .series
            .range(range.start..range.end)
            .take(limit as usize)
            .map(|(_, c)| c.clone())
            .collect())
    }
}

#[derive(Clone, Default)]
struct StaticMetadata {
    listings: FxHashMap<String, TimestampMS>,
}

impl StaticMetadata {
    fn with(symbol: &str, listing: TimestampMS) -> Self {
        let mut listings = FxHashMap::default();
        listings.insert(symbol.to_string(), listing);
        Self { listings }
    }
}

impl ListingMetadata for StaticMetadata {
    fn listing_instant(&self, symbol: &str) -> Option<TimestampMS> {
        self.listings.get(symbol).copied()
    }
}

fn reconciler(
    store: MemoryStore,
    source: ScriptedSource,
    metadata: StaticMetadata,
) -> Reconciler<MemoryStore, ScriptedSource, StaticMetadata> {
    Reconciler::new(
        store,
        source,
        metadata,
        GapDetector::default(),
        ReconcilerConfig::default(),
    )
}

#[tokio::test]
async fn test_healthy_window_makes_no_network_call() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let local = series(window.start, window.end, MS_PER_HOUR, 100.0, &[]);
    let store = MemoryStore::seeded(local.clone());
    let source = ScriptedSource::default();

    let outcome = reconciler(store.clone(), source.clone(), StaticMetadata::default())
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert!(source.calls().is_empty());
    assert_eq!(outcome.candles, local);
    assert_eq!(outcome.fetched, 0);
    assert!(outcome.persisted);
    assert!(outcome.report.is_healthy);
    assert!(store.write_formats().is_empty());
}

#[tokio::test]
async fn test_corruption_backfills_full_window_with_raw_dump() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let remote = series(window.start, window.end, MS_PER_HOUR, 999.0, &[]);
    let store = MemoryStore::default();
    let source = ScriptedSource::with_series(remote.clone());
    // Listed well before the window: zero records means corruption.
    let metadata = StaticMetadata::with("BTCUSDT", ts(2019, 9, 25, 0, 0));

    let outcome = reconciler(store.clone(), source.clone(), metadata)
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert_eq!(source.calls(), vec![window]);
    assert_eq!(outcome.candles, remote);
    assert_eq!(outcome.fetched, 24);
    assert!(outcome.persisted);
    assert_eq!(store.write_formats(), vec![WriteFormat::DurableAndRaw]);
}

#[tokio::test]
async fn test_new_listing_narrows_backfill_window() {
    let window = TimeRange::new(ts(2025, 8, 1, 0, 0), ts(2025, 8, 15, 0, 0));
    let listing = ts(2025, 8, 12, 0, 0);
    let remote = series(listing, window.end, MS_PER_HOUR, 999.0, &[]);
    let store = MemoryStore::default();
    let source = ScriptedSource::with_series(remote.clone());
    let metadata = StaticMetadata::with("NEWUSDT", listing);

    let outcome = reconciler(store.clone(), source.clone(), metadata)
        .reconcile("NEWUSDT", "1h", window)
        .await
        .unwrap();

    assert_eq!(source.calls(), vec![TimeRange::new(listing, window.end)]);
    assert_eq!(outcome.candles.first().map(|c| c.open_time), Some(listing));
    // A pre-listing blank is not corruption: no raw dump.
    assert_eq!(store.write_formats(), vec![WriteFormat::Durable]);
}

#[tokio::test]
async fn test_listing_after_window_skips_backfill() {
    let window = TimeRange::new(ts(2025, 8, 1, 0, 0), ts(2025, 8, 15, 0, 0));
    let store = MemoryStore::default();
    let source = ScriptedSource::default();
    let metadata = StaticMetadata::with("NEWUSDT", ts(2025, 9, 1, 0, 0));

    let outcome = reconciler(store, source.clone(), metadata)
        .reconcile("NEWUSDT", "1h", window)
        .await
        .unwrap();

    assert!(source.calls().is_empty());
    assert!(outcome.candles.is_empty());
    assert_eq!(outcome.fetched, 0);
    assert!(outcome.persisted);
}

#[tokio::test]
async fn test_partial_fetch_failure_keeps_successful_branches() {
    let window = TimeRange::new(ts(2025, 8, 1, 0, 0), ts(2025, 8, 4, 0, 0));
    // Two 3-hour holes far enough apart to stay separate repair ranges.
    let local = series(window.start, window.end, MS_PER_HOUR, 100.0, &[10, 11, 12, 60, 61, 62]);
    let remote = series(window.start, window.end, MS_PER_HOUR, 999.0, &[]);
    let store = MemoryStore::seeded(local);
    let failing_start = window.start + 60 * MS_PER_HOUR;
    let source = ScriptedSource::with_series(remote).failing_at(vec![failing_start]);

    let outcome = reconciler(store, source.clone(), StaticMetadata::default())
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert_eq!(source.calls().len(), 2);
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.failed_ranges.len(), 1);
    assert_eq!(outcome.failed_ranges[0].start, failing_start);

    // The first hole was healed, the failed one remains open.
    let opens: Vec<TimestampMS> = outcome.candles.iter().map(|c| c.open_time).collect();
    assert!(opens.contains(&(window.start + 11 * MS_PER_HOUR)));
    assert!(!opens.contains(&(window.start + 61 * MS_PER_HOUR)));

    // Output is sorted and free of duplicates.
    let mut sorted = opens.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(opens, sorted);
}

#[tokio::test]
async fn test_merge_prefers_remote_records() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 10, 6, 0));
    // Missing minutes 10 and 40 coalesce into one repair range that also
    // covers the locally present buckets between them.
    let local = series(window.start, window.end, MS_PER_MINUTE, 100.0, &[10, 40]);
    let remote = series(window.start, window.end, MS_PER_MINUTE, 999.0, &[]);
    let store = MemoryStore::seeded(local);
    let source = ScriptedSource::with_series(remote);

    let outcome = reconciler(store, source.clone(), StaticMetadata::default())
        .reconcile("BTCUSDT", "1m", window)
        .await
        .unwrap();

    assert_eq!(source.calls().len(), 1);
    assert_eq!(outcome.fetched, 31);
    assert_eq!(outcome.candles.len(), 360);

    let close_at = |minute: i64| {
        outcome
            .candles
            .iter()
            .find(|c| c.open_time == window.start + minute * MS_PER_MINUTE)
            .map(|c| c.close)
    };
    // Refetched buckets take the authoritative remote values...
    assert_eq!(close_at(10), Some(999.0));
    assert_eq!(close_at(20), Some(999.0));
    // ...while buckets outside the repair range keep the local ones.
    assert_eq!(close_at(5), Some(100.0));
}

#[tokio::test]
async fn test_jittered_bucket_is_not_duplicated_by_repair() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 10, 6, 0));
    // Minutes 10 and 40 missing, so the coalesced repair range also covers
    // the locally present bucket at minute 20, stored with in-bucket jitter.
    let mut local = series(window.start, window.end, MS_PER_MINUTE, 100.0, &[10, 40]);
    let jittered_open = window.start + 20 * MS_PER_MINUTE;
    for candle in &mut local {
        if candle.open_time == jittered_open {
            candle.open_time += 500;
        }
    }
    let remote = series(window.start, window.end, MS_PER_MINUTE, 999.0, &[]);
    let store = MemoryStore::seeded(local);
    let source = ScriptedSource::with_series(remote);

    let outcome = reconciler(store, source, StaticMetadata::default())
        .reconcile("BTCUSDT", "1m", window)
        .await
        .unwrap();

    // The refetched aligned record replaces the jittered one instead of
    // coexisting with it.
    let bucket_20: Vec<&Candle> = outcome
        .candles
        .iter()
        .filter(|c| c.open_time / MS_PER_MINUTE * MS_PER_MINUTE == jittered_open)
        .collect();
    assert_eq!(bucket_20.len(), 1);
    assert_eq!(bucket_20[0].open_time, jittered_open);
    assert_eq!(bucket_20[0].close, 999.0);
    assert_eq!(outcome.candles.len(), 360);
}

#[tokio::test]
async fn test_rate_limited_range_is_reported_failed() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let store = MemoryStore::default();
    let source = ScriptedSource::default().rate_limited_at(vec![window.start]);
    let metadata = StaticMetadata::with("BTCUSDT", ts(2019, 9, 25, 0, 0));

    let outcome = reconciler(store.clone(), source.clone(), metadata)
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert_eq!(source.calls(), vec![window]);
    assert_eq!(outcome.fetched, 0);
    assert_eq!(outcome.failed_ranges, vec![window]);
    // Nothing fetched means nothing written.
    assert!(outcome.persisted);
    assert!(store.write_formats().is_empty());
}

#[tokio::test]
async fn test_severe_corruption_redownloads_entire_window() {
    let window = TimeRange::new(ts(2025, 8, 1, 0, 0), ts(2025, 8, 3, 0, 0));
    // 5 of 48 buckets present: far below the 50% full-redownload threshold.
    let skip: Vec<usize> = (5..48).collect();
    let local = series(window.start, window.end, MS_PER_HOUR, 100.0, &skip);
    let remote = series(window.start, window.end, MS_PER_HOUR, 999.0, &[]);
    let store = MemoryStore::seeded(local);
    let source = ScriptedSource::with_series(remote.clone());

    let outcome = reconciler(store, source.clone(), StaticMetadata::default())
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert_eq!(source.calls(), vec![window]);
    assert_eq!(outcome.candles, remote);
}

#[tokio::test]
async fn test_write_failure_still_returns_merged_set() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let remote = series(window.start, window.end, MS_PER_HOUR, 999.0, &[]);
    let store = MemoryStore { fail_writes: true, ..MemoryStore::default() };
    let source = ScriptedSource::with_series(remote.clone());
    let metadata = StaticMetadata::with("BTCUSDT", ts(2019, 9, 25, 0, 0));

    let outcome = reconciler(store, source, metadata)
        .reconcile("BTCUSDT", "1h", window)
        .await
        .unwrap();

    assert!(!outcome.persisted);
    assert!(outcome.write_error.is_some());
    assert_eq!(outcome.candles, remote);
}

#[tokio::test]
async fn test_unknown_interval_is_fatal() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let result = reconciler(
        MemoryStore::default(),
        ScriptedSource::default(),
        StaticMetadata::default(),
    )
    .reconcile("BTCUSDT", "2h", window)
    .await;

    assert!(matches!(result, Err(ReconcileError::UnknownInterval(_))));
}

#[tokio::test]
async fn test_invalid_window_is_rejected() {
    let window = TimeRange::new(ts(2025, 8, 11, 0, 0), ts(2025, 8, 10, 0, 0));
    let result = reconciler(
        MemoryStore::default(),
        ScriptedSource::default(),
        StaticMetadata::default(),
    )
    .reconcile("BTCUSDT", "1h", window)
    .await;

    assert!(matches!(result, Err(ReconcileError::InvalidWindow(_, _))));
}

#[tokio::test]
async fn test_analyze_is_exposed_and_pure() {
    let window = TimeRange::new(ts(2025, 8, 10, 0, 0), ts(2025, 8, 11, 0, 0));
    let records = series(window.start, window.end, MS_PER_HOUR, 100.0, &[5]);
    let engine = reconciler(
        MemoryStore::default(),
        ScriptedSource::default(),
        StaticMetadata::default(),
    );

    let report = engine
        .analyze("BTCUSDT", "1h", window, &records, ts(2025, 8, 15, 0, 0))
        .unwrap();
    assert_eq!(report.gaps.len(), 1);
    assert!(engine.analyze("BTCUSDT", "7h", window, &records, 0).is_err());
}
