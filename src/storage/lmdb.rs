//! LMDB-backed durable candle store.
//!
//! One environment per `(symbol, interval)` under
//! `{base}/{SYMBOL}_{interval}/`, candles keyed by zero-padded open time so
//! lexicographic key order is chronological order. Each write call is a
//! single committed transaction, so concurrent readers never observe a
//! partial write.

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::calendar::Interval;
use crate::common::constants::{
    CANDLES_DB_NAME, LMDB_MAP_SIZE, LMDB_MAX_DBS, LMDB_MAX_READERS,
};
use crate::common::structs::{Candle, TimeRange, TimestampMS};
use crate::storage::{raw, CandleStore, StorageError, WriteFormat};

#[derive(Clone)]
struct SeriesHandle {
    env: Env,
    db: Database<Str, SerdeBincode<Candle>>,
}

pub struct LmdbCandleStore {
    base_path: PathBuf,
    series: Mutex<FxHashMap<(String, Interval), SeriesHandle>>,
}

impl LmdbCandleStore {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            series: Mutex::new(FxHashMap::default()),
        }
    }

    fn candle_key(open_time: TimestampMS) -> String {
        format!("{:015}", open_time)
    }

    /// Open (or lazily create) the environment for a symbol/interval pair.
    fn open_series(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<SeriesHandle, StorageError> {
        let key = (symbol.to_string(), interval);
        let mut series = self
            .series
            .lock()
            .map_err(|e| StorageError::Database(format!("Series map lock poisoned: {}", e)))?;

        if let Some(handle) = series.get(&key) {
            return Ok(handle.clone());
        }

        let dir = self.base_path.join(format!("{}_{}", symbol, interval));
        std::fs::create_dir_all(&dir)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(LMDB_MAP_SIZE)
                .max_dbs(LMDB_MAX_DBS)
                .max_readers(LMDB_MAX_READERS)
                .open(&dir)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database::<Str, SerdeBincode<Candle>>(&mut wtxn, Some(CANDLES_DB_NAME))?;
        wtxn.commit()?;

        debug!("Opened candle database for {} {} at {}", symbol, interval, dir.display());
        let handle = SeriesHandle { env, db };
        series.insert(key, handle.clone());
        Ok(handle)
    }

    fn query_sync(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
    ) -> Result<Vec<Candle>, StorageError> {
        let handle = self.open_series(symbol, interval)?;
        let rtxn = handle.env.read_txn()?;

        let start_key = Self::candle_key(range.start);
        let end_key = Self::candle_key(range.end);
        let bounds = (
            Bound::Included(&start_key[..]),
            Bound::Excluded(&end_key[..]),
        );

        let mut candles = Vec::new();
        for entry in handle.db.range(&rtxn, &bounds)? {
            let (_key, candle) = entry?;
            candles.push(candle);
        }

        debug!(
            "Queried {} candles for {} {} in [{}, {})",
            candles.len(),
            symbol,
            interval,
            range.start,
            range.end
        );
        Ok(candles)
    }

    fn write_sync(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
        format: WriteFormat,
    ) -> Result<(), StorageError> {
        if candles.is_empty() {
            return Ok(());
        }

        let handle = self.open_series(symbol, interval)?;
        let mut wtxn = handle.env.write_txn()?;
        for candle in candles {
            // Upsert: the remote source is authoritative, overwrite in place.
            let key = Self::candle_key(candle.open_time);
            handle.db.put(&mut wtxn, &key, candle)?;
        }
        wtxn.commit()?;

        debug!("Stored {} candles for {} {}", candles.len(), symbol, interval);

        if format == WriteFormat::DurableAndRaw {
            raw::write_raw_csv(&self.base_path, symbol, interval, candles)?;
        }
        Ok(())
    }
}

impl CandleStore for LmdbCandleStore {
    async fn query(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
    ) -> Result<Vec<Candle>, StorageError> {
        self.query_sync(symbol, interval, range)
    }

    async fn write(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
        format: WriteFormat,
    ) -> Result<(), StorageError> {
        self.write_sync(symbol, interval, candles, format)
    }
}
