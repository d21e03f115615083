pub mod lmdb;
pub mod raw;


pub use lmdb::LmdbCandleStore;

use thiserror::Error;

use crate::calendar::Interval;
use crate::common::structs::{Candle, TimeRange};

/// Which representations a write-back produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    /// Durable store only (the normal backfill path).
    Durable,
    /// Durable store plus a raw CSV dump for forensic review of repaired
    /// corruption.
    DurableAndRaw,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Heed error: {0}")]
    Heed(#[from] heed::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Persist error: {0}")]
    Persist(String),
}

/// The local durable candle store.
///
/// Writes are idempotent upserts keyed by `open_time` and must be atomic: a
/// concurrent reader sees either none or all of one write call's records.
#[allow(async_fn_in_trait)]
pub trait CandleStore {
    async fn query(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
    ) -> Result<Vec<Candle>, StorageError>;

    async fn write(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
        format: WriteFormat,
    ) -> Result<(), StorageError>;
}
