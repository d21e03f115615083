//! Raw CSV dumps for forensic review of repaired data.
//!
//! Layout: `{base}/raw/{SYMBOL}/{interval}/{SYMBOL}-{interval}-{date}.csv`,
//! one file per UTC calendar day. Files are staged to a temp path in the
//! target directory and renamed into place so readers never see a
//! half-written file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{NaiveDate, TimeZone, Utc};
use tracing::info;

use crate::calendar::Interval;
use crate::common::constants::RAW_DIR_NAME;
use crate::common::structs::Candle;
use crate::storage::StorageError;

pub fn write_raw_csv(
    base_path: &Path,
    symbol: &str,
    interval: Interval,
    candles: &[Candle],
) -> Result<(), StorageError> {
    if candles.is_empty() {
        return Ok(());
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<&Candle>> = BTreeMap::new();
    for candle in candles {
        let date = Utc
            .timestamp_millis_opt(candle.open_time)
            .single()
            .map(|dt| dt.date_naive())
            .ok_or_else(|| {
                StorageError::Persist(format!("Invalid open_time {}", candle.open_time))
            })?;
        by_date.entry(date).or_default().push(candle);
    }

    let dir = base_path
        .join(RAW_DIR_NAME)
        .join(symbol)
        .join(interval.as_str());
    std::fs::create_dir_all(&dir)?;

    for (date, day_candles) in &by_date {
        let file_path = dir.join(format!("{}-{}-{}.csv", symbol, interval, date));

        let mut writer = csv::Writer::from_writer(Vec::new());
        for candle in day_candles {
            writer.serialize(candle)?;
        }
        let encoded = writer
            .into_inner()
            .map_err(|e| StorageError::Persist(format!("CSV flush failed: {}", e)))?;

        let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
        staged.write_all(&encoded)?;
        staged
            .persist(&file_path)
            .map_err(|e| StorageError::Io(e.error))?;
    }

    info!(
        "Wrote raw dump for {} {}: {} candles across {} day(s)",
        symbol,
        interval,
        candles.len(),
        by_date.len()
    );
    Ok(())
}
