//! Reconciliation orchestrator: detect -> classify -> backfill -> merge ->
//! persist for one symbol/interval/window.
//!
//! The engine is stateless between calls. Concurrent calls for different
//! symbols are safe; the store upsert is atomic per write call, but callers
//! wanting at-most-one reconciliation in flight per `(symbol, interval)`
//! must serialize externally.

pub mod errors;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::api::{ApiError, KlineSource};
use crate::calendar::{align, Interval, UnknownInterval};
use crate::common::structs::{Candle, TimeRange, TimestampMS};
use crate::integrity::{GapDetector, IntegrityReport};
use crate::metadata::{classify_missing, ListingMetadata, MissingDataKind};
use crate::storage::{CandleStore, StorageError, WriteFormat};

pub use errors::ReconcileError;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Upper bound on simultaneous in-flight remote fetches.
    pub max_concurrent_fetches: usize,
    /// Per-fetch deadline; a timed-out fetch counts as a failed branch.
    pub fetch_timeout: Duration,
    /// Floor for the per-fetch record hint.
    pub min_fetch_limit: u32,
    /// Cap for the per-fetch record hint.
    pub max_fetch_limit: u32,
    /// Below this completeness ratio the whole window is re-downloaded
    /// instead of patching individual ranges.
    pub full_redownload_below: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            fetch_timeout: Duration::from_secs(30),
            min_fetch_limit: 100,
            max_fetch_limit: 1000,
            full_redownload_below: 0.5,
        }
    }
}

/// Result of one reconciliation call. Always carries a valid, sorted,
/// deduplicated record set, even when some repair branches failed.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub candles: Vec<Candle>,
    pub report: IntegrityReport,
    /// Records obtained from the remote source in this call.
    pub fetched: usize,
    /// Repair ranges whose fetch failed or timed out; they remain gaps for
    /// the next call.
    pub failed_ranges: Vec<TimeRange>,
    /// False when the post-merge write-back failed; the merged set is still
    /// returned so the caller can retry the whole reconciliation later.
    pub persisted: bool,
    pub write_error: Option<StorageError>,
}

struct RepairPlan {
    ranges: Vec<TimeRange>,
    corruption: bool,
}

pub struct Reconciler<S, R, M> {
    store: S,
    source: R,
    metadata: M,
    detector: GapDetector,
    config: ReconcilerConfig,
    fetch_slots: Semaphore,
}

impl<S, R, M> Reconciler<S, R, M>
where
    S: CandleStore,
    R: KlineSource,
    M: ListingMetadata,
{
    pub fn new(
        store: S,
        source: R,
        metadata: M,
        detector: GapDetector,
        config: ReconcilerConfig,
    ) -> Self {
        let fetch_slots = Semaphore::new(config.max_concurrent_fetches.max(1));
        Self { store, source, metadata, detector, config, fetch_slots }
    }

    /// Pure integrity analysis, independent of the store and source.
    pub fn analyze(
        &self,
        symbol: &str,
        interval_name: &str,
        window: TimeRange,
        records: &[Candle],
        now: TimestampMS,
    ) -> Result<IntegrityReport, UnknownInterval> {
        let interval = Interval::parse(interval_name)?;
        Ok(self.detector.analyze(symbol, interval, window, records, now))
    }

    /// Reconcile the local store with the remote source for one window.
    pub async fn reconcile(
        &self,
        symbol: &str,
        interval_name: &str,
        window: TimeRange,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let interval = Interval::parse(interval_name)?;
        if !window.is_valid() {
            return Err(ReconcileError::InvalidWindow(window.start, window.end));
        }

        let existing = self.store.query(symbol, interval, window).await?;
        let now = Utc::now().timestamp_millis();
        let report = self.detector.analyze(symbol, interval, window, &existing, now);

        info!(
            "Reconcile {} {}: completeness {:.2}%, {} gaps, needs_repair={}",
            symbol,
            interval,
            report.completeness_ratio * 100.0,
            report.gaps.len(),
            report.needs_repair
        );

        let plan = self.plan_repair(symbol, window, &report);
        if plan.ranges.is_empty() {
            return Ok(ReconcileOutcome {
                candles: existing,
                report,
                fetched: 0,
                failed_ranges: Vec::new(),
                persisted: true,
                write_error: None,
            });
        }

        let (fetched, failed_ranges) = self.fetch_ranges(symbol, interval, &plan.ranges).await;
        let fetched_count = fetched.len();
        let merged = merge_candles(interval, existing, fetched);

        // Write-back happens only after the complete merge, never per
        // sub-window, so a cancelled call cannot leave a torn partition.
        let mut persisted = true;
        let mut write_error = None;
        if fetched_count > 0 {
            let format = if plan.corruption {
                WriteFormat::DurableAndRaw
            } else {
                WriteFormat::Durable
            };
            if let Err(e) = self.store.write(symbol, interval, &merged, format).await {
                error!("Write-back failed for {} {}: {}", symbol, interval, e);
                persisted = false;
                write_error = Some(e);
            }
        }

        Ok(ReconcileOutcome {
            candles: merged,
            report,
            fetched: fetched_count,
            failed_ranges,
            persisted,
            write_error,
        })
    }

    /// Turn an integrity report into the list of windows to backfill.
    fn plan_repair(&self, symbol: &str, window: TimeRange, report: &IntegrityReport) -> RepairPlan {
        if report.is_healthy {
            return RepairPlan { ranges: Vec::new(), corruption: false };
        }

        // Zero records: only the listing metadata can tell whether this is
        // an expected blank (pre-listing) or lost data.
        if report.total_records == 0 {
            let classification = classify_missing(&self.metadata, symbol, window);
            let corruption = classification.kind == MissingDataKind::Corruption;
            let ranges = match classification.fetch_window {
                Some(fetch_window) => vec![fetch_window],
                None => {
                    info!("{} listed after the whole window, nothing to backfill", symbol);
                    Vec::new()
                }
            };
            return RepairPlan { ranges, corruption };
        }

        if report.needs_repair && report.completeness_ratio < self.config.full_redownload_below {
            warn!(
                "{} {} severely incomplete ({:.1}%), re-downloading entire window",
                symbol,
                report.interval,
                report.completeness_ratio * 100.0
            );
            return RepairPlan { ranges: vec![window], corruption: false };
        }

        RepairPlan { ranges: report.repair_ranges.clone(), corruption: false }
    }

    /// Fan out one bounded-concurrency fetch per repair range and gather
    /// results. A failed or timed-out branch is logged with its bounds and
    /// excluded; it never aborts the siblings.
    async fn fetch_ranges(
        &self,
        symbol: &str,
        interval: Interval,
        ranges: &[TimeRange],
    ) -> (Vec<Candle>, Vec<TimeRange>) {
        let branches = ranges.iter().map(|&range| {
            let limit = self.fetch_limit(interval, range);
            async move {
                let permit = match self.fetch_slots.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return (range, Err(ApiError::Network(format!("fetch slot closed: {}", e))))
                    }
                };
                let result = match tokio::time::timeout(
                    self.config.fetch_timeout,
                    self.source.fetch(symbol, interval, range, limit),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(format!(
                        "fetch exceeded {:?}",
                        self.config.fetch_timeout
                    ))),
                };
                drop(permit);
                (range, result)
            }
        });

        let mut fetched = Vec::new();
        let mut failed = Vec::new();
        for (range, result) in join_all(branches).await {
            match result {
                Ok(candles) => {
                    info!(
                        "Backfilled {} candles for {} {} in [{}, {})",
                        candles.len(),
                        symbol,
                        interval,
                        range.start,
                        range.end
                    );
                    fetched.extend(candles);
                }
                Err(e) => {
                    if e.is_rate_limit() {
                        warn!(
                            "Rate limited while backfilling {} {} in [{}, {}): {}",
                            symbol, interval, range.start, range.end, e
                        );
                    } else {
                        warn!(
                            "Backfill failed for {} {} in [{}, {}): {}",
                            symbol, interval, range.start, range.end, e
                        );
                    }
                    failed.push(range);
                }
            }
        }
        (fetched, failed)
    }

    /// Expected records for the range with 2x headroom, clamped to sane
    /// per-call bounds.
    fn fetch_limit(&self, interval: Interval, range: TimeRange) -> u32 {
        let expected = range.duration_ms() / interval.width_ms();
        (expected * 2).clamp(
            self.config.min_fetch_limit as i64,
            self.config.max_fetch_limit as i64,
        ) as u32
    }
}

/// Merge existing and fetched records, deduplicating by bucket-aligned open
/// time so a locally stored record with sub-bucket jitter and its refetched
/// aligned counterpart never both survive. Fetched records are inserted
/// second and win: the remote source is authoritative.
fn merge_candles(interval: Interval, existing: Vec<Candle>, fetched: Vec<Candle>) -> Vec<Candle> {
    let mut merged: BTreeMap<TimestampMS, Candle> = BTreeMap::new();
    for candle in existing.into_iter().chain(fetched) {
        merged.insert(align(candle.open_time, interval), candle);
    }
    merged.into_values().collect()
}
