//! Gap detection for candle series.
//!
//! `GapDetector::analyze` is pure: it compares the buckets that should exist
//! in a window (clipped to "now") against the buckets actually present and
//! reports the exact missing set, grouped into contiguous gaps and coalesced
//! into repair ranges.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{align, Interval};
use crate::common::constants::MS_PER_HOUR;
use crate::common::structs::{Candle, TimeRange, TimestampMS};


/// Why a stretch of buckets is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapKind {
    /// The window holds no records at all.
    NoData,
    /// A hole between two consecutive records.
    TimeGap,
    /// A calendar period with fewer records than expected.
    IncompletePeriod,
    /// Exact missing buckets found by expected-set enumeration.
    PreciseMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GapSeverity {
    Low,
    Medium,
    High,
}

/// A contiguous run of expected-but-absent buckets. `end` is inclusive at
/// millisecond precision (last missing bucket's final millisecond).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start: TimestampMS,
    pub end: TimestampMS,
    pub kind: GapKind,
    pub expected_count: u32,
    pub actual_count: u32,
    pub severity: GapSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub symbol: String,
    pub interval: Interval,
    pub effective_range: TimeRange,
    pub total_records: usize,
    pub expected_records: i64,
    pub completeness_ratio: f64,
    pub gaps: Vec<Gap>,
    pub is_healthy: bool,
    pub needs_repair: bool,
    pub repair_ranges: Vec<TimeRange>,
}

/// Thresholds preserved from production; product decisions, not derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapDetectorConfig {
    /// Minimum completeness ratio (with zero gaps) to call a window healthy.
    pub healthy_ratio: f64,
    /// Below this ratio the window needs repair regardless of gap severity.
    pub repair_ratio: f64,
    /// Missing runs at least this long are High severity.
    pub high_severity_run: u32,
    /// Missing runs at least this long are Medium severity.
    pub medium_severity_run: u32,
    /// Gaps closer than this are merged into one repair range.
    pub coalesce_within_ms: i64,
}

impl Default for GapDetectorConfig {
    fn default() -> Self {
        Self {
            healthy_ratio: 0.999,
            repair_ratio: 0.99,
            high_severity_run: 10,
            medium_severity_run: 3,
            coalesce_within_ms: MS_PER_HOUR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    config: GapDetectorConfig,
}

impl GapDetector {
    pub fn new(config: GapDetectorConfig) -> Self {
        Self { config }
    }

    /// Analyze a window against the records actually present.
    ///
    /// The window end is clipped to `now`: unelapsed time is never missing
    /// data. Records are matched by their bucket-aligned open time, so
    /// sub-bucket timestamp jitter cannot cause false gaps.
    pub fn analyze(
        &self,
        symbol: &str,
        interval: Interval,
        window: TimeRange,
        records: &[Candle],
        now: TimestampMS,
    ) -> IntegrityReport {
        // Entirely-future window: complete by definition.
        if window.start >= now {
            return self.trivially_healthy(symbol, interval, window, records.len());
        }

        let effective_range = TimeRange::new(window.start, window.end.min(now));
        let width = interval.width_ms();
        let expected_records = effective_range.duration_ms() / width;

        // Shorter than one bucket: nothing can be expected of it.
        if expected_records <= 0 {
            return self.trivially_healthy(symbol, interval, effective_range, records.len());
        }

        let total_records = records.len();
        let completeness_ratio = total_records as f64 / expected_records.max(1) as f64;

        let gaps = if records.is_empty() {
            vec![Gap {
                start: effective_range.start,
                end: effective_range.end - 1,
                kind: GapKind::NoData,
                expected_count: expected_records as u32,
                actual_count: 0,
                severity: GapSeverity::High,
            }]
        } else {
            self.detect_missing_buckets(interval, effective_range, records)
        };

        let repair_ranges = self.coalesce_repair_ranges(&gaps);

        let is_healthy = completeness_ratio >= self.config.healthy_ratio && gaps.is_empty();
        let needs_repair = completeness_ratio < self.config.repair_ratio
            || gaps.iter().any(|g| g.severity == GapSeverity::High);

        debug!(
            "Integrity {} {}: {}/{} records ({:.2}%), {} gaps, healthy={}, needs_repair={}",
            symbol,
            interval,
            total_records,
            expected_records,
            completeness_ratio * 100.0,
            gaps.len(),
            is_healthy,
            needs_repair
        );

        IntegrityReport {
            symbol: symbol.to_string(),
            interval,
            effective_range,
            total_records,
            expected_records,
            completeness_ratio,
            gaps,
            is_healthy,
            needs_repair,
            repair_ranges,
        }
    }

    fn trivially_healthy(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
        total_records: usize,
    ) -> IntegrityReport {
        IntegrityReport {
            symbol: symbol.to_string(),
            interval,
            effective_range: range,
            total_records,
            expected_records: 0,
            completeness_ratio: 1.0,
            gaps: Vec::new(),
            is_healthy: true,
            needs_repair: false,
            repair_ranges: Vec::new(),
        }
    }

    /// Enumerate every expected bucket start in the clipped window and
    /// subtract the aligned set of buckets actually present.
    fn detect_missing_buckets(
        &self,
        interval: Interval,
        range: TimeRange,
        records: &[Candle],
    ) -> Vec<Gap> {
        let width = interval.width_ms();

        let present: FxHashSet<TimestampMS> = records
            .iter()
            .map(|c| align(c.open_time, interval))
            .collect();

        let mut missing = Vec::new();
        let mut bucket = align(range.start, interval);
        while bucket < range.end {
            if !present.contains(&bucket) {
                missing.push(bucket);
            }
            bucket += width;
        }

        self.group_missing_into_gaps(&missing, width)
    }

    /// Group consecutive missing bucket starts (exactly one width apart)
    /// into contiguous gaps.
    fn group_missing_into_gaps(&self, missing: &[TimestampMS], width: i64) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let mut run_start = match missing.first() {
            Some(&first) => first,
            None => return gaps,
        };
        let mut run_len = 1u32;
        let mut prev = run_start;

        for &ts in &missing[1..] {
            if ts == prev + width {
                run_len += 1;
            } else {
                gaps.push(self.gap_from_run(run_start, run_len, width));
                run_start = ts;
                run_len = 1;
            }
            prev = ts;
        }
        gaps.push(self.gap_from_run(run_start, run_len, width));
        gaps
    }

    fn gap_from_run(&self, start: TimestampMS, len: u32, width: i64) -> Gap {
        let severity = if len >= self.config.high_severity_run {
            GapSeverity::High
        } else if len >= self.config.medium_severity_run {
            GapSeverity::Medium
        } else {
            GapSeverity::Low
        };

        Gap {
            start,
            end: start + len as i64 * width - 1,
            kind: GapKind::PreciseMissing,
            expected_count: len,
            actual_count: 0,
            severity,
        }
    }

    /// Merge gaps separated by less than the coalescing threshold into a
    /// sorted, non-overlapping cover. This bounds the number of follow-up
    /// fetch calls instead of issuing one per tiny gap.
    fn coalesce_repair_ranges(&self, gaps: &[Gap]) -> Vec<TimeRange> {
        let mut sorted: Vec<&Gap> = gaps.iter().collect();
        sorted.sort_by_key(|g| g.start);

        let mut ranges = Vec::new();
        let mut iter = sorted.into_iter();
        let first = match iter.next() {
            Some(gap) => gap,
            None => return ranges,
        };

        let mut current_start = first.start;
        let mut current_end = first.end;

        for gap in iter {
            if gap.start - current_end <= self.config.coalesce_within_ms {
                current_end = current_end.max(gap.end);
            } else {
                ranges.push(TimeRange::new(current_start, current_end));
                current_start = gap.start;
                current_end = gap.end;
            }
        }
        ranges.push(TimeRange::new(current_start, current_end));
        ranges
    }
}
