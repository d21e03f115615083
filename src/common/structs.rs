use chrono::Utc;
use serde::{Deserialize, Serialize};

pub type TimestampMS = i64;
pub type Seconds = u64;

/// Half-open time window `[start, end)` in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimestampMS,
    pub end: TimestampMS,
}

impl TimeRange {
    pub fn new(start: TimestampMS, end: TimestampMS) -> Self {
        Self { start, end }
    }

    pub fn last_minutes(minutes: i64) -> Self {
        let end = Utc::now().timestamp_millis();
        Self { start: end - minutes * 60_000, end }
    }

    pub fn last_hours(hours: i64) -> Self {
        Self::last_minutes(hours * 60)
    }

    pub fn last_days(days: i64) -> Self {
        Self::last_minutes(days * 24 * 60)
    }

    /// Approximate: a month is counted as 30 days.
    pub fn last_months(months: i64) -> Self {
        Self::last_days(months * 30)
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn contains(&self, ts: TimestampMS) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// One closed time bucket of market data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: TimestampMS,
    pub close_time: TimestampMS,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub number_of_trades: u64,
    pub taker_buy_volume: f64,
    pub closed: bool,
}
