//! Interval calendar: named bucket widths and bucket-boundary alignment.
//!
//! Alignment is a mathematical floor: `align(align(t)) == align(t)` and
//! `align(t) <= t`. All sub-day widths divide a UTC day evenly and the epoch
//! is midnight UTC, so flooring to a width multiple lands exactly on the
//! hour/4-hour/day boundaries. Weekly buckets floor to Monday 00:00 UTC.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::common::constants::{MONDAY_EPOCH_OFFSET_MS, MS_PER_MINUTE, MS_PER_WEEK};
use crate::common::structs::TimestampMS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown interval: {0}")]
pub struct UnknownInterval(pub String);

/// Supported candle intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour4,
        Interval::Day1,
        Interval::Week1,
    ];

    pub fn parse(name: &str) -> Result<Self, UnknownInterval> {
        match name {
            "1m" => Ok(Interval::Min1),
            "5m" => Ok(Interval::Min5),
            "15m" => Ok(Interval::Min15),
            "30m" => Ok(Interval::Min30),
            "1h" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1d" => Ok(Interval::Day1),
            "1w" => Ok(Interval::Week1),
            other => Err(UnknownInterval(other.to_string())),
        }
    }

    /// Parse with the production fallback: an unrecognized name logs a
    /// warning and is treated as the smallest supported bucket.
    pub fn parse_lenient(name: &str) -> Self {
        match Self::parse(name) {
            Ok(interval) => interval,
            Err(_) => {
                warn!("Unrecognized interval '{}', falling back to 1m", name);
                Interval::Min1
            }
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Interval::Min1 => 1,
            Interval::Min5 => 5,
            Interval::Min15 => 15,
            Interval::Min30 => 30,
            Interval::Hour1 => 60,
            Interval::Hour4 => 240,
            Interval::Day1 => 1440,
            Interval::Week1 => 10080,
        }
    }

    pub fn width_ms(self) -> i64 {
        self.minutes() * MS_PER_MINUTE
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Min1 => "1m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
            Interval::Week1 => "1w",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

/// Floor a timestamp to the start of its bucket.
pub fn align(ts: TimestampMS, interval: Interval) -> TimestampMS {
    match interval {
        Interval::Week1 => {
            let shifted = ts - MONDAY_EPOCH_OFFSET_MS;
            shifted.div_euclid(MS_PER_WEEK) * MS_PER_WEEK + MONDAY_EPOCH_OFFSET_MS
        }
        _ => {
            let width = interval.width_ms();
            ts.div_euclid(width) * width
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> TimestampMS {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap().timestamp_millis()
    }

    #[test]
    fn test_align_is_idempotent_floor() {
        let samples = [
            ts(2025, 8, 10, 0, 0, 0),
            ts(2025, 8, 10, 13, 37, 42) + 123,
            ts(2021, 1, 1, 23, 59, 59),
            0,
        ];
        for interval in Interval::ALL {
            for &t in &samples {
                let a = align(t, interval);
                assert!(a <= t, "{interval}: align({t}) = {a} > t");
                assert_eq!(align(a, interval), a, "{interval}: alignment not idempotent");
            }
        }
    }

    #[test]
    fn test_align_sub_hour() {
        let t = ts(2025, 8, 10, 13, 37, 42);
        assert_eq!(align(t, Interval::Min1), ts(2025, 8, 10, 13, 37, 0));
        assert_eq!(align(t, Interval::Min5), ts(2025, 8, 10, 13, 35, 0));
        assert_eq!(align(t, Interval::Min15), ts(2025, 8, 10, 13, 30, 0));
        assert_eq!(align(t, Interval::Min30), ts(2025, 8, 10, 13, 30, 0));
    }

    #[test]
    fn test_align_hour_and_above() {
        let t = ts(2025, 8, 10, 13, 37, 42);
        assert_eq!(align(t, Interval::Hour1), ts(2025, 8, 10, 13, 0, 0));
        // 4h buckets land on hours divisible by 4
        assert_eq!(align(t, Interval::Hour4), ts(2025, 8, 10, 12, 0, 0));
        assert_eq!(align(t, Interval::Day1), ts(2025, 8, 10, 0, 0, 0));
    }

    #[test]
    fn test_align_week_to_monday() {
        // 2025-08-13 is a Wednesday; the enclosing week starts Monday 08-11.
        let wed = ts(2025, 8, 13, 15, 0, 0);
        assert_eq!(align(wed, Interval::Week1), ts(2025, 8, 11, 0, 0, 0));
        // A Monday midnight is already aligned.
        let mon = ts(2025, 8, 11, 0, 0, 0);
        assert_eq!(align(mon, Interval::Week1), mon);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Interval::parse("4h").unwrap(), Interval::Hour4);
        assert_eq!("15m".parse::<Interval>().unwrap(), Interval::Min15);
        assert!(Interval::parse("2h").is_err());
        assert_eq!(Interval::parse_lenient("3m"), Interval::Min1);
    }

    #[test]
    fn test_minutes_table() {
        assert_eq!(Interval::Min1.minutes(), 1);
        assert_eq!(Interval::Hour4.minutes(), 240);
        assert_eq!(Interval::Day1.minutes(), 1440);
        assert_eq!(Interval::Week1.width_ms(), 7 * 86_400_000);
    }
}
