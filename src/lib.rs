//! Self-healing reconciliation engine for fixed-width market candles.
//!
//! The library audits a locally stored candle series against its interval
//! calendar, classifies why data is missing, backfills the holes from the
//! remote exchange and persists the repaired series. The moving parts are:
//!
//! - [`calendar`]: trading intervals and bucket alignment arithmetic
//! - [`integrity`]: gap detection and the per-window integrity report
//! - [`metadata`]: symbol listing dates and missing-data classification
//! - [`api`]: the remote kline source ([`api::KlineSource`])
//! - [`storage`]: the durable local store ([`storage::CandleStore`])
//! - [`reconcile`]: the orchestrator tying the above together

pub mod api;
pub mod calendar;
pub mod common;
pub mod integrity;
pub mod logging;
pub mod metadata;
pub mod reconcile;
pub mod storage;

pub use calendar::Interval;
pub use common::structs::{Candle, TimeRange, TimestampMS};
pub use integrity::{GapDetector, GapDetectorConfig, IntegrityReport};
pub use reconcile::{ReconcileOutcome, Reconciler, ReconcilerConfig};
