pub mod binance;
pub mod types;

pub use binance::BinanceKlinesClient;
pub use types::{ApiConfig, ApiError};

use crate::calendar::Interval;
use crate::common::structs::{Candle, TimeRange};

/// The remote, authoritative candle source.
///
/// Implementations must return only candles whose open time falls within the
/// half-open `[range.start, range.end)` window.
#[allow(async_fn_in_trait)]
pub trait KlineSource {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
        limit: u32,
    ) -> Result<Vec<Candle>, ApiError>;
}
