use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::api::types::{ApiConfig, ApiError};
use crate::api::KlineSource;
use crate::calendar::Interval;
use crate::common::constants::KLINES_PATH;
use crate::common::structs::{Candle, TimeRange, TimestampMS};

/// Binance Futures klines client.
pub struct BinanceKlinesClient {
    client: reqwest::Client,
    config: ApiConfig,
    last_request: Mutex<Option<Instant>>,
}

impl BinanceKlinesClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config, last_request: Mutex::new(None) })
    }

    /// Enforce the minimum interval between requests. Shared across
    /// concurrent fetches, so a fan-out still respects the per-client pace.
    async fn throttle(&self) {
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                let delay = min_interval - elapsed;
                debug!("Rate limiting: waiting {:?} before next request", delay);
                sleep(delay).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn build_klines_url(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
        limit: u32,
    ) -> String {
        // Binance's endTime is inclusive; the half-open range end is backed
        // off one millisecond.
        format!(
            "{}{}?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.config.base_url,
            KLINES_PATH,
            symbol,
            interval,
            range.start,
            range.end - 1,
            limit.min(self.config.max_klines_per_request)
        )
    }

    /// Parse the raw array-of-arrays klines payload.
    fn parse_klines(&self, raw: Vec<serde_json::Value>) -> Result<Vec<Candle>, ApiError> {
        let mut candles = Vec::with_capacity(raw.len());

        for kline in raw {
            let fields = kline
                .as_array()
                .ok_or_else(|| ApiError::Parse("Expected kline to be an array".to_string()))?;
            if fields.len() < 12 {
                return Err(ApiError::Parse(format!(
                    "Expected at least 12 elements in kline array, got {}",
                    fields.len()
                )));
            }

            candles.push(Candle {
                open_time: parse_timestamp(&fields[0])?,
                close_time: parse_timestamp(&fields[6])?,
                open: parse_f64(&fields[1])?,
                high: parse_f64(&fields[2])?,
                low: parse_f64(&fields[3])?,
                close: parse_f64(&fields[4])?,
                volume: parse_f64(&fields[5])?,
                number_of_trades: parse_u64(&fields[8])?,
                taker_buy_volume: parse_f64(&fields[9])?,
                closed: true, // API data is always a completed bucket
            });
        }

        Ok(candles)
    }
}

impl KlineSource for BinanceKlinesClient {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        range: TimeRange,
        limit: u32,
    ) -> Result<Vec<Candle>, ApiError> {
        self.throttle().await;

        let url = self.build_klines_url(symbol, interval, range, limit);
        debug!("Fetching klines from: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(format!("Request timed out: {}", e))
            } else {
                ApiError::Network(format!("Request failed: {}", e))
            }
        })?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimit(format!(
                "Rate limit exceeded, retry after {} seconds",
                retry_after
            )));
        }

        if !response.status().is_success() {
            return Err(ApiError::Http(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Parse(format!("Failed to read response body: {}", e)))?;
        let raw: Vec<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse JSON: {}", e)))?;

        let mut candles = self.parse_klines(raw)?;
        // The source contract is half-open [start, end).
        candles.retain(|c| range.contains(c.open_time));

        info!("Fetched {} klines for {} {}", candles.len(), symbol, interval);
        Ok(candles)
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Result<TimestampMS, ApiError> {
    value
        .as_i64()
        .ok_or_else(|| ApiError::Parse(format!("Expected timestamp to be i64, got: {:?}", value)))
}

fn parse_f64(value: &serde_json::Value) -> Result<f64, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as f64", s))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to f64: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected string or number, got: {:?}", value))),
    }
}

fn parse_u64(value: &serde_json::Value) -> Result<u64, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as u64", s))),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to u64: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected string or number, got: {:?}", value))),
    }
}
