use thiserror::Error;

use crate::common::constants::{BINANCE_FUTURES_BASE_URL, MAX_KLINES_PER_REQUEST};
use crate::common::structs::Seconds;

/// Remote source error types
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl ApiError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimit(_))
    }
}

/// Configuration for the klines client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: Seconds,
    pub min_request_interval_ms: u64,
    pub max_klines_per_request: u32,
}

impl ApiConfig {
    /// Binance Futures defaults (20 req/s well under the 1200/min weight cap)
    pub fn binance_futures() -> Self {
        Self {
            base_url: BINANCE_FUTURES_BASE_URL.to_string(),
            timeout_seconds: 30,
            min_request_interval_ms: 50,
            max_klines_per_request: MAX_KLINES_PER_REQUEST,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::binance_futures()
    }
}
