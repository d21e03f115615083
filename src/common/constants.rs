/// Time constants
pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 86_400_000;
pub const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;
// The epoch fell on a Thursday; the first Monday is 4 days in.
pub const MONDAY_EPOCH_OFFSET_MS: i64 = 4 * MS_PER_DAY;

// LMDB configuration
pub const LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB per symbol-interval
pub const LMDB_MAX_DBS: u32 = 4;
pub const LMDB_MAX_READERS: u32 = 256;
pub const CANDLES_DB_NAME: &str = "candles";

// Remote source
pub const BINANCE_FUTURES_BASE_URL: &str = "https://fapi.binance.com";
pub const KLINES_PATH: &str = "/fapi/v1/klines";
pub const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
pub const MAX_KLINES_PER_REQUEST: u32 = 1000;

// Raw forensic dumps
pub const RAW_DIR_NAME: &str = "raw";
