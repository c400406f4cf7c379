/// Core type definitions for the candle cache
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::upstream::binance::DEFAULT_BASE_URL;

/// OHLCV bar keyed by (symbol, resolution, open_time)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub resolution: Resolution,
    /// Epoch milliseconds, aligned to a multiple of the resolution
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.open_time)
    }
}

/// Bucket duration a bar represents; the chart path serves every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "10m")]
    TenMinute,
    #[serde(rename = "15m")]
    FifteenMinute,
}

/// Resolution every stored bar is fetched at
pub const BASE_RESOLUTION: Resolution = Resolution::FiveMinute;


impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FiveMinute => "5m",
            Resolution::TenMinute => "10m",
            Resolution::FifteenMinute => "15m",
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        match self {
            Resolution::FiveMinute => 5,
            Resolution::TenMinute => 10,
            Resolution::FifteenMinute => 15,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_minutes() * 60_000
    }

    /// True when `self` can be built from whole bars of `base`
    pub fn is_multiple_of(&self, base: Resolution) -> bool {
        self.duration_minutes() % base.duration_minutes() == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5m" => Ok(Resolution::FiveMinute),
            "10m" => Ok(Resolution::TenMinute),
            "15m" => Ok(Resolution::FifteenMinute),
            other => Err(CacheError::InvalidParameter(format!(
                "unknown resolution: {}",
                other
            ))),
        }
    }
}

/// Backfill lookback period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    pub fn lookback(&self) -> Duration {
        match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(CacheError::InvalidParameter(format!(
                "period must be day/week/month, got {}",
                other
            ))),
        }
    }
}

/// A symbol that passed the allow-list check
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed set of tradable symbols
#[derive(Debug, Clone)]
pub struct SymbolAllowList {
    symbols: Vec<String>,
}

impl SymbolAllowList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SymbolAllowList {
            symbols: symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }

    /// Upper-case `raw` and accept it only if allow-listed
    pub fn parse(&self, raw: &str) -> Result<Symbol> {
        let normalized = raw.trim().to_ascii_uppercase();
        if self.symbols.iter().any(|s| *s == normalized) {
            Ok(Symbol(normalized))
        } else {
            Err(CacheError::InvalidSymbol(raw.to_string()))
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.symbols.iter().map(|s| Symbol(s.clone()))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Longest chart read window; a year of 5m bars is ~105k rows
pub const MAX_CHART_WINDOW_DAYS: i64 = 366;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Upstream
    pub upstream_base_url: String,
    pub upstream_batch_limit: usize,
    pub upstream_request_delay_ms: u64,
    pub upstream_timeout_sec: u64,

    // Storage
    pub database_path: String,
    pub flush_batch_size: usize,

    // Symbols
    pub allowed_symbols: Vec<String>,

    // Chart
    pub chart_window_days: i64,
    pub limit_min: usize,
    pub limit_max: usize,
    pub default_limit: usize,
    pub display_timezone: String,

    // Workers
    pub worker_count: usize,
    pub nack_delay_ms: u64,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            upstream_batch_limit: 1000,
            upstream_request_delay_ms: 250,
            upstream_timeout_sec: 15,
            database_path: "data/candles.db".to_string(),
            flush_batch_size: 1000,
            allowed_symbols: [
                "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT", "DOGEUSDT",
                "AVAXUSDT", "DOTUSDT", "LINKUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            chart_window_days: 30,
            limit_min: 20,
            limit_max: 500,
            default_limit: 100,
            display_timezone: "UTC".to_string(),
            worker_count: 1,
            nack_delay_ms: 1000,
            log_level: "candlecache=debug,info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl Config {
    pub fn allow_list(&self) -> SymbolAllowList {
        SymbolAllowList::new(&self.allowed_symbols)
    }

    /// Read window of the chart path, bounded by `MAX_CHART_WINDOW_DAYS`
    pub fn chart_window(&self) -> Result<Duration> {
        if self.chart_window_days <= 0 || self.chart_window_days > MAX_CHART_WINDOW_DAYS {
            return Err(CacheError::ConfigError(format!(
                "chart_window_days {} outside 1..={}",
                self.chart_window_days, MAX_CHART_WINDOW_DAYS
            )));
        }
        Ok(Duration::days(self.chart_window_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_normalizes_case() {
        let allow = SymbolAllowList::new(["BTCUSDT", "ethusdt"]);

        assert_eq!(allow.parse("btcusdt").unwrap().as_str(), "BTCUSDT");
        assert_eq!(allow.parse(" ETHUSDT ").unwrap().as_str(), "ETHUSDT");
        assert!(matches!(
            allow.parse("SHIBUSDT"),
            Err(CacheError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("15m".parse::<Resolution>().unwrap(), Resolution::FifteenMinute);
        assert_eq!(Resolution::TenMinute.duration_ms(), 600_000);
        assert!(Resolution::FifteenMinute.is_multiple_of(BASE_RESOLUTION));
        assert!(!Resolution::FiveMinute.is_multiple_of(Resolution::TenMinute));
        assert!("7m".parse::<Resolution>().is_err());
        assert!(matches!(
            "1h".parse::<Resolution>(),
            Err(CacheError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_chart_window_bounds() {
        assert_eq!(Config::default().chart_window().unwrap(), Duration::days(30));

        for days in [0, -1, MAX_CHART_WINDOW_DAYS + 1, i64::MAX] {
            let config = Config {
                chart_window_days: days,
                ..Config::default()
            };
            assert!(matches!(
                config.chart_window(),
                Err(CacheError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn test_period_lookback() {
        assert_eq!("WEEK".parse::<Period>().unwrap(), Period::Week);
        assert_eq!(Period::Month.lookback(), Duration::days(30));
        assert!("year".parse::<Period>().is_err());

        let period: Period = serde_json::from_str("\"day\"").unwrap();
        assert_eq!(period, Period::Day);
    }
}
