/// Binance REST kline source
use async_trait::async_trait;
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

use super::{KlineRequest, KlineSource};
use crate::error::{CacheError, Result};
use crate::types::Bar;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com/api/v3/klines";

/// Raw kline tuple: `[open_time, open, high, low, close, volume, close_time, ...]`
#[derive(Debug, Deserialize)]
struct FetchedKline(
    i64,
    #[serde(deserialize_with = "de_string_to_f64")] f64,
    #[serde(deserialize_with = "de_string_to_f64")] f64,
    #[serde(deserialize_with = "de_string_to_f64")] f64,
    #[serde(deserialize_with = "de_string_to_f64")] f64,
    #[serde(deserialize_with = "de_string_to_f64")] f64,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

fn de_string_to_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Binance spot klines client
pub struct BinanceSource {
    client: Client,
    base_url: String,
}

impl BinanceSource {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(BinanceSource {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl KlineSource for BinanceSource {
    async fn fetch_batch(&self, request: &KlineRequest) -> Result<Vec<Bar>> {
        debug!(
            symbol = %request.symbol,
            resolution = %request.resolution,
            start = request.start,
            end = request.end,
            "Fetching klines"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&kline_query(request))
            .send()
            .await
            .map_err(|e| CacheError::UpstreamUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CacheError::UpstreamUnavailable(format!(
                "{} returned {}: {}",
                self.base_url, status, body
            )));
        }

        let bars = parse_klines(&body, request)?;
        debug!("Fetched {} klines", bars.len());
        Ok(bars)
    }
}

/// Query parameters for one page; `[start, end)` maps onto an inclusive `endTime`
fn kline_query(request: &KlineRequest) -> [(&'static str, String); 5] {
    [
        ("symbol", request.symbol.as_str().to_string()),
        ("interval", request.resolution.as_str().to_string()),
        ("startTime", request.start.to_string()),
        ("endTime", (request.end - 1).to_string()),
        ("limit", request.limit.to_string()),
    ]
}

/// Decode a kline array body into bars for `request`
pub fn parse_klines(body: &str, request: &KlineRequest) -> Result<Vec<Bar>> {
    let fetched: Vec<FetchedKline> = serde_json::from_str(body)
        .map_err(|e| CacheError::MalformedResponse(format!("kline decode failed: {}", e)))?;

    let step = request.resolution.duration_ms();
    let mut bars = Vec::with_capacity(fetched.len());

    for FetchedKline(open_time, open, high, low, close, volume, ..) in fetched {
        if open_time.rem_euclid(step) != 0 {
            return Err(CacheError::MalformedResponse(format!(
                "open_time {} not aligned to {}",
                open_time, request.resolution
            )));
        }

        bars.push(Bar {
            symbol: request.symbol.to_string(),
            resolution: request.resolution,
            open_time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(bars)
}
