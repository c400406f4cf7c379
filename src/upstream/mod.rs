pub mod binance;
pub mod client;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Bar, Resolution, Symbol};

pub use binance::BinanceSource;
pub use client::UpstreamClient;

/// One bounded upstream request covering `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRequest {
    pub symbol: Symbol,
    pub resolution: Resolution,
    pub start: i64,
    pub end: i64,
    pub limit: usize,
}

/// Single bounded fetch against a market-data API.
///
/// Implementations return at most `request.limit` bars ascending by
/// `open_time`; an empty batch means the API has nothing more for the range.
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch_batch(&self, request: &KlineRequest) -> Result<Vec<Bar>>;
}

#[cfg(test)]
pub(crate) mod stub;
