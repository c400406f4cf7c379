/// Paginated, throttled upstream fetch
use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use tracing::debug;

use super::{KlineRequest, KlineSource};
use crate::error::{CacheError, Result};
use crate::types::{Bar, Resolution, Symbol};
use crate::utils::Throttle;

/// Walks an upstream range in bounded batches
pub struct UpstreamClient {
    source: Arc<dyn KlineSource>,
    throttle: Throttle,
    batch_limit: usize,
}

impl UpstreamClient {
    pub fn new(source: Arc<dyn KlineSource>, throttle: Throttle, batch_limit: usize) -> Self {
        UpstreamClient {
            source,
            throttle,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Lazy stream of ascending batches covering `[start, end)`.
    ///
    /// Each request starts one step past the previous batch's last bar. The
    /// stream ends on the first empty batch or once the cursor reaches `end`.
    /// Calling `fetch` again with the same range restarts from `start`.
    pub fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> impl Stream<Item = Result<Vec<Bar>>> + Send + 'a {
        let step = resolution.duration_ms();

        stream::try_unfold(start, move |cursor| async move {
            if cursor >= end {
                return Ok(None);
            }

            self.throttle.acquire().await;

            let request = KlineRequest {
                symbol: symbol.clone(),
                resolution,
                start: cursor,
                end,
                limit: self.batch_limit,
            };
            let batch = self.source.fetch_batch(&request).await?;

            let Some(last) = batch.last() else {
                debug!(symbol = %symbol, cursor, "Upstream returned empty batch");
                return Ok(None);
            };

            let next = last.open_time + step;
            if next <= cursor {
                return Err(CacheError::MalformedResponse(format!(
                    "batch for {} ended at {} before cursor {}",
                    symbol, last.open_time, cursor
                )));
            }

            debug!(symbol = %symbol, bars = batch.len(), next, "Fetched batch");
            Ok(Some((batch, next)))
        })
    }

    /// Concatenate every batch of `fetch` in order
    pub async fn fetch_all(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Bar>> {
        self.fetch(symbol, resolution, start, end).try_concat().await
    }
}
