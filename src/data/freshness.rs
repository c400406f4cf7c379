/// Coverage check and on-demand fill for a symbol window
use std::sync::Arc;

use futures_util::{pin_mut, TryStreamExt};
use tracing::{debug, info, warn};

use crate::data::BarStore;
use crate::error::{CacheError, Result};
use crate::types::{Resolution, Symbol};
use crate::upstream::UpstreamClient;

/// Outcome of a freshness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// A bar at or after the window start was already stored
    Covered { earliest: i64 },
    /// The window was missing and has been fetched
    Filled { fetched: usize, inserted: usize },
}

/// Decides whether the store covers a window and fills it when it does not.
///
/// Only the earliest in-window bar is checked. A fill that died midway can
/// leave an internal gap this check will not see.
pub struct FreshnessGuard {
    store: Arc<dyn BarStore>,
    client: Arc<UpstreamClient>,
}

impl FreshnessGuard {
    pub fn new(store: Arc<dyn BarStore>, client: Arc<UpstreamClient>) -> Self {
        FreshnessGuard { store, client }
    }

    pub async fn ensure_covered(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        window_start: i64,
        now: i64,
    ) -> Result<Coverage> {
        if let Some(bar) = self
            .store
            .find_earliest_at_or_after(symbol, resolution, window_start)
            .await?
        {
            debug!(symbol = %symbol, earliest = bar.open_time, "Window covered");
            return Ok(Coverage::Covered {
                earliest: bar.open_time,
            });
        }

        info!(symbol = %symbol, %resolution, window_start, now, "Window missing - filling from upstream");

        let mut fetched = 0;
        let mut inserted = 0;
        let batches = self.client.fetch(symbol, resolution, window_start, now);
        pin_mut!(batches);

        while let Some(batch) = batches.try_next().await? {
            fetched += batch.len();
            inserted += self.store.upsert_many(batch).await?;
        }

        if fetched == 0 {
            warn!(symbol = %symbol, "Upstream returned no data for window");
            return Err(CacheError::NoDataAvailable(format!(
                "upstream has no {} bars for {} since {}",
                resolution, symbol, window_start
            )));
        }

        info!(symbol = %symbol, fetched, inserted, "Window filled");
        Ok(Coverage::Filled { fetched, inserted })
    }
}
