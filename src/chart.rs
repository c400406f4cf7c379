/// Chart query path: freshness check, range read, resample, window
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::data::{resample, BarStore, FreshnessGuard, WindowSelector};
use crate::error::{CacheError, Result};
use crate::types::{Bar, Config, Resolution, SymbolAllowList, BASE_RESOLUTION};
use crate::utils::format_in_tz;

/// One bar as handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    pub open_time: i64,
    /// Open time in the display timezone
    pub open_time_local: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSlice {
    pub symbol: String,
    pub resolution: Resolution,
    pub limit: usize,
    pub offset: usize,
    pub timezone: String,
    pub bars: Vec<ChartBar>,
}

pub struct ChartService {
    allow_list: SymbolAllowList,
    guard: FreshnessGuard,
    store: Arc<dyn BarStore>,
    selector: WindowSelector,
    window: chrono::Duration,
    timezone: Tz,
}

impl ChartService {
    pub fn new(config: &Config, guard: FreshnessGuard, store: Arc<dyn BarStore>) -> Result<Self> {
        let timezone = config
            .display_timezone
            .parse::<Tz>()
            .map_err(|e| CacheError::ConfigError(format!("Invalid display_timezone: {}", e)))?;

        Ok(ChartService {
            allow_list: config.allow_list(),
            guard,
            store,
            selector: WindowSelector::new(config.limit_min, config.limit_max),
            window: config.chart_window()?,
            timezone,
        })
    }

    pub async fn get_slice(
        &self,
        symbol: &str,
        resolution: Resolution,
        limit: usize,
        offset: usize,
    ) -> Result<ChartSlice> {
        self.get_slice_at(symbol, resolution, limit, offset, Utc::now()).await
    }

    /// `get_slice` against an explicit clock
    pub async fn get_slice_at(
        &self,
        symbol: &str,
        resolution: Resolution,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> Result<ChartSlice> {
        // Validate before any I/O
        let symbol = self.allow_list.parse(symbol)?;
        self.selector.validate_limit(limit)?;

        let now_ms = now.timestamp_millis();
        let window_start = (now - self.window).timestamp_millis();

        self.guard
            .ensure_covered(&symbol, BASE_RESOLUTION, window_start, now_ms)
            .await?;

        let base = self
            .store
            .range(&symbol, BASE_RESOLUTION, window_start, now_ms)
            .await?;
        if offset >= base.len() {
            return Err(CacheError::OutOfRange {
                offset,
                limit,
                available: base.len(),
            });
        }

        // Offset is bounded by the base series; coarser series may run out first
        let series = resample(&base, resolution)?;
        let slice = self
            .selector
            .select_clamped(&series, limit, offset)
            .map_err(|e| match e {
                CacheError::EmptySlice(_) => CacheError::EmptySlice(format!(
                    "{} {} has {} bars, offset {}",
                    symbol,
                    resolution,
                    series.len(),
                    offset
                )),
                other => other,
            })?;
        debug!(
            symbol = %symbol,
            %resolution,
            base = base.len(),
            resampled = series.len(),
            returned = slice.len(),
            "Chart slice selected"
        );

        let bars = slice
            .iter()
            .map(|bar| self.to_chart_bar(bar))
            .collect::<Result<Vec<_>>>()?;

        Ok(ChartSlice {
            symbol: symbol.to_string(),
            resolution,
            limit,
            offset,
            timezone: self.timezone.name().to_string(),
            bars,
        })
    }

    fn to_chart_bar(&self, bar: &Bar) -> Result<ChartBar> {
        Ok(ChartBar {
            open_time: bar.open_time,
            open_time_local: format_in_tz(bar.open_time, &self.timezone)?,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        })
    }
}
