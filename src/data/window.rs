/// Most-recent-first slicing of an ascending series
use crate::error::{CacheError, Result};

/// Bounded slice selection over ascending series
#[derive(Debug, Clone, Copy)]
pub struct WindowSelector {
    limit_min: usize,
    limit_max: usize,
}

impl WindowSelector {
    pub fn new(limit_min: usize, limit_max: usize) -> Self {
        WindowSelector {
            limit_min,
            limit_max,
        }
    }

    pub fn validate_limit(&self, limit: usize) -> Result<()> {
        if limit < self.limit_min || limit > self.limit_max {
            return Err(CacheError::InvalidParameter(format!(
                "limit {} outside {}..={}",
                limit, self.limit_min, self.limit_max
            )));
        }
        Ok(())
    }

    /// Skip the `offset` most recent items, then take up to `limit` older ones.
    ///
    /// The slice keeps the series' ascending order. `offset == 0` returns the
    /// newest page even if the series is shorter than `limit`; any deeper page
    /// must fit entirely within the series.
    pub fn select<'a, T>(&self, series: &'a [T], limit: usize, offset: usize) -> Result<&'a [T]> {
        self.validate_limit(limit)?;

        let available = series.len();
        if available == 0 {
            return Err(CacheError::EmptySlice("series is empty".to_string()));
        }

        let out_of_range = offset >= available || (offset > 0 && offset + limit > available);
        if out_of_range {
            return Err(CacheError::OutOfRange {
                offset,
                limit,
                available,
            });
        }

        let end = available - offset;
        let start = end.saturating_sub(limit);
        Ok(&series[start..end])
    }

    /// Like `select`, but a page that runs past either end is cut short
    /// instead of rejected. Nothing left is `EmptySlice`.
    pub fn select_clamped<'a, T>(&self, series: &'a [T], limit: usize, offset: usize) -> Result<&'a [T]> {
        self.validate_limit(limit)?;

        let end = series.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        if start == end {
            return Err(CacheError::EmptySlice(format!(
                "offset {} leaves nothing of {} bars",
                offset,
                series.len()
            )));
        }
        Ok(&series[start..end])
    }
}
