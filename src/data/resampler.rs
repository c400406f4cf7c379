/// Aggregation of base bars into coarser epoch-aligned buckets
use std::collections::BTreeMap;

use crate::error::{CacheError, Result};
use crate::types::{Bar, Resolution};
use crate::utils::align_down;

/// Bucket under construction
#[derive(Debug, Clone)]
struct PartialBar {
    open_time: i64,
    first_seen: i64,
    last_seen: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl PartialBar {
    fn new(open_time: i64, bar: &Bar) -> Self {
        PartialBar {
            open_time,
            first_seen: bar.open_time,
            last_seen: bar.open_time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    fn update(&mut self, bar: &Bar) {
        if bar.open_time < self.first_seen {
            self.first_seen = bar.open_time;
            self.open = bar.open;
        }
        if bar.open_time > self.last_seen {
            self.last_seen = bar.open_time;
            self.close = bar.close;
        }
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.volume += bar.volume;
    }

    fn to_bar(&self, symbol: &str, resolution: Resolution) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            resolution,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Resample `series` to `target`.
///
/// Buckets are left-closed `[T, T + target)` with `T` a multiple of the target
/// duration counted from the Unix epoch, labelled by their start. Buckets with
/// no base bars are skipped. `target` equal to the series resolution passes the
/// series through unchanged.
pub fn resample(series: &[Bar], target: Resolution) -> Result<Vec<Bar>> {
    let Some(first) = series.first() else {
        return Ok(Vec::new());
    };
    let base = first.resolution;

    if target == base {
        return Ok(series.to_vec());
    }

    if target < base || !target.is_multiple_of(base) {
        return Err(CacheError::InvalidParameter(format!(
            "cannot resample {} bars to {}",
            base, target
        )));
    }

    let step = target.duration_ms();
    let mut buckets: BTreeMap<i64, PartialBar> = BTreeMap::new();

    for bar in series {
        if bar.resolution != base || bar.symbol != first.symbol {
            return Err(CacheError::InvalidParameter(format!(
                "mixed series: {} {} among {} {}",
                bar.symbol, bar.resolution, first.symbol, base
            )));
        }

        let bucket = align_down(bar.open_time, step);
        buckets
            .entry(bucket)
            .and_modify(|partial| partial.update(bar))
            .or_insert_with(|| PartialBar::new(bucket, bar));
    }

    Ok(buckets
        .values()
        .map(|partial| partial.to_bar(&first.symbol, target))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::stub::bar_at;

    const STEP: i64 = 300_000;

    fn ohlcv(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            open,
            high,
            low,
            close,
            volume,
            ..bar_at(open_time, 0.0)
        }
    }

    #[test]
    fn test_three_five_minute_bars_into_fifteen() {
        let series = vec![
            ohlcv(0, 10.0, 12.0, 9.0, 11.0, 1.0),
            ohlcv(STEP, 11.0, 15.0, 10.0, 14.0, 2.0),
            ohlcv(2 * STEP, 14.0, 14.5, 8.0, 13.0, 3.5),
        ];

        let out = resample(&series, Resolution::FifteenMinute).unwrap();
        assert_eq!(out.len(), 1);

        let bar = &out[0];
        assert_eq!(bar.open_time, 0);
        assert_eq!(bar.resolution, Resolution::FifteenMinute);
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.close, 13.0);
        assert_eq!(bar.high, 15.0);
        assert_eq!(bar.low, 8.0);
        assert_eq!(bar.volume, 6.5);
    }

    #[test]
    fn test_identity_passes_through() {
        let series: Vec<Bar> = (0..4).map(|i| bar_at(i * STEP, i as f64)).collect();
        assert_eq!(resample(&series, Resolution::FiveMinute).unwrap(), series);
    }

    #[test]
    fn test_buckets_anchor_to_epoch_not_first_bar() {
        // Series starts mid-bucket at 00:10
        let series: Vec<Bar> = (2..6).map(|i| bar_at(i * STEP, i as f64)).collect();

        let out = resample(&series, Resolution::FifteenMinute).unwrap();
        let times: Vec<i64> = out.iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![0, 3 * STEP]);
        // first bucket only holds the 00:10 bar
        assert_eq!(out[0].open, 2.0);
        assert_eq!(out[0].volume, 10.0);
        assert_eq!(out[1].volume, 30.0);
    }

    #[test]
    fn test_gaps_skip_empty_buckets() {
        // 00:00, 00:05, then nothing until 00:30
        let series = vec![bar_at(0, 1.0), bar_at(STEP, 2.0), bar_at(6 * STEP, 3.0)];

        let out = resample(&series, Resolution::TenMinute).unwrap();
        let times: Vec<i64> = out.iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![0, 6 * STEP]);
    }

    #[test]
    fn test_unsorted_input_keeps_first_and_last() {
        let series = vec![
            ohlcv(2 * STEP, 14.0, 14.5, 8.0, 13.0, 1.0),
            ohlcv(0, 10.0, 12.0, 9.0, 11.0, 1.0),
            ohlcv(STEP, 11.0, 15.0, 10.0, 14.0, 1.0),
        ];

        let out = resample(&series, Resolution::FifteenMinute).unwrap();
        assert_eq!(out[0].open, 10.0);
        assert_eq!(out[0].close, 13.0);
    }

    #[test]
    fn test_rejects_non_multiple_target() {
        let ten = resample(&[bar_at(0, 1.0), bar_at(STEP, 2.0)], Resolution::TenMinute).unwrap();
        // 10m does not divide into 15m, and 5m is finer than 10m
        assert!(resample(&ten, Resolution::FifteenMinute).is_err());
        assert!(resample(&ten, Resolution::FiveMinute).is_err());
        assert!(resample(&[], Resolution::FifteenMinute).unwrap().is_empty());
    }
}
