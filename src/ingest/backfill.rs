/// Historical backfill for a symbol over a lookback period
/// Resumes past the latest stored bar instead of refetching the period
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{pin_mut, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::data::BarStore;
use crate::error::Result;
use crate::types::{Bar, Period, Symbol, BASE_RESOLUTION};
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub period: Period,
    /// Epoch ms the fetch started from
    pub fetch_start: i64,
    /// Set when an earlier run already stored part of the period
    pub resumed_from: Option<i64>,
    pub bars_fetched: usize,
    pub bars_stored: usize,
    pub duration_ms: i64,
}

pub struct Backfiller {
    store: Arc<dyn BarStore>,
    client: Arc<UpstreamClient>,
    flush_batch_size: usize,
}

impl Backfiller {
    pub fn new(store: Arc<dyn BarStore>, client: Arc<UpstreamClient>, flush_batch_size: usize) -> Self {
        Backfiller {
            store,
            client,
            flush_batch_size: flush_batch_size.max(1),
        }
    }

    /// Backfill `period` up to now; returns the report whose `bars_stored` is the new-bar count
    pub async fn backfill(&self, symbol: &Symbol, period: Period) -> Result<BackfillReport> {
        self.backfill_at(symbol, period, Utc::now()).await
    }

    pub async fn backfill_at(
        &self,
        symbol: &Symbol,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport> {
        let step = BASE_RESOLUTION.duration_ms();
        let now_ms = now.timestamp_millis();
        let period_start = (now - period.lookback()).timestamp_millis();

        let latest = self
            .store
            .find_latest_at_or_after(symbol, BASE_RESOLUTION, period_start)
            .await?;
        let resumed_from = latest.map(|bar| bar.open_time + step);
        let fetch_start = resumed_from.unwrap_or(period_start);

        info!(
            symbol = %symbol,
            %period,
            fetch_start,
            resumed = resumed_from.is_some(),
            "Starting backfill"
        );

        let mut report = BackfillReport {
            timestamp: now,
            symbol: symbol.to_string(),
            period,
            fetch_start,
            resumed_from,
            bars_fetched: 0,
            bars_stored: 0,
            duration_ms: 0,
        };

        let mut pending: Vec<Bar> = Vec::with_capacity(self.flush_batch_size);
        let batches = self.client.fetch(symbol, BASE_RESOLUTION, fetch_start, now_ms);
        pin_mut!(batches);

        while let Some(batch) = batches.try_next().await? {
            report.bars_fetched += batch.len();
            pending.extend(batch);

            while pending.len() >= self.flush_batch_size {
                let group: Vec<Bar> = pending.drain(..self.flush_batch_size).collect();
                report.bars_stored += self.flush(group).await?;
            }
        }
        report.bars_stored += self.flush(pending).await?;

        report.duration_ms = (Utc::now() - now).num_milliseconds().max(0);
        info!(
            symbol = %symbol,
            %period,
            fetched = report.bars_fetched,
            stored = report.bars_stored,
            "Backfill finished"
        );

        Ok(report)
    }

    /// Upsert one group of at most `flush_batch_size` bars
    async fn flush(&self, bars: Vec<Bar>) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let submitted = bars.len();
        let stored = self.store.upsert_many(bars).await?;
        debug!(submitted, stored, "Flushed backfill batch");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SqliteBarStore;
    use crate::types::Resolution;
    use crate::upstream::stub::{test_symbol, StubSource};
    use crate::utils::Throttle;
    use chrono::TimeZone;

    const STEP: i64 = 300_000;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn backfiller(source: Arc<StubSource>, flush: usize) -> (Backfiller, Arc<SqliteBarStore>) {
        let store = Arc::new(SqliteBarStore::open_in_memory().unwrap());
        let client = Arc::new(UpstreamClient::new(source, Throttle::from_millis(0), 100));
        (Backfiller::new(store.clone(), client, flush), store)
    }

    #[tokio::test]
    async fn test_day_backfill_from_empty_store() {
        let source = Arc::new(StubSource::with_history(0, now().timestamp_millis()));
        let (backfiller, store) = backfiller(source.clone(), 250);
        let symbol = test_symbol();

        let report = backfiller.backfill_at(&symbol, Period::Day, now()).await.unwrap();

        assert_eq!(report.bars_fetched, 288);
        assert_eq!(report.bars_stored, 288);
        assert!(report.resumed_from.is_none());
        assert_eq!(report.fetch_start, now().timestamp_millis() - 288 * STEP);
        assert_eq!(store.count(&symbol, Resolution::FiveMinute).await.unwrap(), 288);
        assert_eq!(source.calls(), 3);
    }

    /// Records the size of every upsert before delegating
    struct RecordingStore {
        inner: SqliteBarStore,
        groups: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl BarStore for RecordingStore {
        async fn upsert_many(&self, bars: Vec<Bar>) -> Result<usize> {
            self.groups.lock().unwrap().push(bars.len());
            self.inner.upsert_many(bars).await
        }

        async fn find_earliest_at_or_after(
            &self,
            symbol: &Symbol,
            resolution: Resolution,
            time: i64,
        ) -> Result<Option<Bar>> {
            self.inner.find_earliest_at_or_after(symbol, resolution, time).await
        }

        async fn find_latest_at_or_after(
            &self,
            symbol: &Symbol,
            resolution: Resolution,
            time: i64,
        ) -> Result<Option<Bar>> {
            self.inner.find_latest_at_or_after(symbol, resolution, time).await
        }

        async fn range(
            &self,
            symbol: &Symbol,
            resolution: Resolution,
            start: i64,
            end: i64,
        ) -> Result<Vec<Bar>> {
            self.inner.range(symbol, resolution, start, end).await
        }

        async fn count(&self, symbol: &Symbol, resolution: Resolution) -> Result<usize> {
            self.inner.count(symbol, resolution).await
        }
    }

    #[tokio::test]
    async fn test_upserts_are_grouped_by_flush_size() {
        let source = Arc::new(StubSource::with_history(0, now().timestamp_millis()));
        let store = Arc::new(RecordingStore {
            inner: SqliteBarStore::open_in_memory().unwrap(),
            groups: std::sync::Mutex::new(Vec::new()),
        });
        // Upstream pages of 100 against groups of 64
        let client = Arc::new(UpstreamClient::new(source, Throttle::from_millis(0), 100));
        let backfiller = Backfiller::new(store.clone(), client, 64);

        let report = backfiller
            .backfill_at(&test_symbol(), Period::Day, now())
            .await
            .unwrap();

        assert_eq!(report.bars_stored, 288);
        let groups = store.groups.lock().unwrap().clone();
        assert_eq!(groups, vec![64, 64, 64, 64, 32]);
    }

    #[tokio::test]
    async fn test_resumes_after_latest_stored_bar() {
        let now_ms = now().timestamp_millis();
        let source = Arc::new(StubSource::with_history(0, now_ms));
        let (backfiller, store) = backfiller(source.clone(), 1000);
        let symbol = test_symbol();

        // The first 200 bars of the day are already stored
        let day_start = now_ms - 288 * STEP;
        store
            .upsert_many(StubSource::bars_from(day_start, 200))
            .await
            .unwrap();

        let report = backfiller.backfill_at(&symbol, Period::Day, now()).await.unwrap();

        assert_eq!(report.resumed_from, Some(day_start + 200 * STEP));
        assert_eq!(source.requests()[0].start, day_start + 200 * STEP);
        assert_eq!(report.bars_fetched, 88);
        assert_eq!(report.bars_stored, 88);
    }

    #[tokio::test]
    async fn test_repeat_job_is_idempotent() {
        let source = Arc::new(StubSource::with_history(0, now().timestamp_millis()));
        let (backfiller, store) = backfiller(source, 64);
        let symbol = test_symbol();

        backfiller.backfill_at(&symbol, Period::Day, now()).await.unwrap();
        let again = backfiller.backfill_at(&symbol, Period::Day, now()).await.unwrap();

        // Nothing past the latest bar yet
        assert_eq!(again.bars_fetched, 0);
        assert_eq!(again.bars_stored, 0);
        assert_eq!(store.count(&symbol, Resolution::FiveMinute).await.unwrap(), 288);
    }

    #[tokio::test]
    async fn test_empty_upstream_stores_nothing() {
        let source = Arc::new(StubSource::scripted(vec![Vec::new()]));
        let (backfiller, _) = backfiller(source, 64);

        let report = backfiller
            .backfill_at(&test_symbol(), Period::Week, now())
            .await
            .unwrap();
        assert_eq!(report.bars_stored, 0);
    }
}
