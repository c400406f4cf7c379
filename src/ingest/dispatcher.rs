/// Backfill job consumer
/// Failed jobs are nacked without requeue after a delay
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::backfill::{BackfillReport, Backfiller};
use super::queue::{Delivery, JobEnvelope, JobQueue};
use crate::error::{CacheError, Result};
use crate::types::{Period, SymbolAllowList};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub processed: usize,
    pub acked: usize,
    pub dropped: usize,
    pub bars_stored: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    acked: AtomicUsize,
    dropped: AtomicUsize,
    bars_stored: AtomicUsize,
}

pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    backfiller: Arc<Backfiller>,
    allow_list: SymbolAllowList,
    nack_delay: Duration,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        backfiller: Arc<Backfiller>,
        allow_list: SymbolAllowList,
        nack_delay: Duration,
    ) -> Self {
        Dispatcher {
            queue,
            backfiller,
            allow_list,
            nack_delay,
            counters: Counters::default(),
        }
    }

    /// Decode and run one job
    pub async fn handle(&self, delivery: &Delivery) -> Result<BackfillReport> {
        let envelope = JobEnvelope::decode(&delivery.body)?;
        let symbol = self.allow_list.parse(&envelope.symbol)?;
        let period: Period = envelope.period.parse()?;

        self.backfiller.backfill(&symbol, period).await
    }

    /// Consume deliveries one at a time until the queue is drained and closed
    pub async fn run(&self) -> Result<()> {
        while let Some(delivery) = self.queue.next_delivery().await? {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);

            match self.handle(&delivery).await {
                Ok(report) => {
                    self.queue.ack(&delivery).await?;
                    self.counters.acked.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bars_stored
                        .fetch_add(report.bars_stored, Ordering::Relaxed);
                    info!(
                        tag = %delivery.tag,
                        symbol = %report.symbol,
                        period = %report.period,
                        stored = report.bars_stored,
                        "Job completed"
                    );
                }
                Err(e) => {
                    error!(
                        tag = %delivery.tag,
                        code = e.error_code(),
                        redelivered = delivery.redelivered,
                        "Job failed: {}",
                        e
                    );
                    tokio::time::sleep(self.nack_delay).await;
                    self.queue.nack(&delivery, false).await?;
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        info!("Job queue drained");
        Ok(())
    }

    /// Run `count` consumers side by side until the queue is drained
    pub async fn run_workers(self: Arc<Self>, count: usize) -> Result<DispatchStats> {
        let mut workers = JoinSet::new();
        for _ in 0..count.max(1) {
            let dispatcher = Arc::clone(&self);
            workers.spawn(async move { dispatcher.run().await });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(|e| CacheError::InternalError(format!("worker panicked: {}", e)))?;
            if let Err(e) = outcome {
                warn!("Worker stopped: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.stats()),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            acked: self.counters.acked.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            bars_stored: self.counters.bars_stored.load(Ordering::Relaxed),
        }
    }
}
