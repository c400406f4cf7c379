/// Job queue boundary for backfill work
/// At-least-once delivery with explicit ack/nack, one in-flight job per consumer
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::types::{Period, SymbolAllowList};

/// Persisted job body: `{"symbol": "...", "period": "day|week|month"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub symbol: String,
    pub period: String,
}

impl JobEnvelope {
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| CacheError::JobDecode(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A message handed to a consumer; must be acked or nacked
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: Uuid,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, body: Vec<u8>) -> Result<()>;

    /// Next delivery, or `None` once the queue is closed and drained
    async fn next_delivery(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Reject a delivery; `requeue = false` drops it for good
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;
}

/// In-process queue over a tokio channel
pub struct ChannelJobQueue {
    tx: RwLock<Option<mpsc::UnboundedSender<Delivery>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    in_flight: Mutex<HashMap<Uuid, Delivery>>,
    acked: AtomicUsize,
    dropped: AtomicUsize,
}

impl ChannelJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        ChannelJobQueue {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
            in_flight: Mutex::new(HashMap::new()),
            acked: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Stop accepting publishes; consumers drain what is queued
    pub async fn close(&self) {
        self.tx.write().await.take();
        debug!("Job queue closed");
    }

    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn send(&self, delivery: Delivery) -> Result<()> {
        let tx = self.tx.read().await;
        let tx = tx.as_ref().ok_or(CacheError::QueueClosed)?;
        tx.send(delivery).map_err(|_| CacheError::QueueClosed)
    }
}

impl Default for ChannelJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn publish(&self, body: Vec<u8>) -> Result<()> {
        self.send(Delivery {
            tag: Uuid::new_v4(),
            body,
            redelivered: false,
        })
        .await
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>> {
        let delivery = {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        if let Some(delivery) = &delivery {
            self.in_flight
                .lock()
                .await
                .insert(delivery.tag, delivery.clone());
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.in_flight
            .lock()
            .await
            .remove(&delivery.tag)
            .ok_or_else(|| CacheError::InternalError(format!("unknown delivery {}", delivery.tag)))?;
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let delivery = self
            .in_flight
            .lock()
            .await
            .remove(&delivery.tag)
            .ok_or_else(|| CacheError::InternalError(format!("unknown delivery {}", delivery.tag)))?;

        if requeue {
            return self
                .send(Delivery {
                    redelivered: true,
                    ..delivery
                })
                .await;
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(tag = %delivery.tag, "Delivery dropped without requeue");
        Ok(())
    }
}

/// Request to backfill several symbols over one period
#[derive(Debug, Clone, Deserialize)]
pub struct LoadRequest {
    pub symbols: Vec<String>,
    pub period: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReceipt {
    pub status: String,
    pub symbols: Vec<String>,
    pub period: Period,
}

impl LoadRequest {
    /// Validate and publish one job per symbol
    pub async fn enqueue(&self, allow_list: &SymbolAllowList, queue: &dyn JobQueue) -> Result<LoadReceipt> {
        if self.symbols.is_empty() {
            return Err(CacheError::InvalidParameter("symbols empty".to_string()));
        }
        let period: Period = self.period.parse()?;

        let symbols = self
            .symbols
            .iter()
            .map(|raw| allow_list.parse(raw))
            .collect::<Result<Vec<_>>>()?;

        for symbol in &symbols {
            let envelope = JobEnvelope {
                symbol: symbol.to_string(),
                period: period.as_str().to_string(),
            };
            queue.publish(envelope.encode()?).await?;
        }

        info!(count = symbols.len(), %period, "Queued backfill jobs");
        Ok(LoadReceipt {
            status: "queued".to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            period,
        })
    }
}
