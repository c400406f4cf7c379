/// Test double for the upstream API
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{KlineRequest, KlineSource};
use crate::error::{CacheError, Result};
use crate::types::{Bar, Resolution, Symbol, SymbolAllowList};

pub fn test_symbol() -> Symbol {
    SymbolAllowList::new(["BTCUSDT"]).parse("BTCUSDT").unwrap()
}

pub fn bar_at(open_time: i64, price: f64) -> Bar {
    Bar {
        symbol: "BTCUSDT".to_string(),
        resolution: Resolution::FiveMinute,
        open_time,
        open: price,
        high: price + 2.0,
        low: price - 2.0,
        close: price + 1.0,
        volume: 10.0,
    }
}

enum Mode {
    Scripted(Mutex<VecDeque<Vec<Bar>>>),
    History { start: i64, end: i64 },
    Failing,
}

/// Serves either a fixed script of batches or a synthetic 5m history
pub struct StubSource {
    mode: Mode,
    requests: Mutex<Vec<KlineRequest>>,
}

impl StubSource {
    pub fn scripted(batches: Vec<Vec<Bar>>) -> Self {
        Self::with_mode(Mode::Scripted(Mutex::new(batches.into())))
    }

    /// Every aligned 5m bar in `[start, end)` exists upstream
    pub fn with_history(start: i64, end: i64) -> Self {
        Self::with_mode(Mode::History { start, end })
    }

    pub fn failing() -> Self {
        Self::with_mode(Mode::Failing)
    }

    fn with_mode(mode: Mode) -> Self {
        StubSource {
            mode,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn bars_from(start: i64, count: usize) -> Vec<Bar> {
        let step = Resolution::FiveMinute.duration_ms();
        (0..count as i64)
            .map(|i| bar_at(start + i * step, 100.0 + i as f64))
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<KlineRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl KlineSource for StubSource {
    async fn fetch_batch(&self, request: &KlineRequest) -> Result<Vec<Bar>> {
        self.requests.lock().unwrap().push(request.clone());

        match &self.mode {
            Mode::Scripted(batches) => Ok(batches.lock().unwrap().pop_front().unwrap_or_default()),
            Mode::History { start, end } => {
                let step = request.resolution.duration_ms();
                let first = request.start.max(*start);
                let first = first + (step - first.rem_euclid(step)) % step;
                let last = request.end.min(*end);

                Ok((0..)
                    .map(|i| first + i * step)
                    .take_while(|t| *t < last)
                    .take(request.limit)
                    .map(|t| bar_at(t, 100.0 + (t / step % 50) as f64))
                    .collect())
            }
            Mode::Failing => Err(CacheError::UpstreamUnavailable("503 Service Unavailable".to_string())),
        }
    }
}
