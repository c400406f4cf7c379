/// Fixed-interval throttle for upstream calls
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between consecutive calls
pub struct Throttle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Throttle {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Wait until `min_interval` has passed since the previous call, then claim the slot
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;

        if let Some(prev) = *last_call {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last_call = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttle_spaces_calls() {
        let throttle = Throttle::from_millis(50);

        // First call goes straight through
        let start = std::time::Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));

        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_throttle_does_not_wait_after_idle() {
        let throttle = Throttle::from_millis(20);
        throttle.acquire().await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let start = std::time::Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
