use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Paces calls toward the catalog provider: a fixed minimum spacing between
/// consecutive call batches and a hard ceiling on items per batch.
///
/// `acquire` serializes callers on an internal mutex, so under contention the
/// spacing holds across all workers, not per worker. The wait is
/// `min_interval - elapsed_since_last_batch`, clamped at zero - deterministic
/// and bounded, never probabilistic.
pub struct RateLimiter {
    min_interval: Duration,
    max_batch: usize,
    last_batch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, max_batch: usize) -> Self {
        Self {
            min_interval,
            max_batch: max_batch.max(1),
            last_batch: Mutex::new(None),
        }
    }

    /// Items the provider accepts per call batch. Callers chunk by this.
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Blocks until it is safe to issue a batch of `batch_size` external
    /// calls, then stamps the batch time. Returns the granted batch size
    /// (clamped to the provider ceiling).
    pub async fn acquire(&self, batch_size: usize) -> usize {
        let granted = batch_size.clamp(1, self.max_batch);

        let mut last = self.last_batch.lock().await;
        if let Some(prev) = *last {
            let wait = delay_after(prev.elapsed(), self.min_interval);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
        granted
    }
}

/// Remaining wait given how long ago the previous batch went out.
fn delay_after(elapsed: Duration, min_interval: Duration) -> Duration {
    min_interval.saturating_sub(elapsed)
}
