use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::types::ScanJob;

/// In-process job queue feeding the scan worker pool.
///
/// At-least-once, FIFO not guaranteed under concurrent claims. Queued jobs
/// are deduplicated by identity (product key + target market) while they sit
/// in the queue; the identity is released on claim, so a re-enqueue during
/// processing is possible - at-most-one-*attempted* semantics. The idempotent
/// persistence upsert is the correctness backstop against duplicate writes.
///
/// A job that exhausts its retry budget lands on the dead-letter list with
/// its original error preserved; dead letters are never silently dropped and
/// stay readable through `status()`.
pub struct JobQueue {
    pending: Mutex<VecDeque<ScanJob>>,
    pending_ids: DashSet<String>,
    notify: Notify,
    active: AtomicU64,
    completed: AtomicU64,
    dead: Mutex<Vec<DeadLetter>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub job: ScanJob,
    pub error: String,
    pub failed_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub active: u64,
    pub completed: u64,
    pub dead_letter: usize,
    pub queued_jobs: Vec<String>,
    pub dead_letters: Vec<DeadLetter>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            pending_ids: DashSet::new(),
            notify: Notify::new(),
            active: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Offers a job. Returns false without enqueueing when a job with the
    /// same identity is already queued.
    pub async fn enqueue(&self, job: ScanJob) -> bool {
        if !self.pending_ids.insert(job.identity()) {
            return false;
        }
        self.pending.lock().await.push_back(job);
        self.notify.notify_one();
        true
    }

    /// Claims the next job, waiting until one is available. The claimed job
    /// is the worker's responsibility until `complete` or `dead_letter`.
    pub async fn claim(&self) -> ScanJob {
        loop {
            {
                let mut pending = self.pending.lock().await;
                if let Some(job) = pending.pop_front() {
                    self.pending_ids.remove(&job.identity());
                    self.active.fetch_add(1, Ordering::Relaxed);
                    if !pending.is_empty() {
                        // Re-arm: Notify stores at most one permit, and
                        // several enqueues may have landed while we held it.
                        self.notify.notify_one();
                    }
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn complete(&self, _job: &ScanJob) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal failure: the job moves to the dead-letter list with the
    /// original error.
    pub async fn dead_letter(&self, job: ScanJob, error: String) {
        warn!(
            identity = %job.identity(),
            attempt = job.attempt,
            error = %error,
            "job dead-lettered",
        );
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.dead.lock().await.push(DeadLetter {
            job,
            error,
            failed_at: now_secs(),
        });
    }

    pub async fn depth(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead.lock().await.len()
    }

    pub async fn status(&self) -> QueueStatus {
        let pending = self.pending.lock().await;
        let dead = self.dead.lock().await;
        QueueStatus {
            queued: pending.len(),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            dead_letter: dead.len(),
            queued_jobs: pending.iter().map(|j| j.identity()).collect(),
            dead_letters: dead.clone(),
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobMode, MarketCode};

    fn job(key: &str) -> ScanJob {
        ScanJob::new(key, MarketCode::De, None, JobMode::Manual)
    }

    #[tokio::test]
    async fn enqueue_dedups_by_identity() {
        let queue = JobQueue::new();
        assert!(queue.enqueue(job("a")).await);
        assert!(!queue.enqueue(job("a")).await, "same identity must be rejected");
        assert!(queue.enqueue(job("b")).await);
        assert_eq!(queue.depth().await, 2);
    }

    #[tokio::test]
    async fn same_key_different_market_is_a_distinct_job() {
        let queue = JobQueue::new();
        assert!(queue.enqueue(job("a")).await);
        assert!(
            queue
                .enqueue(ScanJob::new("a", MarketCode::Fr, None, JobMode::Manual))
                .await
        );
        assert_eq!(queue.depth().await, 2);
    }

    #[tokio::test]
    async fn claim_releases_identity_for_reenqueue() {
        let queue = JobQueue::new();
        queue.enqueue(job("a")).await;
        let claimed = queue.claim().await;
        assert_eq!(claimed.product_key, "a");
        assert!(queue.enqueue(job("a")).await, "identity released on claim");
    }

    #[tokio::test]
    async fn lifecycle_counters() {
        let queue = JobQueue::new();
        queue.enqueue(job("a")).await;
        queue.enqueue(job("b")).await;

        let a = queue.claim().await;
        queue.complete(&a);

        let b = queue.claim().await;
        queue.dead_letter(b, "provider returned 503".to_string()).await;

        let status = queue.status().await;
        assert_eq!(status.queued, 0);
        assert_eq!(status.active, 0);
        assert_eq!(status.completed, 1);
        assert_eq!(status.dead_letter, 1);
        assert_eq!(status.dead_letters[0].error, "provider returned 503");
    }

    #[tokio::test]
    async fn claim_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.claim().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(job("late")).await;
        let claimed = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("claim should wake")
            .expect("task should not panic");
        assert_eq!(claimed.product_key, "late");
    }
}
