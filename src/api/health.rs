//! Shared health state for the /health endpoint.
//! Updated by the scan workers, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    /// Workers currently running their claim loop.
    pub active_workers: AtomicU64,
    /// Jobs that reached a terminal success (including filter rejections).
    pub jobs_processed: AtomicU64,
    /// Jobs moved to the dead-letter list.
    pub jobs_dead_lettered: AtomicU64,
    /// Unix seconds of the last completed scan (0 = none yet).
    pub last_scan_at: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub active_workers: u64,
    pub jobs_processed: u64,
    pub jobs_dead_lettered: u64,
    pub last_scan_at: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_processed(&self, now_secs: u64) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.last_scan_at.store(now_secs, Ordering::Relaxed);
    }

    pub fn job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_workers: self.active_workers.load(Ordering::Relaxed),
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            last_scan_at: self.last_scan_at.load(Ordering::Relaxed),
        }
    }
}
