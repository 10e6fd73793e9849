use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::DedupCache;
use crate::config::SCANNED_TTL_SECS;
use crate::filters::{self, FilterConfig, FilterDecision};
use crate::provider::{CatalogProvider, CategoryQuery, FetchError};
use crate::queue::JobQueue;
use crate::throttle::RateLimiter;
use crate::types::{scanned_key, JobMode, MarketCode, ScanJob};

/// Job intake: accepts manual UPC scans and category sweeps, consults the
/// dedup gate before enqueueing, and pre-filters sweep listings so doomed
/// jobs never reach the queue.
pub struct Producer {
    source_market: MarketCode,
    default_target: MarketCode,
    queue: Arc<JobQueue>,
    cache: Arc<DedupCache>,
    provider: Arc<dyn CatalogProvider>,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepSummary {
    pub fetched: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub queued: usize,
}

impl Producer {
    pub fn new(
        source_market: MarketCode,
        default_target: MarketCode,
        queue: Arc<JobQueue>,
        cache: Arc<DedupCache>,
        provider: Arc<dyn CatalogProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            source_market,
            default_target,
            queue,
            cache,
            provider,
            limiter,
        }
    }

    pub fn default_target(&self) -> MarketCode {
        self.default_target
    }

    /// Enqueue a single manual scan. Returns false when the pair was already
    /// scanned within the dedup window or is already queued.
    pub async fn enqueue_manual(
        &self,
        product_key: &str,
        target_market: MarketCode,
        category: Option<String>,
    ) -> bool {
        let intake_key = scanned_key(product_key, target_market);
        if self.cache.seen(&intake_key) {
            debug!(product_key, %target_market, "intake dedup hit, not enqueueing");
            return false;
        }

        let job = ScanJob::new(product_key, target_market, category, JobMode::Manual);
        let queued = self.queue.enqueue(job).await;
        if queued {
            self.cache
                .mark(&intake_key, Duration::from_secs(SCANNED_TTL_SECS));
        }
        queued
    }

    /// Fetch a category listing from the source market, pre-filter it, and
    /// enqueue a sweep job per surviving record. Listings are walked in
    /// provider-batch-sized chunks with the rate limiter pacing each chunk,
    /// since every queued job turns into provider fetches shortly after.
    pub async fn sweep_category(
        &self,
        category_id: &str,
        target_market: MarketCode,
        filter_overrides: &FilterConfig,
        max_results: Option<usize>,
    ) -> Result<SweepSummary, FetchError> {
        self.limiter.acquire(1).await;
        let records = self
            .provider
            .fetch_category(
                category_id,
                self.source_market,
                &CategoryQuery { max_results },
            )
            .await?;

        let mut summary = SweepSummary {
            fetched: records.len(),
            ..SweepSummary::default()
        };

        for chunk in records.chunks(self.limiter.max_batch()) {
            self.limiter.acquire(chunk.len()).await;

            for record in chunk {
                if let FilterDecision::Reject(reason) = filters::evaluate(record, filter_overrides)
                {
                    debug!(%reason, "sweep pre-filter rejected record");
                    summary.rejected += 1;
                    continue;
                }
                // Pre-filter guarantees an identifier is present.
                let Some(key) = record.product_key() else {
                    summary.rejected += 1;
                    continue;
                };

                let intake_key = scanned_key(key, target_market);
                if self.cache.seen(&intake_key) {
                    summary.duplicates += 1;
                    continue;
                }

                let job = ScanJob::new(
                    key,
                    target_market,
                    Some(category_id.to_string()),
                    JobMode::CategorySweep,
                );
                if self.queue.enqueue(job).await {
                    self.cache
                        .mark(&intake_key, Duration::from_secs(SCANNED_TTL_SECS));
                    summary.queued += 1;
                } else {
                    summary.duplicates += 1;
                }
            }
        }

        info!(
            category_id,
            %target_market,
            fetched = summary.fetched,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            queued = summary.queued,
            "category sweep enqueued",
        );
        Ok(summary)
    }
}
