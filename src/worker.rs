use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Datelike;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::cache::DedupCache;
use crate::config::{alert_thresholds, RESULT_TTL_SECS};
use crate::db::{NewOpportunity, OpportunityStore, ProductSnapshot};
use crate::error::Result;
use crate::filters::{self, FilterConfig, FilterDecision, FilterReason};
use crate::provider::{CatalogProvider, FetchError};
use crate::queue::JobQueue;
use crate::scoring;
use crate::throttle::RateLimiter;
use crate::types::{record_key, AlertKind, MarketCode, OpportunityStatus, RawProductRecord, ScanJob};

/// Everything a scan worker needs, constructed once at startup and shared by
/// the pool. Dependencies are injected here - no process-wide singletons.
pub struct WorkerContext {
    pub source_market: MarketCode,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<DedupCache>,
    pub limiter: Arc<RateLimiter>,
    pub provider: Arc<dyn CatalogProvider>,
    pub store: OpportunityStore,
    pub filters: FilterConfig,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    /// Fetch attempts per job before dead-lettering.
    pub max_retries: u32,
    /// Backoff unit; the wait before attempt n is `backoff_base * n`.
    pub backoff_base: Duration,
}

/// One worker: claims a job, runs it fetch -> filter -> score -> persist to
/// completion, then claims the next.
pub struct ScanWorker {
    ctx: Arc<WorkerContext>,
    id: usize,
}

/// Terminal result of one job, for logging and counters.
#[derive(Debug)]
enum JobOutcome {
    /// Provider had no record (or a required field was missing): data
    /// absence, nothing persisted.
    Absent { market: MarketCode },
    /// A filter predicate failed. `persisted` is false for data-absence
    /// reasons, true when a `filtered` opportunity row was written.
    Rejected { reason: FilterReason, persisted: bool },
    /// Scored and persisted.
    Scored {
        status: OpportunityStatus,
        score: f64,
        alerts: usize,
    },
}

/// Spawn the bounded worker pool.
pub fn spawn_pool(ctx: Arc<WorkerContext>, concurrency: usize) -> Vec<JoinHandle<()>> {
    (0..concurrency)
        .map(|id| {
            let worker = ScanWorker {
                ctx: Arc::clone(&ctx),
                id,
            };
            tokio::spawn(async move { worker.run().await })
        })
        .collect()
}

impl ScanWorker {
    pub async fn run(self) {
        self.ctx.health.worker_started();
        info!(worker = self.id, "scan worker started");
        loop {
            let job = self.ctx.queue.claim().await;
            self.drive(job).await;
        }
    }

    /// Drives one claimed job to a terminal state: done (success, including
    /// filter rejections) or dead-letter. Transient failures loop through
    /// retry-wait with a backoff linear in the attempt number.
    pub async fn drive(&self, mut job: ScanJob) {
        loop {
            if let Some(at_ms) = job.next_attempt_at {
                let now = now_millis();
                if at_ms > now {
                    tokio::time::sleep(Duration::from_millis(at_ms - now)).await;
                }
            }

            match self.process(&job).await {
                Ok(outcome) => {
                    self.log_outcome(&job, &outcome);
                    self.ctx.queue.complete(&job);
                    self.ctx.health.job_processed(now_secs());
                    return;
                }
                Err(err) => {
                    job.attempt += 1;
                    if job.attempt >= self.ctx.max_retries {
                        self.ctx.health.job_dead_lettered();
                        self.ctx.queue.dead_letter(job, err.to_string()).await;
                        return;
                    }
                    let backoff = self.ctx.backoff_base * job.attempt;
                    warn!(
                        identity = %job.identity(),
                        attempt = job.attempt,
                        error = %err,
                        "transient failure, retrying in {backoff:?}",
                    );
                    job.next_attempt_at = Some(now_millis() + backoff.as_millis() as u64);
                }
            }
        }
    }

    /// One attempt at the full pipeline. `Err` means transient (fetch or
    /// persistence) and counts against the retry budget; every `Ok` is a
    /// successfully processed job, rejections included.
    async fn process(&self, job: &ScanJob) -> Result<JobOutcome> {
        let ctx = &self.ctx;

        // fetching
        let Some(source) = self.fetch_record(&job.product_key, ctx.source_market).await? else {
            return Ok(JobOutcome::Absent {
                market: ctx.source_market,
            });
        };
        let Some(target) = self.fetch_record(&job.product_key, job.target_market).await? else {
            return Ok(JobOutcome::Absent {
                market: job.target_market,
            });
        };

        // filtering - both sides must clear the chain
        for record in [&source, &target] {
            if let FilterDecision::Reject(reason) = filters::evaluate(record, &ctx.filters) {
                if reason.is_data_absence() {
                    return Ok(JobOutcome::Rejected {
                        reason,
                        persisted: false,
                    });
                }
                ctx.store
                    .upsert_opportunity(&self.filtered_record(job, &target, reason))
                    .await?;
                return Ok(JobOutcome::Rejected {
                    reason,
                    persisted: true,
                });
            }
        }

        // scoring - pure computation, no await points
        let profit = scoring::assess_profit(&source, &target);
        let moat = scoring::competition_moat(&target);
        let crash = scoring::price_crash_risk(&target, chrono::Utc::now().month());
        let velocity = scoring::sales_velocity(&target);
        let amazon_share = scoring::amazon_buy_box_share(&target);

        let status = if profit.score.is_finite() && profit.score >= 0.0 {
            OpportunityStatus::Shown
        } else {
            OpportunityStatus::Skipped
        };

        // persisting - idempotent upserts, safe to repeat under retry
        ctx.store
            .upsert_product(&ProductSnapshot {
                product_key: job.product_key.clone(),
                market: job.target_market,
                asin: target.asin.clone(),
                title: target.title.clone(),
                brand: target.brand.clone(),
                source_price: source.buy_box_price,
                buy_box_price: target.buy_box_price,
                sales_rank: target.sales_rank,
                hazmat: target.hazmat,
                variation_hash: target.variation_hash.clone(),
                category: job.category.clone().or_else(|| target.category.clone()),
            })
            .await?;

        ctx.store
            .upsert_opportunity(&NewOpportunity {
                product_key: job.product_key.clone(),
                source_market: ctx.source_market,
                target_market: job.target_market,
                category: job.category.clone().or_else(|| target.category.clone()),
                status,
                filter_reason: None,
                opportunity_score: Some(profit.score),
                fees: Some(profit.fees),
                shipping: Some(profit.shipping),
                risk_multiplier: Some(profit.risk_multiplier),
                moat_score: Some(i64::from(moat.score)),
                moat_level: Some(moat.level.to_string()),
                crash_score: Some(i64::from(crash.score)),
                crash_level: Some(crash.level.to_string()),
                sales_velocity: Some(velocity),
                amazon_buy_box_share: Some(amazon_share),
            })
            .await?;

        // Alert inserts are append-only and not idempotent: a job retried
        // past this point double-inserts. Accepted - alerts are advisory.
        let alerts = build_alerts(profit.score, crash.score, amazon_share);
        for kind in &alerts {
            ctx.store
                .insert_alert(&job.product_key, job.target_market, *kind, Some(profit.score))
                .await?;
        }

        Ok(JobOutcome::Scored {
            status,
            score: profit.score,
            alerts: alerts.len(),
        })
    }

    /// Result-cache-gated provider fetch. A cached record skips the external
    /// call entirely; a fresh fetch is paced by the rate limiter, timed into
    /// the latency histogram, and cached for the result TTL. Terminal
    /// provider errors surface as absence, transient ones propagate.
    async fn fetch_record(
        &self,
        product_key: &str,
        market: MarketCode,
    ) -> Result<Option<RawProductRecord>> {
        let ctx = &self.ctx;
        let cache_key = record_key(product_key, market);
        if let Some(hit) = ctx.cache.get_record(&cache_key) {
            debug!(product_key, %market, "result cache hit, skipping fetch");
            return Ok(Some(hit));
        }

        ctx.limiter.acquire(1).await;
        let started = Instant::now();
        let fetched = ctx.provider.fetch_by_key(product_key, market).await;
        ctx.latency.record(started.elapsed());

        match fetched {
            Ok(Some(record)) => {
                ctx.cache.put_record(
                    &cache_key,
                    record.clone(),
                    Duration::from_secs(RESULT_TTL_SECS),
                );
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(FetchError::Terminal(msg)) => {
                warn!(product_key, %market, "terminal provider response, treating as absent: {msg}");
                Ok(None)
            }
            Err(err @ FetchError::Transient(_)) => Err(err.into()),
        }
    }

    fn filtered_record(
        &self,
        job: &ScanJob,
        target: &RawProductRecord,
        reason: FilterReason,
    ) -> NewOpportunity {
        NewOpportunity {
            product_key: job.product_key.clone(),
            source_market: self.ctx.source_market,
            target_market: job.target_market,
            category: job.category.clone().or_else(|| target.category.clone()),
            status: OpportunityStatus::Filtered,
            filter_reason: Some(reason),
            opportunity_score: None,
            fees: None,
            shipping: None,
            risk_multiplier: None,
            moat_score: None,
            moat_level: None,
            crash_score: None,
            crash_level: None,
            sales_velocity: None,
            amazon_buy_box_share: None,
        }
    }

    fn log_outcome(&self, job: &ScanJob, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Absent { market } => {
                debug!(identity = %job.identity(), %market, "no record in market, job complete");
            }
            JobOutcome::Rejected { reason, persisted } => {
                info!(
                    identity = %job.identity(),
                    %reason,
                    persisted,
                    "filter rejection, job complete",
                );
            }
            JobOutcome::Scored { status, score, alerts } => {
                info!(
                    identity = %job.identity(),
                    %status,
                    score = format_args!("{score:.2}"),
                    alerts,
                    "scan scored and persisted",
                );
            }
        }
    }
}

/// Alert kinds tripped by a scored opportunity.
fn build_alerts(score: f64, crash_score: u32, amazon_share: f64) -> Vec<AlertKind> {
    let mut alerts = Vec::new();
    if score > alert_thresholds::HIGH_PROFIT_SCORE {
        alerts.push(AlertKind::HighProfit);
    }
    if crash_score > alert_thresholds::HIGH_CRASH_SCORE {
        alerts.push(AlertKind::HighCrashRisk);
    }
    if amazon_share > alert_thresholds::AMAZON_DOMINANT_SHARE {
        alerts.push(AlertKind::AmazonBuyBoxDominant);
    }
    alerts
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
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
    use crate::provider::testing::{clean_record, ScriptedProvider};
    use crate::types::JobMode;
    use sqlx::sqlite::SqlitePoolOptions;

    struct Harness {
        worker: ScanWorker,
        queue: Arc<JobQueue>,
        provider: Arc<ScriptedProvider>,
        store: OpportunityStore,
        health: Arc<HealthState>,
    }

    async fn harness() -> Harness {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = OpportunityStore::new(pool);
        store.init_schema().await.expect("schema");

        let queue = Arc::new(JobQueue::new());
        let provider = Arc::new(ScriptedProvider::new());
        let health = Arc::new(HealthState::new());
        let ctx = Arc::new(WorkerContext {
            source_market: MarketCode::Us,
            queue: Arc::clone(&queue),
            cache: Arc::new(DedupCache::new()),
            limiter: Arc::new(RateLimiter::new(Duration::ZERO, 100)),
            provider: Arc::clone(&provider) as Arc<dyn CatalogProvider>,
            store: store.clone(),
            filters: FilterConfig::default(),
            latency: Arc::new(LatencyStats::new()),
            health: Arc::clone(&health),
            max_retries: 3,
            backoff_base: Duration::ZERO,
        });

        Harness {
            worker: ScanWorker { ctx, id: 0 },
            queue,
            provider,
            store,
            health,
        }
    }

    fn job(key: &str) -> ScanJob {
        ScanJob::new(key, MarketCode::De, None, JobMode::Manual)
    }

    /// Enqueue, claim, drive - the queue's counters stay consistent.
    async fn run_job(h: &Harness, j: ScanJob) {
        assert!(h.queue.enqueue(j).await);
        let claimed = h.queue.claim().await;
        h.worker.drive(claimed).await;
    }

    const KEY: &str = "012345678905";

    fn seed_profitable_pair(provider: &ScriptedProvider) {
        let mut source = clean_record(KEY, MarketCode::Us);
        source.buy_box_price = Some(79.99);
        provider.insert_record(source);

        let mut target = clean_record(KEY, MarketCode::De);
        target.buy_box_price = Some(199.99);
        provider.insert_record(target);
    }

    #[tokio::test]
    async fn second_scan_within_cache_ttl_skips_the_fetch() {
        let h = harness().await;
        seed_profitable_pair(&h.provider);

        run_job(&h, job(KEY)).await;
        assert_eq!(h.provider.fetch_calls(), 2, "one fetch per market");

        run_job(&h, job(KEY)).await;
        assert_eq!(h.provider.fetch_calls(), 2, "both records served from cache");
        assert_eq!(h.store.opportunity_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn profitable_pair_is_shown_and_alerted() {
        let h = harness().await;
        seed_profitable_pair(&h.provider);

        run_job(&h, job(KEY)).await;

        let row = h
            .store
            .get_opportunity(KEY, MarketCode::De)
            .await
            .unwrap()
            .expect("opportunity persisted");
        assert_eq!(row.status, "shown");
        assert!(row.filter_reason.is_none());
        let score = row.opportunity_score.expect("score present");
        // 199.99 - 79.99 - (0.15 * 199.99 + 3.50) - (5 + 1.2 * 6.5)
        assert!((score - 73.7015).abs() < 1e-9, "score={score}");
        assert_eq!(row.risk_multiplier, Some(1.0));
        assert_eq!(row.crash_level.as_deref(), Some("low"));

        let alerts = h.store.recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "high_profit");
    }

    #[tokio::test]
    async fn losing_pair_is_persisted_as_skipped() {
        let h = harness().await;
        let mut source = clean_record(KEY, MarketCode::Us);
        source.buy_box_price = Some(79.99);
        h.provider.insert_record(source);
        let mut target = clean_record(KEY, MarketCode::De);
        target.buy_box_price = Some(49.99);
        h.provider.insert_record(target);

        run_job(&h, job(KEY)).await;

        let row = h
            .store
            .get_opportunity(KEY, MarketCode::De)
            .await
            .unwrap()
            .expect("negative scores are persisted, never dropped");
        assert_eq!(row.status, "skipped");
        assert!(row.opportunity_score.unwrap() < 0.0);
        assert_eq!(h.store.alert_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hazmat_rejection_is_persisted_as_filtered() {
        let h = harness().await;
        h.provider.insert_record(clean_record(KEY, MarketCode::Us));
        let mut target = clean_record(KEY, MarketCode::De);
        target.hazmat = true;
        h.provider.insert_record(target);

        run_job(&h, job(KEY)).await;

        let row = h
            .store
            .get_opportunity(KEY, MarketCode::De)
            .await
            .unwrap()
            .expect("filtered opportunity persisted");
        assert_eq!(row.status, "filtered");
        assert_eq!(row.filter_reason.as_deref(), Some("hazmat"));
        assert!(row.opportunity_score.is_none(), "no scoring after rejection");
        assert_eq!(h.store.alert_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_price_completes_without_a_write() {
        let h = harness().await;
        h.provider.insert_record(clean_record(KEY, MarketCode::Us));
        let mut target = clean_record(KEY, MarketCode::De);
        target.buy_box_price = None;
        h.provider.insert_record(target);

        run_job(&h, job(KEY)).await;

        assert_eq!(h.store.opportunity_count().await.unwrap(), 0);
        assert_eq!(h.queue.dead_letter_count().await, 0, "data absence is not a failure");
        assert_eq!(h.health.snapshot().jobs_processed, 1);
    }

    #[tokio::test]
    async fn absent_target_record_completes_without_a_write() {
        let h = harness().await;
        h.provider.insert_record(clean_record(KEY, MarketCode::Us));
        // no DE record scripted

        run_job(&h, job(KEY)).await;

        assert_eq!(h.store.opportunity_count().await.unwrap(), 0);
        assert_eq!(h.health.snapshot().jobs_processed, 1);
    }

    #[tokio::test]
    async fn three_failed_fetches_dead_letter_the_job() {
        let h = harness().await;
        seed_profitable_pair(&h.provider);
        h.provider.fail_next(100);

        run_job(&h, job(KEY)).await;

        assert_eq!(h.provider.fetch_calls(), 3, "retry ceiling bounds the attempts");
        assert_eq!(h.queue.dead_letter_count().await, 1);
        assert_eq!(h.store.opportunity_count().await.unwrap(), 0, "never reached scoring");
        assert_eq!(h.health.snapshot().jobs_dead_lettered, 1);

        let status = h.queue.status().await;
        assert!(status.dead_letters[0].error.contains("scripted timeout"));
    }

    #[tokio::test]
    async fn transient_failure_then_success_retries_through() {
        let h = harness().await;
        seed_profitable_pair(&h.provider);
        h.provider.fail_next(1);

        run_job(&h, job(KEY)).await;

        assert_eq!(h.queue.dead_letter_count().await, 0);
        assert_eq!(h.store.opportunity_count().await.unwrap(), 1);
        // attempt 1 failed on the source fetch; attempt 2 fetched both sides
        assert_eq!(h.provider.fetch_calls(), 3);
    }

    #[test]
    fn alert_thresholds_are_strict() {
        assert!(build_alerts(50.0, 0, 0.0).is_empty());
        assert_eq!(build_alerts(50.01, 0, 0.0), vec![AlertKind::HighProfit]);
        assert!(build_alerts(0.0, 70, 0.0).is_empty());
        assert_eq!(build_alerts(0.0, 71, 0.0), vec![AlertKind::HighCrashRisk]);
        assert!(build_alerts(0.0, 0, 80.0).is_empty());
        assert_eq!(build_alerts(0.0, 0, 80.5), vec![AlertKind::AmazonBuyBoxDominant]);
    }
}
