use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::filters::FilterReason;
use crate::types::{AlertKind, MarketCode, OpportunityStatus};

use super::models::{AlertRow, OpportunityRow, ProductRow};

/// Document store over SQLite: `products` and `opportunities` are upserted
/// by their unique keys (safe to repeat under retry), `alerts` is
/// append-only. A `last_seen` column is maintained for store-side expiry.
#[derive(Clone)]
pub struct OpportunityStore {
    pool: SqlitePool,
}

/// Product snapshot persisted per scan, keyed `(product_key, market)`.
#[derive(Debug, Clone)]
pub struct ProductSnapshot {
    pub product_key: String,
    pub market: MarketCode,
    pub asin: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub source_price: Option<f64>,
    pub buy_box_price: Option<f64>,
    pub sales_rank: Option<i64>,
    pub hazmat: bool,
    pub variation_hash: Option<String>,
    pub category: Option<String>,
}

/// Opportunity upsert payload, keyed `(product_key, target_market)`. Score
/// fields are absent for `filtered` records (no scoring ran).
#[derive(Debug, Clone)]
pub struct NewOpportunity {
    pub product_key: String,
    pub source_market: MarketCode,
    pub target_market: MarketCode,
    pub category: Option<String>,
    pub status: OpportunityStatus,
    pub filter_reason: Option<FilterReason>,
    pub opportunity_score: Option<f64>,
    pub fees: Option<f64>,
    pub shipping: Option<f64>,
    pub risk_multiplier: Option<f64>,
    pub moat_score: Option<i64>,
    pub moat_level: Option<String>,
    pub crash_score: Option<i64>,
    pub crash_level: Option<String>,
    pub sales_velocity: Option<f64>,
    pub amazon_buy_box_share: Option<f64>,
}

impl OpportunityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and prepare the schema.
    pub async fn open(db_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite:{db_path}?mode=rwc"))
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                product_key    TEXT NOT NULL,
                market         TEXT NOT NULL,
                asin           TEXT,
                title          TEXT,
                brand          TEXT,
                source_price   REAL,
                buy_box_price  REAL,
                sales_rank     INTEGER,
                hazmat         INTEGER NOT NULL DEFAULT 0,
                variation_hash TEXT,
                category       TEXT,
                last_seen      INTEGER NOT NULL,
                scanned_at     INTEGER NOT NULL,
                PRIMARY KEY (product_key, market)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                product_key          TEXT NOT NULL,
                source_market        TEXT NOT NULL,
                target_market        TEXT NOT NULL,
                category             TEXT,
                status               TEXT NOT NULL,
                filter_reason        TEXT,
                opportunity_score    REAL,
                fees                 REAL,
                shipping             REAL,
                risk_multiplier      REAL,
                moat_score           INTEGER,
                moat_level           TEXT,
                crash_score          INTEGER,
                crash_level          TEXT,
                sales_velocity       REAL,
                amazon_buy_box_share REAL,
                last_analyzed        INTEGER NOT NULL,
                PRIMARY KEY (product_key, target_market)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                product_key       TEXT NOT NULL,
                target_market     TEXT NOT NULL,
                kind              TEXT NOT NULL,
                opportunity_score REAL,
                created_at        INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_product(&self, snap: &ProductSnapshot) -> Result<()> {
        let now = now_secs();
        sqlx::query(
            r#"
            INSERT INTO products (
                product_key, market, asin, title, brand, source_price,
                buy_box_price, sales_rank, hazmat, variation_hash, category,
                last_seen, scanned_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(product_key, market) DO UPDATE SET
                asin = excluded.asin,
                title = excluded.title,
                brand = excluded.brand,
                source_price = excluded.source_price,
                buy_box_price = excluded.buy_box_price,
                sales_rank = excluded.sales_rank,
                hazmat = excluded.hazmat,
                variation_hash = excluded.variation_hash,
                category = excluded.category,
                last_seen = excluded.last_seen,
                scanned_at = excluded.scanned_at
            "#,
        )
        .bind(&snap.product_key)
        .bind(snap.market.to_string())
        .bind(&snap.asin)
        .bind(&snap.title)
        .bind(&snap.brand)
        .bind(snap.source_price)
        .bind(snap.buy_box_price)
        .bind(snap.sales_rank)
        .bind(i64::from(snap.hazmat))
        .bind(&snap.variation_hash)
        .bind(&snap.category)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_opportunity(&self, rec: &NewOpportunity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (
                product_key, source_market, target_market, category, status,
                filter_reason, opportunity_score, fees, shipping,
                risk_multiplier, moat_score, moat_level, crash_score,
                crash_level, sales_velocity, amazon_buy_box_share, last_analyzed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(product_key, target_market) DO UPDATE SET
                source_market = excluded.source_market,
                category = excluded.category,
                status = excluded.status,
                filter_reason = excluded.filter_reason,
                opportunity_score = excluded.opportunity_score,
                fees = excluded.fees,
                shipping = excluded.shipping,
                risk_multiplier = excluded.risk_multiplier,
                moat_score = excluded.moat_score,
                moat_level = excluded.moat_level,
                crash_score = excluded.crash_score,
                crash_level = excluded.crash_level,
                sales_velocity = excluded.sales_velocity,
                amazon_buy_box_share = excluded.amazon_buy_box_share,
                last_analyzed = excluded.last_analyzed
            "#,
        )
        .bind(&rec.product_key)
        .bind(rec.source_market.to_string())
        .bind(rec.target_market.to_string())
        .bind(&rec.category)
        .bind(rec.status.to_string())
        .bind(rec.filter_reason.map(|r| r.to_string()))
        .bind(rec.opportunity_score)
        .bind(rec.fees)
        .bind(rec.shipping)
        .bind(rec.risk_multiplier)
        .bind(rec.moat_score)
        .bind(&rec.moat_level)
        .bind(rec.crash_score)
        .bind(&rec.crash_level)
        .bind(rec.sales_velocity)
        .bind(rec.amazon_buy_box_share)
        .bind(now_secs())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append-only by design: every scan that trips a threshold produces a
    /// fresh row, even for the same product.
    pub async fn insert_alert(
        &self,
        product_key: &str,
        target_market: MarketCode,
        kind: AlertKind,
        opportunity_score: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (product_key, target_market, kind, opportunity_score, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(product_key)
        .bind(target_market.to_string())
        .bind(kind.to_string())
        .bind(opportunity_score)
        .bind(now_secs())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_opportunity(
        &self,
        product_key: &str,
        target_market: MarketCode,
    ) -> Result<Option<OpportunityRow>> {
        let row = sqlx::query_as::<_, OpportunityRow>(
            "SELECT * FROM opportunities WHERE product_key = ? AND target_market = ?",
        )
        .bind(product_key)
        .bind(target_market.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn recent_opportunities(
        &self,
        status: Option<&str>,
        min_score: Option<f64>,
        limit: i64,
    ) -> Result<Vec<OpportunityRow>> {
        let rows = sqlx::query_as::<_, OpportunityRow>(
            r#"
            SELECT * FROM opportunities
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR opportunity_score >= ?2)
            ORDER BY opportunity_score DESC
            LIMIT ?3
            "#,
        )
        .bind(status)
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn recent_products(&self, limit: i64) -> Result<Vec<ProductRow>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertRow>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn opportunity_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM opportunities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn alert_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single-connection pool: each new `sqlite::memory:` connection is a
    /// fresh empty database, so the schema must stay on one connection.
    async fn memory_store() -> OpportunityStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = OpportunityStore::new(pool);
        store.init_schema().await.expect("schema");
        store
    }

    fn shown_opportunity() -> NewOpportunity {
        NewOpportunity {
            product_key: "012345678905".to_string(),
            source_market: MarketCode::Us,
            target_market: MarketCode::De,
            category: Some("toys".to_string()),
            status: OpportunityStatus::Shown,
            filter_reason: None,
            opportunity_score: Some(17.70),
            fees: Some(19.50),
            shipping: Some(12.8),
            risk_multiplier: Some(1.0),
            moat_score: Some(80),
            moat_level: Some("strong_moat".to_string()),
            crash_score: Some(8),
            crash_level: Some("low".to_string()),
            sales_velocity: Some(1.0),
            amazon_buy_box_share: Some(0.0),
        }
    }

    #[tokio::test]
    async fn opportunity_upsert_is_idempotent() {
        let store = memory_store().await;
        let rec = shown_opportunity();

        store.upsert_opportunity(&rec).await.unwrap();
        store.upsert_opportunity(&rec).await.unwrap();

        assert_eq!(store.opportunity_count().await.unwrap(), 1);
        let row = store
            .get_opportunity("012345678905", MarketCode::De)
            .await
            .unwrap()
            .expect("row present");
        assert_eq!(row.status, "shown");
        assert_eq!(row.opportunity_score, Some(17.70));
        assert_eq!(row.moat_level.as_deref(), Some("strong_moat"));
    }

    #[tokio::test]
    async fn rescan_replaces_the_prior_record() {
        let store = memory_store().await;
        let mut rec = shown_opportunity();
        store.upsert_opportunity(&rec).await.unwrap();

        rec.status = OpportunityStatus::Skipped;
        rec.opportunity_score = Some(-4.25);
        store.upsert_opportunity(&rec).await.unwrap();

        assert_eq!(store.opportunity_count().await.unwrap(), 1);
        let row = store
            .get_opportunity("012345678905", MarketCode::De)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "skipped");
        assert_eq!(row.opportunity_score, Some(-4.25));
    }

    #[tokio::test]
    async fn same_key_different_market_is_a_separate_record() {
        let store = memory_store().await;
        let mut rec = shown_opportunity();
        store.upsert_opportunity(&rec).await.unwrap();
        rec.target_market = MarketCode::Fr;
        store.upsert_opportunity(&rec).await.unwrap();
        assert_eq!(store.opportunity_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn alerts_are_append_only() {
        let store = memory_store().await;
        for _ in 0..2 {
            store
                .insert_alert("012345678905", MarketCode::De, AlertKind::HighProfit, Some(62.0))
                .await
                .unwrap();
        }
        assert_eq!(store.alert_count().await.unwrap(), 2);

        let alerts = store.recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.kind == "high_profit"));
    }

    #[tokio::test]
    async fn recent_opportunities_filters_and_sorts() {
        let store = memory_store().await;
        let mut rec = shown_opportunity();
        store.upsert_opportunity(&rec).await.unwrap();

        rec.product_key = "999999999999".to_string();
        rec.status = OpportunityStatus::Skipped;
        rec.opportunity_score = Some(-2.0);
        store.upsert_opportunity(&rec).await.unwrap();

        let shown = store
            .recent_opportunities(Some("shown"), None, 10)
            .await
            .unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].product_key, "012345678905");

        let profitable = store
            .recent_opportunities(None, Some(0.0), 10)
            .await
            .unwrap();
        assert_eq!(profitable.len(), 1);

        let all = store.recent_opportunities(None, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].opportunity_score >= all[1].opportunity_score);
    }

    #[tokio::test]
    async fn product_upsert_is_idempotent() {
        let store = memory_store().await;
        let snap = ProductSnapshot {
            product_key: "012345678905".to_string(),
            market: MarketCode::De,
            asin: Some("B000TEST01".to_string()),
            title: Some("Widget".to_string()),
            brand: Some("Acme".to_string()),
            source_price: Some(79.99),
            buy_box_price: Some(129.99),
            sales_rank: Some(1500),
            hazmat: false,
            variation_hash: None,
            category: Some("toys".to_string()),
        };
        store.upsert_product(&snap).await.unwrap();
        store.upsert_product(&snap).await.unwrap();

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
