use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{MarketCode, RawProductRecord};

/// Fetch failures split along the retry boundary: transient errors count
/// against the job's attempt budget, terminal ones do not recur on retry.
/// A product lookup the provider answers with 4xx/not-found is not an error
/// at all - it surfaces as `Ok(None)` (absent).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("terminal fetch failure: {0}")]
    Terminal(String),
}

/// Options for a category listing fetch.
#[derive(Debug, Clone, Default)]
pub struct CategoryQuery {
    /// Truncate the provider's listing to this many records.
    pub max_results: Option<usize>,
}

/// External catalog data source. Object-safe so workers and tests can share
/// the seam; the production implementation is `HttpCatalogClient`.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch_by_key(
        &self,
        product_key: &str,
        market: MarketCode,
    ) -> Result<Option<RawProductRecord>, FetchError>;

    async fn fetch_category(
        &self,
        category_id: &str,
        market: MarketCode,
        query: &CategoryQuery,
    ) -> Result<Vec<RawProductRecord>, FetchError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Terminal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn get_products(&self, url: &str) -> Result<Option<Vec<Value>>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("provider returned {status}")));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_client_error() {
            return Err(FetchError::Terminal(format!("provider returned {status}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed provider body: {e}")))?;

        Ok(body
            .get("products")
            .and_then(|p| p.as_array())
            .map(|a| a.to_vec()))
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalogClient {
    async fn fetch_by_key(
        &self,
        product_key: &str,
        market: MarketCode,
    ) -> Result<Option<RawProductRecord>, FetchError> {
        let url = format!(
            "{}/product?key={}&domain={}&code={}&stats=90&buybox=1",
            self.base_url,
            self.api_key,
            market.domain_id(),
            product_key,
        );

        let Some(products) = self.get_products(&url).await? else {
            return Ok(None);
        };
        match products.first() {
            Some(item) => Ok(Some(normalize_product(item, market))),
            None => {
                debug!(product_key, %market, "provider returned no record");
                Ok(None)
            }
        }
    }

    async fn fetch_category(
        &self,
        category_id: &str,
        market: MarketCode,
        query: &CategoryQuery,
    ) -> Result<Vec<RawProductRecord>, FetchError> {
        let url = format!(
            "{}/category?key={}&domain={}&category={}&buybox=1",
            self.base_url,
            self.api_key,
            market.domain_id(),
            category_id,
        );

        let Some(products) = self.get_products(&url).await? else {
            warn!(category_id, %market, "category listing not found");
            return Ok(Vec::new());
        };

        let cap = query.max_results.unwrap_or(usize::MAX);
        Ok(products
            .iter()
            .take(cap)
            .map(|item| normalize_product(item, market))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize one provider product object into a `RawProductRecord`.
///
/// Every fallback the record supports is resolved here, once:
/// - buy-box price: `stats.buyBoxPrice` else first `stats.current` slot,
///   both in cents, non-positive values meaning absent;
/// - sales rank: top-level `salesRank` else the first `salesRanks` series;
/// - referral rate: `referralFeePercentage` (percent -> fraction);
/// - fulfillment fee: `fbaFees.pickAndPackFee` (cents);
/// - category: `rootCategory` else the first `categoryTree` name.
pub fn normalize_product(v: &Value, market: MarketCode) -> RawProductRecord {
    let stats = v.get("stats");

    let buy_box_price = stats
        .and_then(|s| s.get("buyBoxPrice"))
        .and_then(cents_value)
        .or_else(|| {
            stats
                .and_then(|s| s.get("current"))
                .and_then(|c| c.as_array())
                .and_then(|a| a.first())
                .and_then(cents_value)
        });

    let sales_rank = v
        .get("salesRank")
        .and_then(|r| r.as_i64())
        .or_else(|| first_sales_rank(v.get("salesRanks")));

    let buy_box_stats: HashMap<String, f64> = stats
        .and_then(|s| s.get("buyBoxStats"))
        .and_then(|s| s.as_object())
        .map(|sellers| {
            sellers
                .iter()
                .filter_map(|(seller, entry)| {
                    entry
                        .get("percentage")
                        .and_then(|p| p.as_f64())
                        .map(|p| (seller.clone(), p))
                })
                .collect()
        })
        .unwrap_or_default();

    let category = v
        .get("rootCategory")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            v.get("categoryTree")
                .and_then(|t| t.as_array())
                .and_then(|a| a.first())
                .and_then(|n| n.get("name"))
                .and_then(|n| n.as_str())
                .map(|s| s.to_string())
        });

    RawProductRecord {
        upc: string_field(v, "upc"),
        asin: string_field(v, "asin"),
        market,
        title: string_field(v, "title"),
        brand: string_field(v, "brand"),
        buy_box_price,
        buy_box_seller_id: stats
            .and_then(|s| s.get("buyBoxSellerId"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        referral_fee_rate: v
            .get("referralFeePercentage")
            .and_then(|p| p.as_f64())
            .map(|p| p / 100.0),
        fulfillment_fee: v
            .get("fbaFees")
            .and_then(|f| f.get("pickAndPackFee"))
            .and_then(cents_value),
        package_weight_g: v.get("packageWeight").and_then(|w| w.as_f64()),
        package_volume: v.get("packageVolume").and_then(|w| w.as_f64()),
        sales_rank,
        hazmat: v.get("hazmat").and_then(|h| h.as_bool()).unwrap_or(false),
        variation_hash: string_field(v, "variationHash"),
        fba_offer_count: stats.and_then(|s| s.get("offerCountFBA")).and_then(|c| c.as_i64()),
        buy_box_winner_count: v.get("buyBoxWinnerCount").and_then(|c| c.as_i64()),
        buy_box_stats,
        price_history: cents_series(v.get("csv").and_then(|c| c.get(0))),
        rank_history: number_series(v.get("csv").and_then(|c| c.get(3))),
        category,
    }
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string())
}

/// Monetary provider values are integer cents; non-positive means absent.
fn cents_value(v: &Value) -> Option<f64> {
    v.as_f64().filter(|&c| c > 0.0).map(|c| c / 100.0)
}

/// `salesRanks` maps category id -> rank series; the first series' first
/// entry is the current rank.
fn first_sales_rank(ranks: Option<&Value>) -> Option<i64> {
    ranks?
        .as_object()?
        .values()
        .next()?
        .as_array()?
        .first()?
        .as_i64()
}

fn cents_series(v: Option<&Value>) -> Vec<f64> {
    number_series(v).into_iter().map(|c| c / 100.0).collect()
}

fn number_series(v: Option<&Value>) -> Vec<f64> {
    v.and_then(|s| s.as_array())
        .map(|a| a.iter().filter_map(|n| n.as_f64()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for worker and producer tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    pub(crate) struct ScriptedProvider {
        records: Mutex<HashMap<(String, MarketCode), RawProductRecord>>,
        categories: Mutex<HashMap<String, Vec<RawProductRecord>>>,
        fetch_calls: AtomicUsize,
        fail_remaining: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                categories: Mutex::new(HashMap::new()),
                fetch_calls: AtomicUsize::new(0),
                fail_remaining: AtomicUsize::new(0),
            }
        }

        pub(crate) fn insert_record(&self, record: RawProductRecord) {
            let key = record
                .product_key()
                .expect("scripted record needs a key")
                .to_string();
            self.records
                .lock()
                .unwrap()
                .insert((key, record.market), record);
        }

        pub(crate) fn insert_category(&self, category_id: &str, records: Vec<RawProductRecord>) {
            self.categories
                .lock()
                .unwrap()
                .insert(category_id.to_string(), records);
        }

        /// Make the next `n` product fetches fail with a transient error.
        pub(crate) fn fail_next(&self, n: usize) {
            self.fail_remaining.store(n, Ordering::SeqCst);
        }

        pub(crate) fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogProvider for ScriptedProvider {
        async fn fetch_by_key(
            &self,
            product_key: &str,
            market: MarketCode,
        ) -> Result<Option<RawProductRecord>, FetchError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FetchError::Transient("scripted timeout".to_string()));
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(product_key.to_string(), market))
                .cloned())
        }

        async fn fetch_category(
            &self,
            category_id: &str,
            _market: MarketCode,
            query: &CategoryQuery,
        ) -> Result<Vec<RawProductRecord>, FetchError> {
            let cap = query.max_results.unwrap_or(usize::MAX);
            Ok(self
                .categories
                .lock()
                .unwrap()
                .get(category_id)
                .map(|r| r.iter().take(cap).cloned().collect())
                .unwrap_or_default())
        }
    }

    /// A clean record that passes the default filter chain.
    pub(crate) fn clean_record(key: &str, market: MarketCode) -> RawProductRecord {
        RawProductRecord {
            upc: Some(key.to_string()),
            asin: Some(format!("B{key:0>9.9}")),
            market,
            title: Some("Widget".to_string()),
            brand: Some("Acme".to_string()),
            buy_box_price: Some(49.99),
            buy_box_seller_id: Some("A2THIRDPARTY".to_string()),
            referral_fee_rate: None,
            fulfillment_fee: None,
            package_weight_g: Some(1200.0),
            package_volume: None,
            sales_rank: Some(1500),
            hazmat: false,
            variation_hash: Some("vh1".to_string()),
            fba_offer_count: Some(2),
            buy_box_winner_count: Some(1),
            buy_box_stats: HashMap::new(),
            price_history: vec![52.99, 49.99],
            rank_history: vec![1600.0, 1500.0],
            category: Some("toys".to_string()),
        }
    }
}
