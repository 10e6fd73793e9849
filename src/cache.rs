use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::RawProductRecord;

/// Best-effort TTL cache backing both dedup gates:
///
/// - intake markers (`seen`/`mark`, long TTL) bound redundant provider spend
///   by suppressing re-enqueue of recently scanned (key, market) pairs;
/// - result entries (`get_record`/`put_record`, short TTL) let a retried job
///   skip the external fetch entirely.
///
/// Caching is a performance optimization, not a correctness dependency: every
/// lookup that cannot produce a live entry is a miss, and the pipeline always
/// proceeds on a miss. Entries expire lazily on read; nothing ever blocks.
pub struct DedupCache {
    entries: DashMap<String, CacheEntry>,
}

enum CacheValue {
    Marker,
    Record(RawProductRecord),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Instant,
}

impl CacheEntry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// True if `key` was marked within its TTL window.
    pub fn seen(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.live() => true,
            Some(_) => {
                drop(self.entries.remove(key));
                false
            }
            None => false,
        }
    }

    pub fn mark(&self, key: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: CacheValue::Marker,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn get_record(&self, key: &str) -> Option<RawProductRecord> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => match &entry.value {
                CacheValue::Record(record) => Some(record.clone()),
                CacheValue::Marker => None,
            },
            Some(_) => {
                drop(self.entries.remove(key));
                None
            }
            None => None,
        }
    }

    pub fn put_record(&self, key: &str, record: RawProductRecord, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: CacheValue::Record(record),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketCode;
    use std::collections::HashMap;

    fn record() -> RawProductRecord {
        RawProductRecord {
            upc: Some("012345678905".to_string()),
            asin: Some("B000TEST01".to_string()),
            market: MarketCode::Us,
            title: Some("Widget".to_string()),
            brand: Some("Acme".to_string()),
            buy_box_price: Some(19.99),
            buy_box_seller_id: None,
            referral_fee_rate: None,
            fulfillment_fee: None,
            package_weight_g: Some(300.0),
            package_volume: None,
            sales_rank: Some(1200),
            hazmat: false,
            variation_hash: None,
            fba_offer_count: Some(2),
            buy_box_winner_count: Some(1),
            buy_box_stats: HashMap::new(),
            price_history: vec![19.99, 18.99],
            rank_history: vec![1500.0, 1200.0],
            category: Some("toys".to_string()),
        }
    }

    #[test]
    fn mark_then_seen_within_ttl() {
        let cache = DedupCache::new();
        assert!(!cache.seen("scanned:u:DE"));
        cache.mark("scanned:u:DE", Duration::from_secs(60));
        assert!(cache.seen("scanned:u:DE"));
    }

    #[test]
    fn expired_marker_is_a_miss() {
        let cache = DedupCache::new();
        cache.mark("k", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.seen("k"));
        assert!(cache.is_empty(), "expired entry should be dropped on read");
    }

    #[test]
    fn record_round_trip() {
        let cache = DedupCache::new();
        assert!(cache.get_record("u:US").is_none());
        cache.put_record("u:US", record(), Duration::from_secs(60));
        let cached = cache.get_record("u:US").unwrap();
        assert_eq!(cached.upc.as_deref(), Some("012345678905"));
        assert_eq!(cached.buy_box_price, Some(19.99));
    }

    #[test]
    fn expired_record_is_a_miss() {
        let cache = DedupCache::new();
        cache.put_record("u:US", record(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_record("u:US").is_none());
    }

    #[test]
    fn marker_key_does_not_answer_record_lookup() {
        let cache = DedupCache::new();
        cache.mark("u:US", Duration::from_secs(60));
        assert!(cache.get_record("u:US").is_none());
    }
}
