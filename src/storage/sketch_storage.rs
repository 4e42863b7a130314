//! `SketchStorage`: load-modify-store over a [`KvStore`], with per-key
//! serialization so concurrent updates to the same sketch don't race.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error};

use crate::error::{EngineError, Result};
use crate::frequency::{CountMinSketch, TopK};
use crate::membership::BloomFilter;
use crate::moments::Moments;
use crate::window::{event_stream_key, SketchKind, TimeWindow};

use super::kv::{EventPayload, KvStore};

/// Running counters for a pub/sub subscription, surfaced to callers so they
/// can detect gaps in an SSE (or equivalent) fan-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionStats {
    /// Number of messages dropped because this subscriber fell behind the
    /// channel's bounded capacity.
    pub dropped: u64,
}

/// A keyed-mutex stripe map: `hash(key) % stripes` selects which lock
/// serializes updates to that key, bounding lock count independent of the
/// number of distinct sketch keys.
struct StripeLocks {
    locks: Vec<Mutex<()>>,
}

impl StripeLocks {
    fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        StripeLocks { locks: (0..stripes).map(|_| Mutex::new(())).collect() }
    }

    fn stripe_for(&self, key: &str) -> &Mutex<()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.locks.len();
        &self.locks[index]
    }
}

/// Load-modify-store access to the custom (non-native) sketch types, plus
/// native HLL passthrough and event pub/sub, all layered over a [`KvStore`].
pub struct SketchStorage<K: KvStore> {
    kv: Arc<K>,
    stripes: StripeLocks,
}

impl<K: KvStore> SketchStorage<K> {
    /// Wraps `kv`, serializing load-modify-store updates across `stripes` lock stripes.
    pub fn new(kv: Arc<K>, stripes: usize) -> Self {
        SketchStorage { kv, stripes: StripeLocks::new(stripes) }
    }

    async fn with_stripe_lock<F, Fut, T>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let lock = self.stripes.stripe_for(key);
        let _guard = lock.lock().await;
        f().await
    }

    // -- Native HyperLogLog -------------------------------------------------

    /// Adds `value` to the native HLL at `key` for each of `windows`,
    /// resetting each key's TTL.
    pub async fn add_hll(
        &self,
        metric: &str,
        system: &str,
        value: &[u8],
        ts: DateTime<Utc>,
        windows: &[TimeWindow],
    ) -> Result<()> {
        for &window in windows {
            let key = crate::window::sketch_key(SketchKind::Hll, metric, system, window, ts);
            self.kv.pfadd(&key, value).await?;
            self.kv.expire(&key, window.retention().num_seconds() as u64).await?;
        }
        Ok(())
    }

    /// Native HLL cardinality at `(metric, system, window, ts)`.
    pub async fn hll_cardinality(&self, metric: &str, system: &str, window: TimeWindow, ts: DateTime<Utc>) -> Result<u64> {
        let key = crate::window::sketch_key(SketchKind::Hll, metric, system, window, ts);
        self.kv.pfcount(&key).await
    }

    /// Native-merges `src_keys` into `dest_key`, returning the resulting
    /// cardinality. Never a portable sketch: the store's native register
    /// representation is opaque, so fabricating a [`crate::cardinality::HyperLogLog`]
    /// from it would silently produce an empty sketch.
    pub async fn merge_hll_native(&self, src_keys: &[String], dest_key: &str) -> Result<u64> {
        self.kv.pfmerge(dest_key, src_keys).await
    }

    // -- Bloom filter --------------------------------------------------------

    /// Loads the Bloom filter at `key` (or a fresh one sized `(capacity,
    /// error_rate)` if absent), inserts `item`, and stores it back, all
    /// serialized via the per-key stripe lock.
    pub async fn add_bloom(
        &self,
        key: &str,
        item: &[u8],
        ttl_seconds: u64,
        capacity: u64,
        error_rate: f64,
    ) -> Result<()> {
        self.with_stripe_lock(key, move || async move {
            let mut filter = match self.kv.get(key).await? {
                Some(bytes) => BloomFilter::from_bytes(&bytes)?,
                None => BloomFilter::new(capacity, error_rate)?,
            };
            filter.insert(item);
            self.kv.setex(key, ttl_seconds, filter.to_bytes()).await
        })
        .await
    }

    /// `true` if `item` may be a member of the Bloom filter at `key`. A
    /// missing key is treated as an empty filter (never a member).
    pub async fn check_bloom(&self, key: &str, item: &[u8]) -> Result<bool> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(BloomFilter::from_bytes(&bytes)?.contains(item)),
            None => Ok(false),
        }
    }

    // -- Top-K -----------------------------------------------------------

    /// Loads the Top-K tracker at `key` (or a fresh one of capacity `k` if
    /// absent), adds `item`, and stores it back.
    pub async fn add_topk(&self, key: &str, item: &str, count: u64, ttl_seconds: u64, k: usize) -> Result<()> {
        self.with_stripe_lock(key, move || async move {
            let mut tracker = match self.kv.get(key).await? {
                Some(bytes) => TopK::from_bytes(&bytes)?,
                None => TopK::new(k),
            };
            tracker.add(item, count);
            self.kv.setex(key, ttl_seconds, tracker.to_bytes()).await
        })
        .await
    }

    /// The top `limit` tracked items at `key`, descending by count. A
    /// missing key returns an empty list.
    pub async fn get_topk(&self, key: &str, limit: usize) -> Result<Vec<crate::frequency::TopKEntry>> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(TopK::from_bytes(&bytes)?.top_k(limit)),
            None => Ok(Vec::new()),
        }
    }

    // -- Moments -----------------------------------------------------------

    /// Loads the moments accumulator at `key` (or an empty one if absent),
    /// folds `value` in, and stores it back.
    pub async fn add_moments(&self, key: &str, value: f64, ttl_seconds: u64) -> Result<()> {
        self.with_stripe_lock(key, move || async move {
            let existing = match self.kv.get(key).await? {
                Some(bytes) => Moments::from_bytes(&bytes)?,
                None => Moments::zero(),
            };
            let updated = existing.plus(&Moments::from_value(value));
            self.kv.setex(key, ttl_seconds, updated.to_bytes()).await
        })
        .await
    }

    /// The moments accumulator at `key`, or an empty one if absent.
    pub async fn get_moments(&self, key: &str) -> Result<Moments> {
        match self.kv.get(key).await? {
            Some(bytes) => Moments::from_bytes(&bytes),
            None => Ok(Moments::zero()),
        }
    }

    // -- Count-Min Sketch ----------------------------------------------------

    /// Loads the Count-Min Sketch at `key` (or a fresh `(width, depth)` one
    /// if absent), increments `item`, and stores it back.
    pub async fn add_cms(&self, key: &str, item: &[u8], count: u64, ttl_seconds: u64, width: usize, depth: usize) -> Result<()> {
        self.with_stripe_lock(key, move || async move {
            let mut cms = match self.kv.get(key).await? {
                Some(bytes) => CountMinSketch::from_bytes(&bytes)?,
                None => CountMinSketch::new(width, depth)?,
            };
            cms.add(item, count);
            self.kv.setex(key, ttl_seconds, cms.to_bytes()).await
        })
        .await
    }

    /// Estimated frequency of `item` at `key`. A missing key returns `0`.
    pub async fn query_cms(&self, key: &str, item: &[u8]) -> Result<u64> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(CountMinSketch::from_bytes(&bytes)?.query(item)),
            None => Ok(0),
        }
    }

    // -- Raw bucket access for the aggregation façade ------------------------

    /// Fetches the raw blob at `key`, if present. Used by the aggregation
    /// façade to pull buckets for a time-range or multi-system rollup
    /// without assuming which sketch kind they hold.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.kv.get(key).await
    }

    /// Lists keys matching `pattern`.
    pub async fn list_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.kv.keys(pattern).await
    }

    /// Deletes every key matching `pattern`, returning how many existed.
    /// Administrative use only; the ingest and query paths never delete.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let keys = self.kv.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.kv.delete(&keys).await
    }

    // -- Events --------------------------------------------------------------

    /// Publishes a JSON-serialized event onto the shared events channel.
    pub async fn publish_event(&self, payload: EventPayload) -> Result<()> {
        self.kv.publish(event_stream_key(), payload).await
    }

    /// Subscribes to the events channel.
    pub async fn subscribe_events(&self) -> Result<EventSubscription> {
        let receiver = self.kv.subscribe(event_stream_key()).await?;
        Ok(EventSubscription { receiver, stats: SubscriptionStats::default() })
    }

    // -- Compliance snapshot ---------------------------------------------

    /// Stores a JSON-serialized compliance snapshot with a fixed 90-day TTL.
    pub async fn save_compliance_snapshot(&self, date: DateTime<Utc>, payload: Vec<u8>) -> Result<()> {
        let key = crate::window::compliance_snapshot_key(date);
        const NINETY_DAYS_SECONDS: u64 = 90 * 24 * 60 * 60;
        self.kv.setex(&key, NINETY_DAYS_SECONDS, payload).await
    }

    /// Fetches the compliance snapshot for `date`, or `None` if absent.
    pub async fn compliance_snapshot(&self, date: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
        let key = crate::window::compliance_snapshot_key(date);
        self.kv.get(&key).await
    }
}

/// A live subscription to the events channel, tracking how many messages
/// this subscriber has missed due to falling behind.
pub struct EventSubscription {
    receiver: broadcast::Receiver<EventPayload>,
    stats: SubscriptionStats,
}

impl EventSubscription {
    /// Waits for the next event, transparently skipping past a lag gap and
    /// recording how many messages were dropped.
    pub async fn recv(&mut self) -> Result<EventPayload> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.stats.dropped += skipped;
                    debug!(skipped, "event subscriber lagged, skipping to latest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("event channel closed while a subscription was still active");
                    return Err(EngineError::Internal("event channel closed".to_string()));
                }
            }
        }
    }

    /// This subscription's drop/lag counters so far.
    pub fn stats(&self) -> SubscriptionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryKvStore;

    fn store() -> SketchStorage<MemoryKvStore> {
        SketchStorage::new(Arc::new(MemoryKvStore::default()), 8)
    }

    #[tokio::test]
    async fn bloom_round_trips_through_storage() {
        let storage = store();
        storage.add_bloom("bloom:k", b"user-1", 3600, 1000, 0.01).await.unwrap();
        assert!(storage.check_bloom("bloom:k", b"user-1").await.unwrap());
        assert!(!storage.check_bloom("bloom:k", b"user-2").await.unwrap());
    }

    #[tokio::test]
    async fn check_bloom_on_missing_key_is_false() {
        let storage = store();
        assert!(!storage.check_bloom("bloom:missing", b"x").await.unwrap());
    }

    #[tokio::test]
    async fn topk_round_trips_through_storage() {
        let storage = store();
        storage.add_topk("topk:k", "a", 5, 3600, 10).await.unwrap();
        storage.add_topk("topk:k", "b", 10, 3600, 10).await.unwrap();
        let top = storage.get_topk("topk:k", 10).await.unwrap();
        assert_eq!(top[0].item, "b");
        assert_eq!(top[1].item, "a");
    }

    #[tokio::test]
    async fn moments_round_trips_and_accumulates() {
        let storage = store();
        storage.add_moments("moments:k", 10.0, 3600).await.unwrap();
        storage.add_moments("moments:k", 20.0, 3600).await.unwrap();
        let m = storage.get_moments("moments:k").await.unwrap();
        assert_eq!(m.count(), 2.0);
        assert_eq!(m.mean(), 15.0);
    }

    #[tokio::test]
    async fn cms_round_trips_through_storage() {
        let storage = store();
        storage.add_cms("cms:k", b"item", 5, 3600, 200, 4).await.unwrap();
        assert!(storage.query_cms("cms:k", b"item").await.unwrap() >= 5);
    }

    #[tokio::test]
    async fn concurrent_bloom_updates_to_same_key_are_all_observed() {
        let storage = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..32 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.add_bloom("bloom:concurrent", format!("item-{i}").as_bytes(), 3600, 1000, 0.01).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for i in 0..32 {
            assert!(storage.check_bloom("bloom:concurrent", format!("item-{i}").as_bytes()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn native_hll_add_and_cardinality() {
        let storage = store();
        let ts = Utc::now();
        for i in 0..500u32 {
            storage.add_hll("users", "prod", &i.to_le_bytes(), ts, &[TimeWindow::Hour]).await.unwrap();
        }
        let count = storage.hll_cardinality("users", "prod", TimeWindow::Hour, ts).await.unwrap();
        let error = (count as f64 - 500.0).abs() / 500.0;
        assert!(error < 0.1);
    }

    #[tokio::test]
    async fn delete_matching_removes_only_matching_keys() {
        let storage = store();
        storage.add_bloom("bloom:user_activity:prod:1d:x", b"a", 3600, 1000, 0.01).await.unwrap();
        storage.add_bloom("bloom:user_activity:staging:1d:x", b"a", 3600, 1000, 0.01).await.unwrap();
        storage.add_topk("topk:active_users:prod:1h:x", "a", 1, 3600, 10).await.unwrap();

        let removed = storage.delete_matching("bloom:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(storage.get_raw("bloom:user_activity:prod:1d:x").await.unwrap().is_none());
        assert!(storage.get_raw("topk:active_users:prod:1h:x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn compliance_snapshot_round_trips() {
        let storage = store();
        let date = Utc::now();
        storage.save_compliance_snapshot(date, b"{\"ok\":true}".to_vec()).await.unwrap();
        let snapshot = storage.compliance_snapshot(date).await.unwrap();
        assert_eq!(snapshot, Some(b"{\"ok\":true}".to_vec()));
    }

    #[tokio::test]
    async fn compliance_snapshot_missing_is_none() {
        let storage = store();
        assert_eq!(storage.compliance_snapshot(Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn event_subscription_delivers_published_payload() {
        let storage = store();
        let mut sub = storage.subscribe_events().await.unwrap();
        storage.publish_event(b"event-1".to_vec()).await.unwrap();
        let payload = sub.recv().await.unwrap();
        assert_eq!(payload, b"event-1".to_vec());
        assert_eq!(sub.stats().dropped, 0);
    }
}
