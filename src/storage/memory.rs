//! `MemoryKvStore`: an in-process `KvStore` reference implementation.
//!
//! Backed by [`dashmap::DashMap`] for lock-free concurrent reads, with lazy
//! expiry checked on access rather than a background sweep, which is
//! sufficient for a test collaborator that never needs to reclaim memory
//! proactively. Expiry deadlines come from [`tokio::time::Instant`], so tests
//! running under a paused tokio clock can advance simulated time across TTL
//! boundaries. This is not a production deployment target; see
//! [`crate::storage::kv::KvStore`]'s docs.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::cardinality::HyperLogLog;
use crate::error::{EngineError, Result};

use super::kv::{EventPayload, KvStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// A native HLL register set. Unlike [`Entry`], the expiry is optional:
/// `pfadd` creates the key without a TTL, and only a later `expire` arms one.
struct NativeEntry {
    hll: HyperLogLog,
    expires_at: Option<Instant>,
}

impl NativeEntry {
    fn fresh(precision: u8) -> Self {
        NativeEntry {
            hll: HyperLogLog::new(precision).expect("precision validated at construction"),
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// An in-process, `DashMap`-backed implementation of [`KvStore`].
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
    native_hll: DashMap<String, NativeEntry>,
    channels: DashMap<String, broadcast::Sender<EventPayload>>,
    channel_capacity: usize,
    native_hll_precision: u8,
}

impl MemoryKvStore {
    /// Builds an empty store. `channel_capacity` bounds each subscriber's
    /// broadcast queue; `native_hll_precision` is the precision used for the
    /// portable `HyperLogLog` backing `pfadd`/`pfcount`/`pfmerge`.
    pub fn new(channel_capacity: usize, native_hll_precision: u8) -> Self {
        MemoryKvStore {
            entries: DashMap::new(),
            native_hll: DashMap::new(),
            channels: DashMap::new(),
            channel_capacity,
            native_hll_precision,
        }
    }

    fn channel(&self, name: &str) -> broadcast::Sender<EventPayload> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }

    fn is_live(entry: &Entry, now: Instant) -> bool {
        entry.expires_at > now
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        MemoryKvStore::new(1024, 14)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn setex(&self, key: &str, ttl_seconds: u64, value: Vec<u8>) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        // The read guard must drop before remove_if, or the same-shard write
        // lock would deadlock against it.
        let live_value = self
            .entries
            .get(key)
            .filter(|entry| Self::is_live(entry, now))
            .map(|entry| entry.value.clone());
        if live_value.is_none() {
            self.entries.remove_if(key, |_, entry| !Self::is_live(entry, now));
        }
        Ok(live_value)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0u64;
        for key in keys {
            let had_entry = self.entries.remove(key).is_some();
            let had_native = self.native_hll.remove(key).is_some();
            if had_entry || had_native {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let matches = |key: &str| -> bool { glob_match(pattern, key) };

        let mut found: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| Self::is_live(entry.value(), now))
            .map(|entry| entry.key().clone())
            .filter(|k| matches(k))
            .collect();

        for entry in self.native_hll.iter() {
            if entry.is_live(now) && matches(entry.key()) && !found.contains(entry.key()) {
                found.push(entry.key().clone());
            }
        }

        found.sort();
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(ttl_seconds);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = deadline;
            return Ok(true);
        }
        if let Some(mut native) = self.native_hll.get_mut(key) {
            if native.is_live(now) {
                native.expires_at = Some(deadline);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn publish(&self, channel: &str, payload: EventPayload) -> Result<()> {
        let sender = self.channel(channel);
        // Err here just means no receivers are attached; best-effort delivery.
        let _ = sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<EventPayload>> {
        Ok(self.channel(channel).subscribe())
    }

    async fn pfadd(&self, key: &str, value: &[u8]) -> Result<bool> {
        let now = Instant::now();
        let mut entry = self
            .native_hll
            .entry(key.to_string())
            .or_insert_with(|| NativeEntry::fresh(self.native_hll_precision));
        if !entry.is_live(now) {
            *entry = NativeEntry::fresh(self.native_hll_precision);
        }
        let before = entry.hll.estimate();
        entry.hll.add(value);
        Ok(entry.hll.estimate() != before)
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .native_hll
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.hll.estimate())
            .unwrap_or(0))
    }

    async fn pfmerge(&self, dest: &str, srcs: &[String]) -> Result<u64> {
        let now = Instant::now();
        let (mut merged, expires_at) = match self.native_hll.get(dest) {
            Some(entry) if entry.is_live(now) => (entry.hll.clone(), entry.expires_at),
            _ => (
                HyperLogLog::new(self.native_hll_precision).expect("precision validated at construction"),
                None,
            ),
        };

        for src in srcs {
            if let Some(source) = self.native_hll.get(src).filter(|entry| entry.is_live(now)) {
                merged.merge(&source.hll).map_err(|e| {
                    EngineError::Internal(format!("native hll merge precision mismatch for {src}: {e}"))
                })?;
            }
        }

        let count = merged.estimate();
        self.native_hll.insert(dest.to_string(), NativeEntry { hll: merged, expires_at });
        Ok(count)
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryKvStore::default();
        store.setex("k", 60, b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn get_on_missing_key_is_none() {
        let store = MemoryKvStore::default();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_key_reads_as_absent() {
        let store = MemoryKvStore::default();
        store.setex("k", 30, b"v".to_vec()).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_count_removed() {
        let store = MemoryKvStore::default();
        store.setex("a", 60, b"1".to_vec()).await.unwrap();
        store.setex("b", 60, b"2".to_vec()).await.unwrap();
        let removed = store.delete(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn keys_matches_glob_pattern() {
        let store = MemoryKvStore::default();
        store.setex("hll:users:prod:1h:x", 60, vec![]).await.unwrap();
        store.setex("bloom:users:prod:1d:x", 60, vec![]).await.unwrap();
        let found = store.keys("hll:*").await.unwrap();
        assert_eq!(found, vec!["hll:users:prod:1h:x".to_string()]);
    }

    #[tokio::test]
    async fn expire_resets_ttl_and_reports_existence() {
        let store = MemoryKvStore::default();
        store.setex("k", 60, b"v".to_vec()).await.unwrap();
        assert!(store.expire("k", 120).await.unwrap());
        assert!(!store.expire("missing", 60).await.unwrap());
    }

    #[tokio::test]
    async fn publish_subscribe_delivers_payload() {
        let store = MemoryKvStore::default();
        let mut rx = store.subscribe("events:stream").await.unwrap();
        store.publish("events:stream", b"hi".to_vec()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hi".to_vec());
    }

    #[tokio::test]
    async fn publish_with_no_subscriber_does_not_error() {
        let store = MemoryKvStore::default();
        store.publish("events:stream", b"hi".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn pfadd_pfcount_track_cardinality() {
        let store = MemoryKvStore::default();
        for i in 0..1000u32 {
            store.pfadd("hll:users:prod:1h:bucket", &i.to_le_bytes()).await.unwrap();
        }
        let count = store.pfcount("hll:users:prod:1h:bucket").await.unwrap();
        let error = (count as f64 - 1000.0).abs() / 1000.0;
        assert!(error < 0.1, "native hll estimate {count} too far from 1000");
    }

    #[tokio::test]
    async fn pfcount_on_missing_key_is_zero() {
        let store = MemoryKvStore::default();
        assert_eq!(store.pfcount("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pfmerge_combines_sources_into_dest_cardinality() {
        let store = MemoryKvStore::default();
        for i in 0..500u32 {
            store.pfadd("hll:a", &i.to_le_bytes()).await.unwrap();
        }
        for i in 500..1000u32 {
            store.pfadd("hll:b", &i.to_le_bytes()).await.unwrap();
        }
        let count = store.pfmerge("hll:dest", &["hll:a".to_string(), "hll:b".to_string()]).await.unwrap();
        let error = (count as f64 - 1000.0).abs() / 1000.0;
        assert!(error < 0.1, "merged native hll estimate {count} too far from 1000");
    }

    #[tokio::test]
    async fn expire_arms_ttl_on_native_hll_key() {
        let store = MemoryKvStore::default();
        store.pfadd("hll:k", b"a").await.unwrap();
        assert!(store.expire("hll:k", 60).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_native_hll_key_counts_as_zero() {
        let store = MemoryKvStore::default();
        store.pfadd("hll:k", b"a").await.unwrap();
        store.expire("hll:k", 60).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.pfcount("hll:k").await.unwrap(), 0);
        // A later pfadd recreates the key from empty registers.
        store.pfadd("hll:k", b"b").await.unwrap();
        assert_eq!(store.pfcount("hll:k").await.unwrap(), 1);
    }
}
