//! Space-Saving Top-K: tracks the heaviest-weight keys seen so far in
//! bounded memory, with deterministic eviction so merges are reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::frequency::count_min::CountMinSketch;

/// One entry in a Top-K result: an item and its tracked count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKEntry {
    /// The tracked item.
    pub item: String,
    /// Its tracked (approximate, for evicted-and-reinserted items) count.
    pub count: u64,
}

/// A Space-Saving Top-K tracker with capacity `k`.
///
/// Items are kept in a `BTreeMap` so that eviction ties break on
/// lexicographic key order deterministically. Breaking ties on insertion
/// order instead would make merge results depend on the history of each
/// tracker, not just its contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopK {
    k: usize,
    items: BTreeMap<String, u64>,
    min_count: u64,
}

impl TopK {
    /// Builds an empty tracker with capacity `k`.
    pub fn new(k: usize) -> Self {
        TopK { k, items: BTreeMap::new(), min_count: 0 }
    }

    /// Tracker capacity.
    pub fn capacity(&self) -> usize {
        self.k
    }

    /// Number of distinct items currently tracked.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` if no items are tracked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The current eviction threshold: the smallest tracked count once the
    /// tracker is at capacity, `0` otherwise.
    pub fn min_count(&self) -> u64 {
        self.min_count
    }

    /// Adds `count` to `item`'s tracked weight, following the Space-Saving
    /// admission rule: track directly while there's room, otherwise evict
    /// the lexicographically-smallest minimum-count key only if `count`
    /// exceeds the current minimum.
    pub fn add(&mut self, item: &str, count: u64) {
        if let Some(existing) = self.items.get_mut(item) {
            *existing += count;
            return;
        }

        if self.items.len() < self.k {
            self.items.insert(item.to_string(), count);
            self.min_count = if self.min_count == 0 { count } else { self.min_count.min(count) };
            return;
        }

        if count > self.min_count {
            let evict_key = self
                .items
                .iter()
                .filter(|(_, &v)| v == self.min_count)
                .map(|(k, _)| k.clone())
                .min()
                .expect("tracker at capacity always has a minimum");
            self.items.remove(&evict_key);
            self.items.insert(item.to_string(), count);
            self.min_count = *self.items.values().min().expect("non-empty after insert");
        }
    }

    /// Tracked count for `item`, or `0` if not tracked.
    pub fn query(&self, item: &str) -> u64 {
        *self.items.get(item).unwrap_or(&0)
    }

    /// The top `limit` items by tracked count, descending, ties broken
    /// lexicographically ascending.
    pub fn top_k(&self, limit: usize) -> Vec<TopKEntry> {
        let mut entries: Vec<TopKEntry> =
            self.items.iter().map(|(item, &count)| TopKEntry { item: item.clone(), count }).collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.item.cmp(&b.item)));
        entries.truncate(limit);
        entries
    }

    /// Merges `other` into `self` by replaying its tracked items through
    /// `add`. Order-independence up to the approximation error inherent in
    /// Space-Saving is an accepted property, not a defect.
    pub fn merge(&mut self, other: &TopK) {
        for (item, &count) in &other.items {
            self.add(item, count);
        }
    }

    /// Serializes to the on-disk blob layout: 4-byte `k`, 4-byte entry count,
    /// then entries (4-byte key-length, key bytes, 8-byte int64 count).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.k as u32).to_le_bytes());
        buf.extend_from_slice(&(self.items.len() as u32).to_le_bytes());
        for (item, &count) in &self.items {
            let key_bytes = item.as_bytes();
            buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(key_bytes);
            buf.extend_from_slice(&(count as i64).to_le_bytes());
        }
        buf
    }

    /// Parses the blob layout produced by [`TopK::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        use crate::error::EngineError;

        if bytes.len() < 8 {
            return Err(EngineError::Validation("topk blob too short".to_string()));
        }
        let k = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let entry_count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;

        let mut items = BTreeMap::new();
        let mut offset = 8;
        for _ in 0..entry_count {
            if offset + 4 > bytes.len() {
                return Err(EngineError::Validation("topk blob truncated before key length".to_string()));
            }
            let key_len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if offset + key_len + 8 > bytes.len() {
                return Err(EngineError::Validation("topk blob truncated before key/count".to_string()));
            }
            let key = String::from_utf8(bytes[offset..offset + key_len].to_vec())
                .map_err(|e| EngineError::Validation(format!("topk blob key is not valid utf-8: {e}")))?;
            offset += key_len;
            let count = i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()) as u64;
            offset += 8;
            items.insert(key, count);
        }

        let min_count = items.values().copied().min().unwrap_or(0);
        Ok(TopK { k, items, min_count })
    }
}

/// Combines a Count-Min Sketch with a Top-K tracker: the CMS acts as an
/// admission filter so that Top-K only tracks candidates whose estimated
/// frequency already clears its current eviction threshold, reducing churn
/// under skewed traffic compared to feeding every item straight into Top-K.
///
/// This is an internal aggregation helper, not a sketch type with its own
/// storage key; callers persist the `CountMinSketch` and `TopK` separately
/// if they need durability.
#[derive(Debug, Clone)]
pub struct HeavyHittersDetector {
    cms: CountMinSketch,
    topk: TopK,
    threshold: u64,
}

impl HeavyHittersDetector {
    /// Builds a detector tracking up to `k` heavy hitters, backed by a
    /// `cms_width x cms_depth` Count-Min Sketch.
    pub fn new(k: usize, cms_width: usize, cms_depth: usize) -> crate::error::Result<Self> {
        Ok(HeavyHittersDetector {
            cms: CountMinSketch::new(cms_width, cms_depth)?,
            topk: TopK::new(k),
            threshold: 0,
        })
    }

    /// Builds a detector sized from `config`'s Top-K capacity and Count-Min
    /// dimensions.
    pub fn from_config(config: &crate::config::EngineConfig) -> crate::error::Result<Self> {
        Self::new(config.topk_capacity, config.cms_width, config.cms_depth)
    }

    /// Records an occurrence of `item` with weight `count`.
    pub fn add(&mut self, item: &str, count: u64) {
        self.cms.add(item.as_bytes(), count);
        let estimated = self.cms.query(item.as_bytes());

        if estimated > self.threshold {
            self.topk.add(item, count);
            if self.topk.len() >= self.topk.capacity() {
                self.threshold = self.topk.min_count();
            }
        }
    }

    /// Estimated count for `item`: exact if it's currently tracked in
    /// Top-K, otherwise the Count-Min Sketch's (upper-bound) estimate.
    pub fn query(&self, item: &str) -> u64 {
        let tracked = self.topk.query(item);
        if tracked > 0 {
            tracked
        } else {
            self.cms.query(item.as_bytes())
        }
    }

    /// The top `limit` heavy hitters currently tracked.
    pub fn heavy_hitters(&self, limit: usize) -> Vec<TopKEntry> {
        self.topk.top_k(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tracker_is_empty() {
        let tk = TopK::new(3);
        assert!(tk.is_empty());
        assert_eq!(tk.query("anything"), 0);
    }

    #[test]
    fn tracks_items_within_capacity() {
        let mut tk = TopK::new(3);
        tk.add("a", 5);
        tk.add("b", 3);
        tk.add("c", 1);
        assert_eq!(tk.len(), 3);
        assert_eq!(tk.query("a"), 5);
    }

    #[test]
    fn repeated_item_accumulates() {
        let mut tk = TopK::new(3);
        tk.add("a", 5);
        tk.add("a", 2);
        assert_eq!(tk.query("a"), 7);
    }

    #[test]
    fn evicts_minimum_when_over_capacity() {
        let mut tk = TopK::new(2);
        tk.add("a", 10);
        tk.add("b", 1);
        tk.add("c", 20); // should evict "b" (min count)
        assert_eq!(tk.len(), 2);
        assert_eq!(tk.query("b"), 0);
        assert_eq!(tk.query("a"), 10);
        assert_eq!(tk.query("c"), 20);
    }

    #[test]
    fn does_not_evict_when_new_count_not_above_minimum() {
        let mut tk = TopK::new(2);
        tk.add("a", 10);
        tk.add("b", 5);
        tk.add("c", 3); // below min_count (5), dropped
        assert_eq!(tk.len(), 2);
        assert_eq!(tk.query("c"), 0);
    }

    #[test]
    fn tie_break_is_lexicographic_and_deterministic() {
        let mut tk = TopK::new(2);
        tk.add("b", 5);
        tk.add("a", 5);
        tk.add("z", 10); // both at min_count=5, "a" < "b" evicted first
        assert_eq!(tk.query("a"), 0);
        assert_eq!(tk.query("b"), 5);
        assert_eq!(tk.query("z"), 10);
    }

    #[test]
    fn top_k_sorted_descending_by_count() {
        let mut tk = TopK::new(5);
        tk.add("low", 1);
        tk.add("high", 100);
        tk.add("mid", 50);
        let top = tk.top_k(5);
        assert_eq!(top[0].item, "high");
        assert_eq!(top[1].item, "mid");
        assert_eq!(top[2].item, "low");
    }

    #[test]
    fn merge_combines_counts() {
        let mut a = TopK::new(5);
        a.add("x", 3);
        let mut b = TopK::new(5);
        b.add("x", 4);
        b.add("y", 2);
        a.merge(&b);
        assert_eq!(a.query("x"), 7);
        assert_eq!(a.query("y"), 2);
    }

    #[test]
    fn byte_round_trip_preserves_tracked_items() {
        let mut tk = TopK::new(5);
        tk.add("alpha", 10);
        tk.add("beta", 3);
        let bytes = tk.to_bytes();
        let restored = TopK::from_bytes(&bytes).unwrap();
        assert_eq!(restored.query("alpha"), 10);
        assert_eq!(restored.query("beta"), 3);
        assert_eq!(restored.capacity(), 5);
    }

    #[test]
    fn from_bytes_rejects_truncated_input() {
        assert!(TopK::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn detector_builds_from_config() {
        let mut detector = HeavyHittersDetector::from_config(&crate::config::EngineConfig::default()).unwrap();
        detector.add("item", 5);
        assert_eq!(detector.query("item"), 5);
    }

    #[test]
    fn heavy_hitters_detector_tracks_skewed_distribution() {
        let mut detector = HeavyHittersDetector::new(3, 200, 4).unwrap();
        for _ in 0..100 {
            detector.add("dominant", 1);
        }
        for i in 0..50 {
            detector.add(&format!("rare-{i}"), 1);
        }
        let hitters = detector.heavy_hitters(3);
        assert_eq!(hitters[0].item, "dominant");
        assert!(hitters[0].count >= 100);
    }
}
