//! Count-Min Sketch: approximate per-item frequency in `O(w*d)` space.
//!
//! Estimates are always greater than or equal to the true count, since
//! collisions can only inflate a row's counter, never deflate it. `query`
//! therefore takes the minimum across all `d` rows.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::hash::h;

/// A Count-Min Sketch with `depth` independent rows of `width` counters each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    table: Vec<u64>,
    total_count: u64,
}

impl CountMinSketch {
    /// Builds an empty sketch with the given width and depth.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `width` or `depth` is zero.
    pub fn new(width: usize, depth: usize) -> Result<Self> {
        if width == 0 || depth == 0 {
            return Err(EngineError::Validation("count-min width and depth must be > 0".to_string()));
        }
        Ok(CountMinSketch { width, depth, table: vec![0u64; width * depth], total_count: 0 })
    }

    /// Sketch width (counters per row).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Sketch depth (number of rows).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Sum of all `add` amounts applied so far.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    fn position(&self, row: usize, item: &[u8]) -> usize {
        row * self.width + (h(row as u32, item) as usize % self.width)
    }

    /// Increments `item`'s estimated count by `count`.
    pub fn add(&mut self, item: &[u8], count: u64) {
        for row in 0..self.depth {
            let pos = self.position(row, item);
            self.table[pos] = self.table[pos].saturating_add(count);
        }
        self.total_count = self.total_count.saturating_add(count);
    }

    /// Estimates `item`'s frequency: the minimum counter across all rows,
    /// always `>=` the true count.
    pub fn query(&self, item: &[u8]) -> u64 {
        (0..self.depth).map(|row| self.table[self.position(row, item)]).min().unwrap_or(0)
    }

    /// Merges `other` into `self` by elementwise addition of counters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `width`/`depth` differ between
    /// the two sketches.
    pub fn merge(&mut self, other: &CountMinSketch) -> Result<()> {
        if self.width != other.width || self.depth != other.depth {
            return Err(EngineError::Validation(format!(
                "cannot merge count-min sketches with different dimensions (w={},d={} vs w={},d={})",
                self.width, self.depth, other.width, other.depth
            )));
        }
        for (a, b) in self.table.iter_mut().zip(other.table.iter()) {
            *a = a.saturating_add(*b);
        }
        self.total_count = self.total_count.saturating_add(other.total_count);
        Ok(())
    }

    /// Serializes to the on-disk blob layout: 4-byte LE width, 4-byte LE
    /// depth, then `width*depth` 8-byte LE counters, row-major.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.table.len() * 8);
        buf.extend_from_slice(&(self.width as u32).to_le_bytes());
        buf.extend_from_slice(&(self.depth as u32).to_le_bytes());
        for counter in &self.table {
            buf.extend_from_slice(&counter.to_le_bytes());
        }
        buf
    }

    /// Parses the blob layout produced by [`CountMinSketch::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(EngineError::Validation("count-min blob too short".to_string()));
        }
        let width = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let depth = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let expected_len = 8 + width * depth * 8;
        if bytes.len() != expected_len {
            return Err(EngineError::Validation(format!(
                "count-min blob length {} does not match expected {expected_len} for w={width},d={depth}",
                bytes.len()
            )));
        }
        let mut table = Vec::with_capacity(width * depth);
        let mut offset = 8;
        for _ in 0..(width * depth) {
            table.push(u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()));
            offset += 8;
        }
        let total_count = table.iter().take(width).sum();
        Ok(CountMinSketch { width, depth, table, total_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_zero_dimensions() {
        assert!(CountMinSketch::new(0, 5).is_err());
        assert!(CountMinSketch::new(100, 0).is_err());
    }

    #[test]
    fn query_on_empty_sketch_is_zero() {
        let cms = CountMinSketch::new(1000, 5).unwrap();
        assert_eq!(cms.query(b"anything"), 0);
    }

    #[test]
    fn query_never_underestimates() {
        let mut cms = CountMinSketch::new(50, 4).unwrap();
        for i in 0..200 {
            cms.add(format!("item-{i}").as_bytes(), 1);
        }
        for i in 0..200 {
            assert!(cms.query(format!("item-{i}").as_bytes()) >= 1);
        }
    }

    #[test]
    fn repeated_adds_accumulate() {
        let mut cms = CountMinSketch::new(1000, 5).unwrap();
        cms.add(b"hot-item", 10);
        cms.add(b"hot-item", 5);
        assert!(cms.query(b"hot-item") >= 15);
        assert_eq!(cms.total_count(), 15);
    }

    #[test]
    fn merge_rejects_mismatched_dimensions() {
        let mut a = CountMinSketch::new(1000, 5).unwrap();
        let b = CountMinSketch::new(500, 5).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = CountMinSketch::new(1000, 5).unwrap();
        let mut b = CountMinSketch::new(1000, 5).unwrap();
        a.add(b"shared", 3);
        b.add(b"shared", 4);
        a.merge(&b).unwrap();
        assert!(a.query(b"shared") >= 7);
        assert_eq!(a.total_count(), 7);
    }

    #[test]
    fn byte_round_trip_preserves_counts() {
        let mut cms = CountMinSketch::new(200, 4).unwrap();
        cms.add(b"round-trip", 42);
        let bytes = cms.to_bytes();
        let restored = CountMinSketch::from_bytes(&bytes).unwrap();
        assert_eq!(cms.query(b"round-trip"), restored.query(b"round-trip"));
        assert_eq!(cms.table, restored.table);
    }

    #[test]
    fn from_bytes_rejects_mismatched_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes());
        assert!(CountMinSketch::from_bytes(&buf).is_err());
    }
}
