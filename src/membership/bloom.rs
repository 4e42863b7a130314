//! Bloom filter: probabilistic set membership with no false negatives.
//!
//! Bit positions are derived from `k` independently-seeded calls into the
//! crate's shared [`crate::hash::h`] primitive, rather than two base hashes
//! combined linearly (the Kirsch-Mitzenmacher trick). Simpler to reason
//! about, at the cost of `k` hash calls per operation instead of two.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::hash::h;

/// A fixed-capacity Bloom filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u8>,
    m: u64,
    k: u32,
    capacity: u64,
    error_rate: f64,
}

impl BloomFilter {
    /// Builds a filter sized for `capacity` items at false-positive rate
    /// `error_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `capacity` is zero or
    /// `error_rate` is not in `(0, 1)`.
    pub fn new(capacity: u64, error_rate: f64) -> Result<Self> {
        if capacity == 0 {
            return Err(EngineError::Validation("bloom capacity must be > 0".to_string()));
        }
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(EngineError::Validation(format!(
                "bloom error rate {error_rate} must be in (0, 1)"
            )));
        }

        let m = Self::optimal_m(capacity, error_rate);
        let k = Self::optimal_k(m, capacity);
        let bytes = m.div_ceil(8);

        Ok(BloomFilter { bits: vec![0u8; bytes as usize], m, k, capacity, error_rate })
    }

    /// Builds a filter sized like [`BloomFilter::new`] but with every bit
    /// set: the identity element for the intersection monoid
    /// (`intersect(ones, x) == x`), as opposed to the all-zero filter
    /// `new` returns, which is the identity element for union.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] under the same conditions as
    /// [`BloomFilter::new`].
    pub fn all_ones(capacity: u64, error_rate: f64) -> Result<Self> {
        let mut filter = Self::new(capacity, error_rate)?;
        filter.bits.iter_mut().for_each(|byte| *byte = 0xFF);
        Ok(filter)
    }

    fn optimal_m(n: u64, error_rate: f64) -> u64 {
        let m = -(n as f64) * error_rate.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2);
        (m.ceil() as u64).max(8)
    }

    fn optimal_k(m: u64, n: u64) -> u32 {
        let k = (m as f64 / n as f64) * std::f64::consts::LN_2;
        (k.round() as u32).max(1)
    }

    /// Number of bits in the underlying array.
    pub fn bit_count(&self) -> u64 {
        self.m
    }

    /// Number of hash functions used per item.
    pub fn hash_count(&self) -> u32 {
        self.k
    }

    /// The capacity this filter was constructed with.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The false-positive rate this filter was constructed with.
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    fn positions<'a>(&'a self, item: &'a [u8]) -> impl Iterator<Item = u64> + 'a {
        (0..self.k).map(move |seed| (h(seed, item) as u64) % self.m)
    }

    /// Inserts `item` into the filter.
    pub fn insert(&mut self, item: &[u8]) {
        for pos in self.positions(item).collect::<Vec<_>>() {
            self.set_bit(pos);
        }
    }

    /// Returns `true` if `item` may be a member (false positives possible,
    /// false negatives impossible).
    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item).all(|pos| self.get_bit(pos))
    }

    fn set_bit(&mut self, pos: u64) {
        let byte = (pos / 8) as usize;
        let bit = (pos % 8) as u8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, pos: u64) -> bool {
        let byte = (pos / 8) as usize;
        let bit = (pos % 8) as u8;
        (self.bits[byte] >> bit) & 1 == 1
    }

    /// Fraction of bits currently set.
    pub fn fill_ratio(&self) -> f64 {
        let set_bits: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        set_bits as f64 / self.m as f64
    }

    /// Estimated number of distinct items inserted, derived from the fill ratio.
    pub fn estimated_count(&self) -> f64 {
        let fill = self.fill_ratio();
        if fill >= 1.0 {
            return f64::INFINITY;
        }
        -(self.m as f64 / self.k as f64) * (1.0 - fill).ln()
    }

    /// Estimated current false-positive rate given items inserted so far.
    pub fn current_fpr(&self) -> f64 {
        let n_hat = self.estimated_count();
        (1.0 - (-(self.k as f64) * n_hat / self.m as f64).exp()).powi(self.k as i32)
    }

    fn assert_compatible(&self, other: &BloomFilter) -> Result<()> {
        if self.m != other.m || self.k != other.k {
            return Err(EngineError::Validation(format!(
                "cannot combine bloom filters with mismatched parameters (m={},k={} vs m={},k={})",
                self.m, self.k, other.m, other.k
            )));
        }
        Ok(())
    }

    /// Unions `other` into `self` in place (bitwise OR).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `m` or `k` differ between the
    /// two filters.
    pub fn union(&mut self, other: &BloomFilter) -> Result<()> {
        self.assert_compatible(other)?;
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
        Ok(())
    }

    /// Intersects `other` into `self` in place (bitwise AND).
    ///
    /// Intersection monotonically increases false-positive rate (an item can
    /// read as a member of the intersection without being a true member of
    /// either source set); avoid folding this over large collections.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `m` or `k` differ between the
    /// two filters.
    pub fn intersect(&mut self, other: &BloomFilter) -> Result<()> {
        self.assert_compatible(other)?;
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a &= b;
        }
        Ok(())
    }

    /// Serializes to the on-disk blob layout: 4-byte LE `m`, 4-byte LE `k`,
    /// 4-byte LE capacity, 8-byte LE IEEE-754 error rate, then the bit array.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + self.bits.len());
        buf.extend_from_slice(&(self.m as u32).to_le_bytes());
        buf.extend_from_slice(&self.k.to_le_bytes());
        buf.extend_from_slice(&(self.capacity as u32).to_le_bytes());
        buf.extend_from_slice(&self.error_rate.to_le_bytes());
        buf.extend_from_slice(&self.bits);
        buf
    }

    /// Parses the blob layout produced by [`BloomFilter::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 20 {
            return Err(EngineError::Validation("bloom blob too short".to_string()));
        }
        let m = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
        let k = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let capacity = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as u64;
        let error_rate = f64::from_le_bytes(bytes[12..20].try_into().unwrap());
        let bits = bytes[20..].to_vec();

        let expected_bytes = m.div_ceil(8);
        if bits.len() as u64 != expected_bytes {
            return Err(EngineError::Validation(format!(
                "bloom blob bit array length {} does not match expected {expected_bytes} for m={m}",
                bits.len()
            )));
        }

        Ok(BloomFilter { bits, m, k, capacity, error_rate })
    }
}

/// A chained Bloom filter that grows when its tail filter's fill ratio
/// exceeds 0.5, rather than failing or silently degrading accuracy.
///
/// Membership is "present in any tail filter". This variant has no `Monoid`
/// instance (chains of different lengths can't be combined meaningfully)
/// and is used only for unbounded local streams, never persisted through
/// the keyed sketch-storage path.
#[derive(Debug, Clone)]
pub struct ScalableBloomFilter {
    filters: Vec<BloomFilter>,
    growth_factor: u64,
    next_capacity: u64,
    next_error_rate: f64,
}

impl ScalableBloomFilter {
    /// Default multiplier applied to capacity each time a new filter is chained.
    pub const DEFAULT_GROWTH_FACTOR: u64 = 2;

    /// Builds a scalable filter starting at `initial_capacity`/`initial_error_rate`.
    pub fn new(initial_capacity: u64, initial_error_rate: f64) -> Result<Self> {
        let first = BloomFilter::new(initial_capacity, initial_error_rate)?;
        Ok(ScalableBloomFilter {
            filters: vec![first],
            growth_factor: Self::DEFAULT_GROWTH_FACTOR,
            next_capacity: initial_capacity * Self::DEFAULT_GROWTH_FACTOR,
            next_error_rate: initial_error_rate / 2.0,
        })
    }

    /// Inserts `item`, chaining a new filter first if the current tail is
    /// more than half full.
    pub fn insert(&mut self, item: &[u8]) -> Result<()> {
        if self.filters.last().expect("always non-empty").fill_ratio() > 0.5 {
            let next = BloomFilter::new(self.next_capacity, self.next_error_rate)?;
            self.next_capacity *= self.growth_factor;
            self.next_error_rate /= 2.0;
            self.filters.push(next);
        }
        self.filters.last_mut().expect("always non-empty").insert(item);
        Ok(())
    }

    /// Returns `true` if `item` may be a member of any chained filter.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.filters.iter().any(|f| f.contains(item))
    }

    /// Number of filters currently chained.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}
