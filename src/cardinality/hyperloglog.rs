//! HyperLogLog: cardinality estimation in `O(2^p)` space.
//!
//! # Algorithm
//!
//! Each item is hashed once through the crate's shared [`crate::hash::h`]
//! primitive. The low `p` bits of the hash pick one of `2^p` registers; the
//! remaining `32-p` bits are scanned for their leading-zero run, `ρ`, and the
//! register is updated to `max(reg[j], ρ)`. Estimating cardinality takes the
//! harmonic mean of `2^-reg[i]` across all registers and corrects for bias at
//! the small and large ends of the range.
//!
//! # Examples
//!
//! ```
//! use compliance_sketch_engine::cardinality::HyperLogLog;
//!
//! let mut hll = HyperLogLog::new(14).unwrap();
//! hll.add(&"user_123");
//! hll.add(&"user_456");
//! hll.add(&"user_123"); // duplicate
//!
//! assert_eq!(hll.estimate(), 2);
//! ```

use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::hash::hash_item;

/// A HyperLogLog cardinality sketch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Smallest supported precision (16 registers, ~26% error).
    pub const MIN_PRECISION: u8 = 4;

    /// Largest supported precision (65,536 registers, ~0.4% error).
    pub const MAX_PRECISION: u8 = 16;

    /// Creates an empty sketch with the given precision.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `precision` is outside
    /// `[MIN_PRECISION, MAX_PRECISION]`.
    pub fn new(precision: u8) -> Result<Self> {
        if !(Self::MIN_PRECISION..=Self::MAX_PRECISION).contains(&precision) {
            return Err(EngineError::Validation(format!(
                "hll precision {precision} out of range [{}, {}]",
                Self::MIN_PRECISION,
                Self::MAX_PRECISION
            )));
        }
        let m = 1usize << precision;
        Ok(HyperLogLog { precision, registers: vec![0u8; m] })
    }

    /// The precision this sketch was constructed with.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Number of registers, `2^precision`.
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Adds an item to the sketch.
    pub fn add<T: Hash + ?Sized>(&mut self, item: &T) {
        let hash = hash_item(0, item);
        self.add_hash(hash);
    }

    fn add_hash(&mut self, hash: u32) {
        let p = self.precision;
        let j = (hash & (self.registers.len() as u32 - 1)) as usize;
        let w = hash >> p;
        let rank_width = 32 - p;
        let rho = if w == 0 {
            rank_width
        } else {
            ((w.leading_zeros() - p as u32) + 1) as u8
        };
        if rho as u8 > self.registers[j] {
            self.registers[j] = rho as u8;
        }
    }

    fn alpha(m: usize) -> f64 {
        match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m as f64),
        }
    }

    /// Estimates the number of distinct items added so far.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len();
        let alpha = Self::alpha(m);

        let sum_inv: f64 = self.registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
        let raw = alpha * (m as f64) * (m as f64) / sum_inv;

        let zeros = self.registers.iter().filter(|&&r| r == 0).count();

        let estimate = if raw <= 2.5 * m as f64 && zeros > 0 {
            (m as f64) * (m as f64 / zeros as f64).ln()
        } else if raw > (1u64 << 32) as f64 / 30.0 {
            let two_32 = (1u64 << 32) as f64;
            -two_32 * (1.0 - raw / two_32).ln()
        } else {
            raw
        };

        estimate.round().max(0.0) as u64
    }

    /// `true` if no items have ever been added (all registers are zero).
    ///
    /// Note this can't distinguish "never added to" from the vanishingly
    /// unlikely case of every register happening to land on zero.
    pub fn is_empty(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    /// Merges `other` into `self` by taking the elementwise maximum of
    /// registers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the two sketches have different
    /// precisions.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<()> {
        if self.precision != other.precision {
            return Err(EngineError::Validation(format!(
                "cannot merge HyperLogLog sketches with different precisions ({} vs {})",
                self.precision, other.precision
            )));
        }
        for (a, b) in self.registers.iter_mut().zip(other.registers.iter()) {
            if *b > *a {
                *a = *b;
            }
        }
        Ok(())
    }

    /// Serializes to the on-disk blob layout: one byte of precision followed
    /// by `2^precision` register bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.registers.len());
        buf.push(self.precision);
        buf.extend_from_slice(&self.registers);
        buf
    }

    /// Parses the blob layout produced by [`HyperLogLog::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let precision = *bytes
            .first()
            .ok_or_else(|| EngineError::Validation("empty hll blob".to_string()))?;
        if !(Self::MIN_PRECISION..=Self::MAX_PRECISION).contains(&precision) {
            return Err(EngineError::Validation(format!(
                "hll blob precision {precision} out of range"
            )));
        }
        let expected_len = 1 + (1usize << precision);
        if bytes.len() != expected_len {
            return Err(EngineError::Validation(format!(
                "hll blob length {} does not match expected {} for precision {}",
                bytes.len(),
                expected_len,
                precision
            )));
        }
        Ok(HyperLogLog { precision, registers: bytes[1..].to_vec() })
    }
}
