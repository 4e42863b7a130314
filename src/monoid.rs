//! The monoid capability: a generic `(zero, plus)` pair that lets windows,
//! systems, and distributed shards of the same sketch type be combined
//! safely, in any order, without re-reading raw events.
//!
//! This is deliberately a free-standing trait rather than a supertrait of
//! [`crate::cardinality::HyperLogLog`]/[`crate::membership::BloomFilter`]/etc:
//! merge semantics differ from sketch to sketch (union vs. intersection for
//! Bloom filters, for instance), so a sketch's "the" monoid is a choice, not
//! an inherent property of the type. Callers pick a `Monoid<T>` implementor
//! that names the combine rule they want.

use crate::cardinality::HyperLogLog;
use crate::error::Result;
use crate::frequency::{CountMinSketch, TopK};
use crate::membership::BloomFilter;
use crate::moments::Moments;

/// A monoid over `T`: an identity element and an associative, order-independent
/// combine operation.
///
/// Implementors must satisfy, for all `a, b, c: T`:
/// - identity: `plus(zero(), a) == a == plus(a, zero())`
/// - associativity: `plus(plus(a, b), c) == plus(a, plus(b, c))`
///
/// Commutativity is not required by the trait itself, but every monoid this
/// crate actually uses (HLL/Bloom/CMS/TopK/Moments merge) happens to be
/// commutative too, which is what makes reduction order irrelevant across
/// distributed shards.
pub trait Monoid<T> {
    /// The identity element: combining it with any `a` yields `a` unchanged.
    fn zero(&self) -> T;

    /// Combines two values of `T`, returning a new value of `T`.
    fn plus(&self, a: &T, b: &T) -> T;
}

/// Folds a non-empty slice of values through a monoid, left to right.
///
/// Returns `monoid.zero()` for an empty slice.
pub fn sum<T, M: Monoid<T>>(monoid: &M, values: &[T]) -> T {
    values.iter().fold(monoid.zero(), |acc, v| monoid.plus(&acc, v))
}

/// Folds a slice of `Option<T>` through a monoid, treating `None` as absent
/// (not as `zero()`) so the count of present values can still be recovered by
/// the caller if needed. Returns `None` only if every element is `None`.
pub fn sum_option<T, M: Monoid<T>>(monoid: &M, values: &[Option<T>]) -> Option<T> {
    let mut acc: Option<T> = None;
    for v in values {
        acc = match (acc, v) {
            (None, None) => None,
            (None, Some(v)) => Some(monoid.plus(&monoid.zero(), v)),
            (Some(a), None) => Some(a),
            (Some(a), Some(v)) => Some(monoid.plus(&a, v)),
        };
    }
    acc
}

/// The HyperLogLog monoid: parameterized by the precision every combined
/// sketch must share.
#[derive(Debug, Clone, Copy)]
pub struct HllMonoid {
    precision: u8,
}

impl HllMonoid {
    /// Builds a descriptor for `precision`, validating it against
    /// [`HyperLogLog::new`]'s supported range up front.
    pub fn new(precision: u8) -> Result<Self> {
        HyperLogLog::new(precision)?;
        Ok(HllMonoid { precision })
    }
}

impl Monoid<HyperLogLog> for HllMonoid {
    fn zero(&self) -> HyperLogLog {
        HyperLogLog::new(self.precision).expect("precision already validated in HllMonoid::new")
    }

    fn plus(&self, a: &HyperLogLog, b: &HyperLogLog) -> HyperLogLog {
        let mut merged = a.clone();
        merged.merge(b).expect("HllMonoid only combines sketches built at its own precision");
        merged
    }
}

/// The Bloom filter union monoid: the identity is the all-zero filter, so
/// `union(zero, x) == x`. Parameterized by the `(capacity, error_rate)` every
/// combined filter must share.
#[derive(Debug, Clone, Copy)]
pub struct BloomUnionMonoid {
    capacity: u64,
    error_rate: f64,
}

impl BloomUnionMonoid {
    /// Builds a descriptor for `(capacity, error_rate)`, validating it
    /// against [`BloomFilter::new`] up front.
    pub fn new(capacity: u64, error_rate: f64) -> Result<Self> {
        BloomFilter::new(capacity, error_rate)?;
        Ok(BloomUnionMonoid { capacity, error_rate })
    }
}

impl Monoid<BloomFilter> for BloomUnionMonoid {
    fn zero(&self) -> BloomFilter {
        BloomFilter::new(self.capacity, self.error_rate).expect("parameters already validated in BloomUnionMonoid::new")
    }

    fn plus(&self, a: &BloomFilter, b: &BloomFilter) -> BloomFilter {
        let mut merged = a.clone();
        merged.union(b).expect("BloomUnionMonoid only combines filters built at its own (capacity, error_rate)");
        merged
    }
}

/// The Bloom filter intersection monoid: the identity is the all-ones
/// filter ([`BloomFilter::all_ones`]), so `intersect(zero, x) == x`.
/// Parameterized the same way as [`BloomUnionMonoid`]; the two are distinct
/// descriptors over the same underlying type because they disagree on what
/// "empty" means.
#[derive(Debug, Clone, Copy)]
pub struct BloomIntersectionMonoid {
    capacity: u64,
    error_rate: f64,
}

impl BloomIntersectionMonoid {
    /// Builds a descriptor for `(capacity, error_rate)`, validating it
    /// against [`BloomFilter::all_ones`] up front.
    pub fn new(capacity: u64, error_rate: f64) -> Result<Self> {
        BloomFilter::all_ones(capacity, error_rate)?;
        Ok(BloomIntersectionMonoid { capacity, error_rate })
    }
}

impl Monoid<BloomFilter> for BloomIntersectionMonoid {
    fn zero(&self) -> BloomFilter {
        BloomFilter::all_ones(self.capacity, self.error_rate).expect("parameters already validated in BloomIntersectionMonoid::new")
    }

    fn plus(&self, a: &BloomFilter, b: &BloomFilter) -> BloomFilter {
        let mut merged = a.clone();
        merged.intersect(b).expect("BloomIntersectionMonoid only combines filters built at its own (capacity, error_rate)");
        merged
    }
}

/// The Count-Min Sketch monoid: parameterized by the `(width, depth)` every
/// combined sketch must share.
#[derive(Debug, Clone, Copy)]
pub struct CmsMonoid {
    width: usize,
    depth: usize,
}

impl CmsMonoid {
    /// Builds a descriptor for `(width, depth)`, validating it against
    /// [`CountMinSketch::new`] up front.
    pub fn new(width: usize, depth: usize) -> Result<Self> {
        CountMinSketch::new(width, depth)?;
        Ok(CmsMonoid { width, depth })
    }
}

impl Monoid<CountMinSketch> for CmsMonoid {
    fn zero(&self) -> CountMinSketch {
        CountMinSketch::new(self.width, self.depth).expect("dimensions already validated in CmsMonoid::new")
    }

    fn plus(&self, a: &CountMinSketch, b: &CountMinSketch) -> CountMinSketch {
        let mut merged = a.clone();
        merged.merge(b).expect("CmsMonoid only combines sketches built at its own (width, depth)");
        merged
    }
}

/// The Top-K monoid: parameterized by the capacity `k` every combined
/// tracker must share. Approximate (Space-Saving admits bounded error on
/// merge), not exact, but still satisfies the monoid laws up to that error.
#[derive(Debug, Clone, Copy)]
pub struct TopKMonoid {
    k: usize,
}

impl TopKMonoid {
    /// Builds a descriptor for capacity `k`.
    pub fn new(k: usize) -> Self {
        TopKMonoid { k }
    }
}

impl Monoid<TopK> for TopKMonoid {
    fn zero(&self) -> TopK {
        TopK::new(self.k)
    }

    fn plus(&self, a: &TopK, b: &TopK) -> TopK {
        let mut merged = a.clone();
        merged.merge(b);
        merged
    }
}

/// The Moments monoid. Unlike the sketch monoids above, `Moments` needs no
/// construction parameters (its identity, the empty accumulator, and its
/// combine rule are the same for every instance), so this descriptor carries
/// no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentsMonoid;

impl Monoid<Moments> for MomentsMonoid {
    fn zero(&self) -> Moments {
        Moments::zero()
    }

    fn plus(&self, a: &Moments, b: &Moments) -> Moments {
        a.plus(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SumMonoid;

    impl Monoid<i64> for SumMonoid {
        fn zero(&self) -> i64 {
            0
        }
        fn plus(&self, a: &i64, b: &i64) -> i64 {
            a + b
        }
    }

    #[test]
    fn sum_of_empty_slice_is_zero() {
        let m = SumMonoid;
        assert_eq!(sum(&m, &[]), 0);
    }

    #[test]
    fn sum_matches_direct_total() {
        let m = SumMonoid;
        let values = [1, 2, 3, 4, 5];
        assert_eq!(sum(&m, &values), 15);
    }

    #[test]
    fn sum_is_order_independent_for_commutative_monoid() {
        let m = SumMonoid;
        let a = [1, 2, 3, 4, 5];
        let mut b = a;
        b.reverse();
        assert_eq!(sum(&m, &a), sum(&m, &b));
    }

    #[test]
    fn sum_option_skips_none_without_treating_as_zero() {
        let m = SumMonoid;
        let values = [None, Some(3), None, Some(4)];
        assert_eq!(sum_option(&m, &values), Some(7));
    }

    #[test]
    fn sum_option_all_none_is_none() {
        let m = SumMonoid;
        let values: [Option<i64>; 3] = [None, None, None];
        assert_eq!(sum_option(&m, &values), None);
    }

    #[test]
    fn identity_law_holds() {
        let m = SumMonoid;
        assert_eq!(m.plus(&m.zero(), &7), 7);
        assert_eq!(m.plus(&7, &m.zero()), 7);
    }

    #[test]
    fn associativity_law_holds() {
        let m = SumMonoid;
        let (a, b, c) = (3, 5, 11);
        assert_eq!(m.plus(&m.plus(&a, &b), &c), m.plus(&a, &m.plus(&b, &c)));
    }

    #[test]
    fn hll_monoid_zero_is_identity() {
        let m = HllMonoid::new(10).unwrap();
        let mut a = m.zero();
        a.add(&"alpha");
        a.add(&"beta");
        let combined = m.plus(&a, &m.zero());
        assert_eq!(combined.estimate(), a.estimate());
    }

    #[test]
    fn hll_monoid_plus_matches_direct_merge() {
        let m = HllMonoid::new(10).unwrap();
        let mut a = m.zero();
        a.add(&"alpha");
        let mut b = m.zero();
        b.add(&"beta");
        let via_monoid = m.plus(&a, &b);
        a.merge(&b).unwrap();
        assert_eq!(via_monoid.estimate(), a.estimate());
    }

    #[test]
    fn bloom_union_monoid_zero_is_all_zero_identity() {
        let m = BloomUnionMonoid::new(1000, 0.01).unwrap();
        let mut a = m.zero();
        a.insert(b"alpha");
        let combined = m.plus(&a, &m.zero());
        assert!(combined.contains(b"alpha"));
        assert_eq!(combined, a);
    }

    #[test]
    fn bloom_intersection_monoid_zero_is_all_ones_identity() {
        let m = BloomIntersectionMonoid::new(1000, 0.01).unwrap();
        let mut a = BloomUnionMonoid::new(1000, 0.01).unwrap().zero();
        a.insert(b"alpha");
        let combined = m.plus(&m.zero(), &a);
        assert_eq!(combined, a);
    }

    #[test]
    fn cms_monoid_plus_matches_direct_merge() {
        let m = CmsMonoid::new(64, 4).unwrap();
        let mut a = m.zero();
        a.add(b"alpha", 3);
        let mut b = m.zero();
        b.add(b"alpha", 2);
        let via_monoid = m.plus(&a, &b);
        a.merge(&b).unwrap();
        assert_eq!(via_monoid.query(b"alpha"), a.query(b"alpha"));
    }

    #[test]
    fn topk_monoid_zero_is_identity() {
        let m = TopKMonoid::new(3);
        let mut a = m.zero();
        a.add("alpha", 5);
        let combined = m.plus(&a, &m.zero());
        assert_eq!(combined.top_k(3), a.top_k(3));
    }

    #[test]
    fn moments_monoid_matches_direct_plus() {
        let m = MomentsMonoid;
        let a = Moments::from_values([1.0, 2.0, 3.0]);
        let b = Moments::from_values([4.0, 5.0]);
        let via_monoid = m.plus(&a, &b);
        let direct = a.plus(&b);
        assert_eq!(via_monoid.count(), direct.count());
    }
}
