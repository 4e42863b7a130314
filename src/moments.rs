//! Streaming statistical moments and their parallel-combine algebra.
//!
//! `Moments` accumulates the first five power sums of a stream (`m0..m4`) so
//! that mean, variance, skewness, and kurtosis can be derived without holding
//! the stream in memory, and so that two independently-accumulated `Moments`
//! values can be combined exactly (not approximately) via [`Moments::plus`].

use serde::{Deserialize, Serialize};

/// Accumulated power sums of a numeric stream.
///
/// `m0` is the count, `m1` the running mean, and `m2..m4` the sums of
/// centered powers (i.e. accumulated the Welford way, not raw `sum(x^k)`,
/// which is numerically unstable). Combining two `Moments` values uses the
/// same parallel-variance formula generalized to third and fourth moments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    m0: f64,
    m1: f64,
    m2: f64,
    m3: f64,
    m4: f64,
}

impl Moments {
    /// The empty accumulator: the monoid identity (see [`crate::monoid`]).
    pub fn zero() -> Self {
        Moments { m0: 0.0, m1: 0.0, m2: 0.0, m3: 0.0, m4: 0.0 }
    }

    /// A single-observation accumulator.
    pub fn from_value(x: f64) -> Self {
        Moments { m0: 1.0, m1: x, m2: 0.0, m3: 0.0, m4: 0.0 }
    }

    /// Builds an accumulator from a batch of observations by repeated `plus`.
    pub fn from_values(xs: impl IntoIterator<Item = f64>) -> Self {
        xs.into_iter().fold(Moments::zero(), |acc, x| acc.plus(&Moments::from_value(x)))
    }

    /// Combines two independently-accumulated moment sets exactly.
    ///
    /// This is Chan et al.'s parallel algorithm for combining mean/variance,
    /// extended to the third and fourth central moments.
    pub fn plus(&self, other: &Moments) -> Moments {
        if self.m0 == 0.0 {
            return *other;
        }
        if other.m0 == 0.0 {
            return *self;
        }

        let n_a = self.m0;
        let n_b = other.m0;
        let n = n_a + n_b;

        let mean_a = self.m1;
        let mean_b = other.m1;
        let delta = mean_b - mean_a;
        let delta2 = delta * delta;
        let delta3 = delta2 * delta;
        let delta4 = delta3 * delta;

        let mean = mean_a + delta * n_b / n;

        let m2 = self.m2 + other.m2 + delta2 * n_a * n_b / n;

        let m3 = self.m3
            + other.m3
            + delta3 * n_a * n_b * (n_a - n_b) / (n * n)
            + 3.0 * delta * (n_a * other.m2 - n_b * self.m2) / n;

        let m4 = self.m4
            + other.m4
            + delta4 * n_a * n_b * (n_a * n_a - n_a * n_b + n_b * n_b) / (n * n * n)
            + 6.0 * delta2 * (n_a * n_a * other.m2 + n_b * n_b * self.m2) / (n * n)
            + 4.0 * delta * (n_a * other.m3 - n_b * self.m3) / n;

        Moments { m0: n, m1: mean, m2, m3, m4 }
    }

    /// Number of observations folded into this accumulator.
    pub fn count(&self) -> f64 {
        self.m0
    }

    /// Arithmetic mean, or `0.0` if no observations have been folded in.
    pub fn mean(&self) -> f64 {
        if self.m0 == 0.0 {
            0.0
        } else {
            self.m1
        }
    }

    /// Population variance, or `0.0` with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.m0 < 2.0 {
            0.0
        } else {
            self.m2 / self.m0
        }
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Sample skewness (measure of asymmetry), or `0.0` when undefined (fewer
    /// than three observations, or zero variance).
    pub fn skewness(&self) -> f64 {
        if self.m0 < 3.0 || self.m2 == 0.0 {
            0.0
        } else {
            (self.m3 * self.m0) / self.m2.powf(1.5)
        }
    }

    /// Excess kurtosis, or `0.0` when undefined (fewer than four observations,
    /// or zero variance).
    pub fn kurtosis(&self) -> f64 {
        if self.m0 < 4.0 || self.m2 == 0.0 {
            0.0
        } else {
            let n = self.m0;
            (n * self.m4) / (self.m2 * self.m2) - 3.0
        }
    }

    /// Serializes to the on-disk blob layout: 8-byte uint64 `n`, then four
    /// float64 `μ, M2, M3, M4`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(&(self.m0 as u64).to_le_bytes());
        buf.extend_from_slice(&self.m1.to_le_bytes());
        buf.extend_from_slice(&self.m2.to_le_bytes());
        buf.extend_from_slice(&self.m3.to_le_bytes());
        buf.extend_from_slice(&self.m4.to_le_bytes());
        buf
    }

    /// Parses the blob layout produced by [`Moments::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::EngineError> {
        if bytes.len() != 40 {
            return Err(crate::error::EngineError::Validation(format!(
                "moments blob length {} does not match expected 40",
                bytes.len()
            )));
        }
        let n = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let m1 = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let m2 = f64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let m3 = f64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let m4 = f64::from_le_bytes(bytes[32..40].try_into().unwrap());
        Ok(Moments { m0: n as f64, m1, m2, m3, m4 })
    }
}

/// A convenience wrapper exposing `Moments` through an imperative,
/// single-item-at-a-time API for callers that don't want to think in terms
/// of the monoid directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStatistics {
    moments: Option<Moments>,
}

impl RunningStatistics {
    /// An empty tracker.
    pub fn new() -> Self {
        RunningStatistics { moments: None }
    }

    /// Folds one more observation in.
    pub fn observe(&mut self, x: f64) {
        let next = Moments::from_value(x);
        self.moments = Some(match self.moments {
            Some(m) => m.plus(&next),
            None => next,
        });
    }

    /// The accumulated moments so far.
    pub fn moments(&self) -> Moments {
        self.moments.unwrap_or_else(Moments::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn empty_has_zero_mean_and_variance() {
        let m = Moments::zero();
        assert_eq!(m.count(), 0.0);
        assert_eq!(m.mean(), 0.0);
        assert_eq!(m.variance(), 0.0);
        assert_eq!(m.skewness(), 0.0);
        assert_eq!(m.kurtosis(), 0.0);
    }

    #[test]
    fn single_value_has_zero_variance() {
        let m = Moments::from_value(42.0);
        assert_eq!(m.mean(), 42.0);
        assert_eq!(m.variance(), 0.0);
    }

    #[test]
    fn mean_and_variance_match_direct_computation() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = Moments::from_values(xs.iter().copied());
        let n = xs.len() as f64;
        let direct_mean = xs.iter().sum::<f64>() / n;
        let direct_var = xs.iter().map(|x| (x - direct_mean).powi(2)).sum::<f64>() / n;
        assert!(approx(m.mean(), direct_mean, 1e-9));
        assert!(approx(m.variance(), direct_var, 1e-9));
    }

    #[test]
    fn plus_is_associative_and_commutative_in_effect() {
        let xs: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let whole = Moments::from_values(xs.iter().copied());

        let left = Moments::from_values(xs[..7].iter().copied());
        let right = Moments::from_values(xs[7..].iter().copied());
        let combined_lr = left.plus(&right);
        let combined_rl = right.plus(&left);

        assert!(approx(combined_lr.mean(), whole.mean(), 1e-9));
        assert!(approx(combined_lr.variance(), whole.variance(), 1e-9));
        assert!(approx(combined_lr.mean(), combined_rl.mean(), 1e-9));
        assert!(approx(combined_lr.variance(), combined_rl.variance(), 1e-9));
        assert_eq!(combined_lr.count(), whole.count());
    }

    #[test]
    fn plus_with_empty_is_identity() {
        let m = Moments::from_values([1.0, 2.0, 3.0]);
        assert_eq!(m.plus(&Moments::zero()), m);
        assert_eq!(Moments::zero().plus(&m), m);
    }

    #[test]
    fn running_statistics_matches_batch() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut running = RunningStatistics::new();
        for x in xs {
            running.observe(x);
        }
        let batch = Moments::from_values(xs);
        assert!(approx(running.moments().mean(), batch.mean(), 1e-9));
        assert!(approx(running.moments().variance(), batch.variance(), 1e-9));
    }

    #[test]
    fn byte_round_trip_preserves_state() {
        let m = Moments::from_values([1.0, 2.0, 3.0, 4.0, 5.0]);
        let bytes = m.to_bytes();
        assert_eq!(bytes.len(), 40);
        let restored = Moments::from_bytes(&bytes).unwrap();
        assert_eq!(m, restored);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(Moments::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn skewness_zero_for_symmetric_distribution() {
        let xs = [-2.0, -1.0, 0.0, 1.0, 2.0];
        let m = Moments::from_values(xs);
        assert!(approx(m.skewness(), 0.0, 1e-9));
    }
}
