//! Membership testing: "have I seen this before?" without storing the set.

mod bloom;

pub use bloom::{BloomFilter, ScalableBloomFilter};
