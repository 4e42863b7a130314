//! The single hash primitive every sketch in this crate builds on.
//!
//! Every probabilistic structure here (HyperLogLog register selection, Bloom
//! filter bit positions, Count-Min row hashing) is built from one seeded
//! 32-bit hash function, so the avalanche and independence properties live
//! in one place to reason about.

use std::hash::{Hash, Hasher};

/// MurmurHash3 32-bit variant, seeded.
///
/// Distinct seeds produce statistically independent outputs, which is what
/// lets Bloom filters derive `k` hash functions from a single base routine
/// and HyperLogLog separate its register index from its rank bits.
///
/// # Examples
///
/// ```
/// use compliance_sketch_engine::hash::h;
///
/// let a = h(0, b"user-123");
/// let b = h(1, b"user-123");
/// assert_ne!(a, b);
/// ```
pub fn h(seed: u32, bytes: &[u8]) -> u32 {
    let mut hash = seed;
    let len = bytes.len();

    let chunks = len / 4;
    for i in 0..chunks {
        let k = u32::from_le_bytes([
            bytes[i * 4],
            bytes[i * 4 + 1],
            bytes[i * 4 + 2],
            bytes[i * 4 + 3],
        ]);

        let k = k.wrapping_mul(0xcc9e2d51);
        let k = k.rotate_left(15);
        let k = k.wrapping_mul(0x1b873593);

        hash ^= k;
        hash = hash.rotate_left(13);
        hash = hash.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let remainder = len % 4;
    if remainder > 0 {
        let offset = chunks * 4;
        let mut k: u32 = 0;

        if remainder >= 3 {
            k ^= (bytes[offset + 2] as u32) << 16;
        }
        if remainder >= 2 {
            k ^= (bytes[offset + 1] as u32) << 8;
        }
        k ^= bytes[offset] as u32;

        k = k.wrapping_mul(0xcc9e2d51);
        k = k.rotate_left(15);
        k = k.wrapping_mul(0x1b873593);
        hash ^= k;
    }

    hash ^= len as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85ebca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2ae35);
    hash ^= hash >> 16;

    hash
}

/// Hashes any `Hash`-implementing value by funneling its byte representation
/// through [`h`]. Useful for sketches whose generic `add<T: Hash>` API
/// shouldn't force callers to pre-serialize to bytes.
pub fn hash_item<T: Hash + ?Sized>(seed: u32, value: &T) -> u32 {
    struct ByteSink(Vec<u8>);

    impl Hasher for ByteSink {
        fn finish(&self) -> u64 {
            0
        }
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
    }

    let mut sink = ByteSink(Vec::new());
    value.hash(&mut sink);
    h(seed, &sink.0)
}
