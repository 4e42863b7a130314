//! Frequency estimation: approximate counts and heavy hitters over a stream.

mod count_min;
mod topk;

pub use count_min::CountMinSketch;
pub use topk::{HeavyHittersDetector, TopK, TopKEntry};
