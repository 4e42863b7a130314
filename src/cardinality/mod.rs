//! Cardinality estimation: counting distinct items in sub-linear space.

mod hyperloglog;

pub use hyperloglog::HyperLogLog;
