//! Runtime configuration for the engine: sketch parameter defaults and
//! concurrency/batching knobs.
//!
//! Only values the engine itself consumes live here; transport-level
//! settings (host/port/CORS) belong to whatever adapter embeds the engine.
//! Per-window retention is fixed by the bucketing scheme (see
//! [`crate::window::TimeWindow::retention`]) rather than configurable.

use serde::{Deserialize, Serialize};

/// Engine-wide configuration, deserializable from JSON/TOML/env via `serde`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target relative error for HyperLogLog cardinality estimates, used to
    /// pick a default precision when callers don't specify one explicitly.
    pub hll_error_rate: f64,

    /// Default Bloom filter capacity (expected number of distinct items).
    pub bloom_capacity: u64,

    /// Default Bloom filter false-positive rate.
    pub bloom_error_rate: f64,

    /// Count-Min Sketch width (number of counters per row).
    pub cms_width: usize,

    /// Count-Min Sketch depth (number of independent hash rows).
    pub cms_depth: usize,

    /// Default Top-K capacity.
    pub topk_capacity: usize,

    /// Maximum number of events accepted in a single batch request.
    pub max_batch_size: usize,

    /// Number of stripes in the per-key serialization mutex map.
    pub storage_stripes: usize,

    /// Capacity of the broadcast channel backing event pub/sub.
    pub event_stream_capacity: usize,

    /// Maximum number of retries the aggregation façade attempts for a query
    /// that fails with a transient storage error, before giving up and
    /// surfacing the error to the caller.
    pub max_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hll_error_rate: 0.02,
            bloom_capacity: 1_000_000,
            bloom_error_rate: 0.001,
            cms_width: 1_000,
            cms_depth: 5,
            topk_capacity: 100,
            max_batch_size: 1_000,
            storage_stripes: 64,
            event_stream_capacity: 1_024,
            max_retry_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// The HyperLogLog precision implied by [`EngineConfig::hll_error_rate`],
    /// using the standard `precision = ceil(log2((1.04 / error_rate)^2))`
    /// relation, clamped to this crate's supported `[4, 16]` range.
    pub fn hll_precision(&self) -> u8 {
        let raw = (1.04 / self.hll_error_rate).powi(2).log2().ceil();
        let precision = raw as i32;
        precision.clamp(4, 16) as u8
    }
}
