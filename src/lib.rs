//! compliance-sketch-engine: privacy-preserving, sub-linear-memory event
//! aggregation over mergeable probabilistic sketches.
//!
//! Raw events are never retained past ingestion. Each event updates a set of
//! time-bucketed sketches (cardinality, membership, frequency, moments); the
//! monoid structure on each sketch type is what lets hourly buckets merge
//! into daily, and daily into weekly, without ever re-reading the events that
//! produced them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregation;
pub mod cardinality;
pub mod config;
pub mod error;
pub mod event;
pub mod frequency;
pub mod hash;
pub mod membership;
pub mod moments;
pub mod monoid;
pub mod processor;
pub mod retry;
pub mod storage;
pub mod window;

pub use aggregation::{
    ActivityCheck, AggregationFacade, CompositeAxis, CompositeBloomRollup, DistinctCount, Percentiles, QuantileSketch, SlaCheck,
    SystemSummary,
};
pub use cardinality::HyperLogLog;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use event::{BatchEventRequest, Event, EventType};
pub use frequency::{CountMinSketch, HeavyHittersDetector, TopK, TopKEntry};
pub use membership::{BloomFilter, ScalableBloomFilter};
pub use moments::{Moments, RunningStatistics};
pub use monoid::{
    sum, sum_option, BloomIntersectionMonoid, BloomUnionMonoid, CmsMonoid, HllMonoid, Monoid, MomentsMonoid, TopKMonoid,
};
pub use processor::{EventProcessor, SketchDefaults};
pub use retry::RetryPolicy;
pub use storage::{EventPayload, EventSubscription, KvStore, MemoryKvStore, SketchStorage, SubscriptionStats};
pub use window::{SketchKind, TimeWindow};
