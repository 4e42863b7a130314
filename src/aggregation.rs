//! The aggregation façade: the typed query surface over time-bucketed
//! sketches, plus the rollup primitives it's built from.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::frequency::TopKEntry;
use crate::membership::BloomFilter;
use crate::moments::Moments;
use crate::monoid::{sum, sum_option, BloomUnionMonoid, MomentsMonoid};
use crate::retry::RetryPolicy;
use crate::storage::{KvStore, SketchStorage};
use crate::window::{recent_buckets, SketchKind, TimeWindow};

/// Result of a distinct-count query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistinctCount {
    /// Estimated distinct count.
    pub count: u64,
    /// Nominal relative accuracy of the underlying HLL, e.g. `0.02` for 2%.
    pub accuracy: f64,
}

/// Result of an activity-check query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityCheck {
    /// Whether the subject appears to have been active.
    pub accessed: bool,
    /// Confidence: `0.99` if `accessed`, `1.0` if not (no false negatives).
    pub probability: f64,
}

/// Percentile values for a metric, keyed by the requested percentile (as a
/// fraction in `[0,1]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Percentiles {
    /// Requested percentile -> estimated value.
    pub values: HashMap<String, f64>,
}

/// Whether a metric meets a percentile-based SLA threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlaCheck {
    /// The percentile's estimated value.
    pub value: f64,
    /// `true` if `value` satisfies the threshold.
    pub status: bool,
    /// Signed distance from the threshold (positive means within budget).
    pub margin: f64,
}

/// A bundled snapshot of a system's key metrics, for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    /// System this summary describes.
    pub system: String,
    /// Hourly distinct-user count.
    pub hourly_users: u64,
    /// Daily distinct-user count.
    pub daily_users: u64,
    /// Top event types in the last hour.
    pub top_event_types: Vec<TopKEntry>,
}

/// Which axis (or axes) of a `{system -> {bucket -> sketch}}` grid a
/// composite rollup collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeAxis {
    /// Collapse across systems, keeping one sketch per bucket label.
    Systems,
    /// Collapse across buckets, keeping one sketch per system.
    Buckets,
    /// Collapse across both axes into a single sketch.
    Both,
}

/// Result of a composite Bloom rollup; shape depends on the requested
/// [`CompositeAxis`].
#[derive(Debug, Clone)]
pub enum CompositeBloomRollup {
    /// Keyed by bucket label, each filter merged across the requested systems.
    PerBucket(HashMap<String, BloomFilter>),
    /// Keyed by system, each filter merged across the requested time range.
    PerSystem(HashMap<String, BloomFilter>),
    /// Merged across both systems and the time range into one filter.
    Merged(Option<BloomFilter>),
}

/// A pluggable quantile estimator; percentile/SLA queries are wired through
/// this trait since this crate specifies no concrete quantile sketch (see
/// Non-goals).
pub trait QuantileSketch: Send + Sync {
    /// Estimated value at `percentile` (a fraction in `[0,1]`).
    fn quantile(&self, percentile: f64) -> f64;
}

/// The aggregation façade: time-range, multi-system, and composite rollups
/// over sketch storage, plus the typed query functions built on top of them.
pub struct AggregationFacade<K: KvStore> {
    storage: Arc<SketchStorage<K>>,
    hll_accuracy: f64,
    quantile_sketches: HashMap<String, Arc<dyn QuantileSketch>>,
    retry_policy: RetryPolicy,
}

impl<K: KvStore> AggregationFacade<K> {
    /// Builds a façade over `storage`. `hll_accuracy` is surfaced verbatim
    /// in [`DistinctCount::accuracy`]. Query retries use
    /// [`EngineConfig::default`]'s `max_retry_attempts`; use
    /// [`AggregationFacade::with_max_retry_attempts`] to override it.
    pub fn new(storage: Arc<SketchStorage<K>>, hll_accuracy: f64) -> Self {
        AggregationFacade {
            storage,
            hll_accuracy,
            quantile_sketches: HashMap::new(),
            retry_policy: RetryPolicy::new(EngineConfig::default().max_retry_attempts),
        }
    }

    /// Overrides the number of times a query retries a transient storage
    /// error before giving up.
    pub fn with_max_retry_attempts(mut self, max_retry_attempts: u32) -> Self {
        self.retry_policy = RetryPolicy::new(max_retry_attempts);
        self
    }

    /// Registers a quantile sketch for `metric`, enabling
    /// [`AggregationFacade::percentiles`]/[`AggregationFacade::sla_check`]
    /// for it.
    pub fn register_quantile_sketch(&mut self, metric: impl Into<String>, sketch: Arc<dyn QuantileSketch>) {
        self.quantile_sketches.insert(metric.into(), sketch);
    }

    // -- Rollup primitives ----------------------------------------------

    /// Native-merges the HLL buckets for `(metric, system)` across `[start,
    /// end]` at granularity `window` and returns the merged cardinality.
    ///
    /// The merge lands in a deterministic scratch key (`hll:rollup:...`)
    /// inside the KV collaborator; because an HLL merge is an elementwise
    /// register maximum, re-running the same rollup into that key is
    /// idempotent.
    pub async fn rollup_hll_time_range(
        &self,
        metric: &str,
        system: &str,
        window: TimeWindow,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let mut src_keys = Vec::new();
        let mut ts = start;
        while ts <= end {
            src_keys.push(crate::window::sketch_key(SketchKind::Hll, metric, system, window, ts));
            ts += window.duration();
        }
        let dest = format!(
            "hll:rollup:{metric}:{system}:{window}:{}..{}",
            window.bucket(start),
            window.bucket(end)
        );
        self.storage.merge_hll_native(&src_keys, &dest).await
    }

    /// Native-merges the HLL buckets for `(metric, window, ts)` across
    /// `systems` and returns the merged cardinality.
    pub async fn rollup_hll_multi_system(
        &self,
        metric: &str,
        systems: &[String],
        window: TimeWindow,
        ts: DateTime<Utc>,
    ) -> Result<u64> {
        let src_keys: Vec<String> = systems
            .iter()
            .map(|system| crate::window::sketch_key(SketchKind::Hll, metric, system, window, ts))
            .collect();
        let dest = format!("hll:rollup:{metric}:{}:{window}:{}", systems.join("+"), window.bucket(ts));
        self.storage.merge_hll_native(&src_keys, &dest).await
    }

    /// Native-merges the last `count` HLL buckets of `window` granularity
    /// ending at `end` and returns the merged cardinality: a rolling-window
    /// rollup.
    pub async fn rollup_hll_rolling(
        &self,
        metric: &str,
        system: &str,
        window: TimeWindow,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<u64> {
        let src_keys: Vec<String> = recent_buckets(end, window, count)
            .into_iter()
            .map(|label| format!("{}:{metric}:{system}:{window}:{label}", SketchKind::Hll))
            .collect();
        let dest = format!("hll:rollup:{metric}:{system}:{window}:last{count}@{}", window.bucket(end));
        self.storage.merge_hll_native(&src_keys, &dest).await
    }

    /// Folds a batch of optionally-missing Bloom buckets through the union
    /// monoid, deriving the monoid's `(capacity, error_rate)` from the first
    /// present filter; any two filters built from the same
    /// `(capacity, error_rate)` pair share the same `(m, k)` and are
    /// guaranteed union-compatible.
    fn fold_bloom_union(buckets: &[Option<BloomFilter>]) -> Result<Option<BloomFilter>> {
        let params = buckets.iter().flatten().next().map(|f| (f.capacity(), f.error_rate()));
        match params {
            None => Ok(None),
            Some((capacity, error_rate)) => {
                let monoid = BloomUnionMonoid::new(capacity, error_rate)?;
                Ok(sum_option(&monoid, buckets))
            }
        }
    }

    /// Folds Bloom filter buckets for `(metric, system)` across `[start,
    /// end]` at granularity `window` into one filter.
    pub async fn rollup_bloom_time_range(
        &self,
        metric: &str,
        system: &str,
        window: TimeWindow,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<BloomFilter>> {
        let mut buckets = Vec::new();
        let mut ts = start;
        while ts <= end {
            let key = crate::window::sketch_key(SketchKind::Bloom, metric, system, window, ts);
            buckets.push(match self.storage.get_raw(&key).await? {
                Some(bytes) => Some(BloomFilter::from_bytes(&bytes)?),
                None => None,
            });
            ts += window.duration();
        }
        Self::fold_bloom_union(&buckets)
    }

    /// Folds Moments buckets for `(metric, system)` across `[start, end]` at
    /// granularity `window` into one accumulator.
    pub async fn rollup_moments_time_range(
        &self,
        metric: &str,
        system: &str,
        window: TimeWindow,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Moments> {
        let mut values = Vec::new();
        let mut ts = start;
        while ts <= end {
            let key = crate::window::sketch_key(SketchKind::Moments, metric, system, window, ts);
            if let Some(bytes) = self.storage.get_raw(&key).await? {
                values.push(Moments::from_bytes(&bytes)?);
            }
            ts += window.duration();
        }
        Ok(sum(&MomentsMonoid, &values))
    }

    /// Folds Bloom filters for `(metric, window, ts)` across `systems` into
    /// one filter: a multi-system rollup at a single bucket.
    pub async fn rollup_bloom_multi_system(
        &self,
        metric: &str,
        systems: &[String],
        window: TimeWindow,
        ts: DateTime<Utc>,
    ) -> Result<Option<BloomFilter>> {
        let mut buckets = Vec::new();
        for system in systems {
            let key = crate::window::sketch_key(SketchKind::Bloom, metric, system, window, ts);
            buckets.push(match self.storage.get_raw(&key).await? {
                Some(bytes) => Some(BloomFilter::from_bytes(&bytes)?),
                None => None,
            });
        }
        Self::fold_bloom_union(&buckets)
    }

    /// Folds a `{system -> {bucket -> sketch}}` grid of Bloom filters for
    /// `metric` over `systems` and `[start, end]`, collapsing along
    /// `axis`: a composite rollup.
    pub async fn rollup_bloom_composite(
        &self,
        metric: &str,
        systems: &[String],
        window: TimeWindow,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        axis: CompositeAxis,
    ) -> Result<CompositeBloomRollup> {
        match axis {
            CompositeAxis::Buckets => {
                let mut per_system = HashMap::new();
                for system in systems {
                    if let Some(filter) = self.rollup_bloom_time_range(metric, system, window, start, end).await? {
                        per_system.insert(system.clone(), filter);
                    }
                }
                Ok(CompositeBloomRollup::PerSystem(per_system))
            }
            CompositeAxis::Systems => {
                let mut per_bucket = HashMap::new();
                let mut ts = start;
                while ts <= end {
                    if let Some(filter) = self.rollup_bloom_multi_system(metric, systems, window, ts).await? {
                        per_bucket.insert(window.bucket(ts), filter);
                    }
                    ts += window.duration();
                }
                Ok(CompositeBloomRollup::PerBucket(per_bucket))
            }
            CompositeAxis::Both => {
                let mut buckets = Vec::new();
                let mut ts = start;
                while ts <= end {
                    buckets.push(self.rollup_bloom_multi_system(metric, systems, window, ts).await?);
                    ts += window.duration();
                }
                Ok(CompositeBloomRollup::Merged(Self::fold_bloom_union(&buckets)?))
            }
        }
    }

    /// Aggregates the last `count` buckets of `window` granularity ending at
    /// `end`, for Moments: a rolling-window rollup.
    pub async fn rollup_moments_rolling(&self, metric: &str, system: &str, window: TimeWindow, end: DateTime<Utc>, count: usize) -> Result<Moments> {
        let mut values = Vec::new();
        for label in recent_buckets(end, window, count) {
            let key = format!("{}:{metric}:{system}:{window}:{label}", SketchKind::Moments);
            if let Some(bytes) = self.storage.get_raw(&key).await? {
                values.push(Moments::from_bytes(&bytes)?);
            }
        }
        Ok(sum(&MomentsMonoid, &values))
    }

    // -- Query surface ----------------------------------------------------

    /// Estimated distinct count for `(metric, system, window)` at `ts`
    /// (defaulting to now), via the native HLL path.
    pub async fn distinct(&self, metric: &str, system: &str, window: TimeWindow, ts: Option<DateTime<Utc>>) -> Result<DistinctCount> {
        let ts = ts.unwrap_or_else(Utc::now);
        let count = self.retry_policy.run(|| self.storage.hll_cardinality(metric, system, window, ts)).await?;
        Ok(DistinctCount { count, accuracy: self.hll_accuracy })
    }

    /// Checks whether `user_id` appears in `(metric, system, window)`'s
    /// activity Bloom filter at `ts`.
    pub async fn activity_check(&self, user_id: &str, system: &str, window: TimeWindow, ts: Option<DateTime<Utc>>) -> Result<ActivityCheck> {
        let ts = ts.unwrap_or_else(Utc::now);
        let key = crate::window::sketch_key(SketchKind::Bloom, "user_activity", system, window, ts);
        let accessed = self.retry_policy.run(|| self.storage.check_bloom(&key, user_id.as_bytes())).await?;
        Ok(ActivityCheck { accessed, probability: if accessed { 0.99 } else { 1.0 } })
    }

    /// The top `k` tracked items for `(metric, system, window)` at `ts`.
    pub async fn top_k(&self, metric: &str, system: &str, k: usize, window: TimeWindow, ts: Option<DateTime<Utc>>) -> Result<Vec<TopKEntry>> {
        let ts = ts.unwrap_or_else(Utc::now);
        let key = crate::window::sketch_key(SketchKind::TopK, metric, system, window, ts);
        self.retry_policy.run(|| self.storage.get_topk(&key, k)).await
    }

    /// Estimated values at `percentiles` for `metric`, via the
    /// caller-registered [`QuantileSketch`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no quantile sketch has been
    /// registered for `metric`.
    pub fn percentiles(&self, metric: &str, percentiles: &[f64]) -> Result<Percentiles> {
        let sketch = self
            .quantile_sketches
            .get(metric)
            .ok_or_else(|| EngineError::NotFound(format!("no quantile sketch registered for metric {metric:?}")))?;

        let values = percentiles.iter().map(|&p| (format!("p{}", (p * 100.0) as u32), sketch.quantile(p))).collect();
        Ok(Percentiles { values })
    }

    /// Checks `metric`'s `percentile` value against `threshold`.
    pub fn sla_check(&self, metric: &str, percentile: f64, threshold: f64) -> Result<SlaCheck> {
        let sketch = self
            .quantile_sketches
            .get(metric)
            .ok_or_else(|| EngineError::NotFound(format!("no quantile sketch registered for metric {metric:?}")))?;
        let value = sketch.quantile(percentile);
        Ok(SlaCheck { value, status: value <= threshold, margin: threshold - value })
    }

    /// A bundled snapshot of `system`'s headline metrics.
    pub async fn summary(&self, system: &str, ts: Option<DateTime<Utc>>) -> Result<SystemSummary> {
        let ts = ts.unwrap_or_else(Utc::now);
        let hourly_users = self.retry_policy.run(|| self.storage.hll_cardinality("users", system, TimeWindow::Hour, ts)).await?;
        let daily_users = self.retry_policy.run(|| self.storage.hll_cardinality("users", system, TimeWindow::Day, ts)).await?;
        let topk_key = crate::window::sketch_key(SketchKind::TopK, "event_types", system, TimeWindow::Hour, ts);
        let top_event_types = self.retry_policy.run(|| self.storage.get_topk(&topk_key, 10)).await?;

        Ok(SystemSummary { system: system.to_string(), hourly_users, daily_users, top_event_types })
    }
}
