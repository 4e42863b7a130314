//! `EventProcessor`: fans each ingested event out to the sketches it feeds.

use std::sync::Arc;

use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::{Event, EventType};
use crate::storage::{KvStore, SketchStorage};
use crate::window::{SketchKind, TimeWindow};

/// Bloom and Top-K defaults the processor uses when a key has never been
/// written before. Cardinality sketches use the KV collaborator's native
/// path and don't need these.
#[derive(Debug, Clone, Copy)]
pub struct SketchDefaults {
    /// Default Bloom filter capacity.
    pub bloom_capacity: u64,
    /// Default Bloom filter error rate.
    pub bloom_error_rate: f64,
    /// Default Top-K capacity.
    pub topk_capacity: usize,
}

impl Default for SketchDefaults {
    fn default() -> Self {
        SketchDefaults { bloom_capacity: 1_000_000, bloom_error_rate: 0.001, topk_capacity: 100 }
    }
}

impl From<&EngineConfig> for SketchDefaults {
    fn from(config: &EngineConfig) -> Self {
        SketchDefaults {
            bloom_capacity: config.bloom_capacity,
            bloom_error_rate: config.bloom_error_rate,
            topk_capacity: config.topk_capacity,
        }
    }
}

/// Fans events out to the sketches their fields feed, and publishes each
/// accepted event onto the shared events channel.
pub struct EventProcessor<K: KvStore> {
    storage: Arc<SketchStorage<K>>,
    defaults: SketchDefaults,
    max_batch_size: usize,
}

impl<K: KvStore> EventProcessor<K> {
    /// Builds a processor over `storage` using `defaults` for freshly
    /// created Bloom/Top-K sketches and [`EngineConfig::default`]'s batch
    /// bound.
    pub fn new(storage: Arc<SketchStorage<K>>, defaults: SketchDefaults) -> Self {
        EventProcessor { storage, defaults, max_batch_size: EngineConfig::default().max_batch_size }
    }

    /// Builds a processor whose sketch defaults and batch bound all come
    /// from `config`.
    pub fn from_config(storage: Arc<SketchStorage<K>>, config: &EngineConfig) -> Self {
        EventProcessor {
            storage,
            defaults: SketchDefaults::from(config),
            max_batch_size: config.max_batch_size,
        }
    }

    /// Applies every update `event` implies, then publishes it. A failure
    /// updating one sketch is logged and does not prevent the others from
    /// being applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] only if the event itself is
    /// malformed (an empty `system`); individual sketch-update failures are
    /// contained and logged instead of propagated.
    pub async fn process_event(&self, event: &Event) -> Result<()> {
        if event.system.is_empty() {
            return Err(EngineError::Validation("event system must not be empty".to_string()));
        }

        self.update_hll(event).await;
        self.update_bloom(event).await;
        self.update_topk(event).await;
        self.publish(event).await;

        Ok(())
    }

    /// Applies [`EventProcessor::process_event`] to every event in `events`,
    /// in order, returning `(ok_count, total)`. A malformed event counts
    /// against `total` but does not abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] only when the batch itself is
    /// malformed: more events than the configured batch bound.
    pub async fn process_batch(&self, events: &[Event]) -> Result<(usize, usize)> {
        if events.len() > self.max_batch_size {
            return Err(EngineError::Validation(format!(
                "batch of {} events exceeds the {}-event limit",
                events.len(),
                self.max_batch_size
            )));
        }
        let mut ok_count = 0;
        for event in events {
            if self.process_event(event).await.is_ok() {
                ok_count += 1;
            }
        }
        Ok((ok_count, events.len()))
    }

    async fn update_hll(&self, event: &Event) {
        let ts = event.timestamp;
        let system = event.system.as_str();

        if let Some(user_id) = &event.user_id {
            self.add_hll_checked("users", system, user_id.as_bytes(), ts, &[TimeWindow::Hour, TimeWindow::Day, TimeWindow::Week])
                .await;
        }
        if let Some(session_id) = &event.session_id {
            self.add_hll_checked("sessions", system, session_id.as_bytes(), ts, &[TimeWindow::Hour, TimeWindow::Day])
                .await;
        }
        if let Some(ip) = &event.ip_address {
            self.add_hll_checked("ips", system, ip.as_bytes(), ts, &[TimeWindow::Hour, TimeWindow::Day]).await;
        }
    }

    async fn add_hll_checked(&self, metric: &str, system: &str, value: &[u8], ts: chrono::DateTime<chrono::Utc>, windows: &[TimeWindow]) {
        if let Err(error) = self.storage.add_hll(metric, system, value, ts, windows).await {
            warn!(metric, system, error = %error, "hll update failed");
        }
    }

    async fn update_bloom(&self, event: &Event) {
        let ts = event.timestamp;
        let system = event.system.as_str();

        if let Some(user_id) = &event.user_id {
            for window in [TimeWindow::Day, TimeWindow::Week] {
                let key = crate::window::sketch_key(SketchKind::Bloom, "user_activity", system, window, ts);
                if let Err(error) = self
                    .storage
                    .add_bloom(&key, user_id.as_bytes(), window.retention().num_seconds() as u64, self.defaults.bloom_capacity, self.defaults.bloom_error_rate)
                    .await
                {
                    warn!(metric = "user_activity", system, window = %window, error = %error, "bloom update failed");
                }
            }
        }

        if let Some(ip) = &event.ip_address {
            let window = TimeWindow::Day;
            let key = crate::window::sketch_key(SketchKind::Bloom, "ip_activity", system, window, ts);
            if let Err(error) = self
                .storage
                .add_bloom(&key, ip.as_bytes(), window.retention().num_seconds() as u64, self.defaults.bloom_capacity, self.defaults.bloom_error_rate)
                .await
            {
                warn!(metric = "ip_activity", system, window = %window, error = %error, "bloom update failed");
            }
        }
    }

    async fn update_topk(&self, event: &Event) {
        let ts = event.timestamp;
        let system = event.system.as_str();
        let window = TimeWindow::Hour;

        if let Some(user_id) = &event.user_id {
            self.add_topk_checked("active_users", system, window, ts, user_id).await;
        }
        if let Some(ip) = &event.ip_address {
            self.add_topk_checked("active_ips", system, window, ts, ip).await;
        }
        self.add_topk_checked("event_types", system, window, ts, event.event_type.as_str()).await;
        if let Some(endpoint) = &event.endpoint {
            self.add_topk_checked("endpoints", system, window, ts, endpoint).await;
        }
        if event.event_type == EventType::SecurityEvent {
            if let Some(ip) = &event.ip_address {
                self.add_topk_checked("failed_logins", system, window, ts, ip).await;
            }
        }
    }

    async fn add_topk_checked(&self, metric: &str, system: &str, window: TimeWindow, ts: chrono::DateTime<chrono::Utc>, item: &str) {
        let key = crate::window::sketch_key(SketchKind::TopK, metric, system, window, ts);
        if let Err(error) = self
            .storage
            .add_topk(&key, item, 1, window.retention().num_seconds() as u64, self.defaults.topk_capacity)
            .await
        {
            warn!(metric, system, window = %window, error = %error, "topk update failed");
        }
    }

    async fn publish(&self, event: &Event) {
        match serde_json::to_vec(event) {
            Ok(payload) => {
                if let Err(error) = self.storage.publish_event(payload).await {
                    warn!(error = %error, "event publish failed");
                }
            }
            Err(error) => warn!(error = %error, "event serialization failed"),
        }
    }
}
