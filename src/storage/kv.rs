//! The `KvStore` contract: the external collaborator every storage
//! operation in this crate is built on top of.
//!
//! This trait captures only the operations the engine needs; it says
//! nothing about how a production implementation would talk to its backing
//! store. The reference implementation ([`crate::storage::MemoryKvStore`])
//! is in-process and exists solely so this crate's own test suite is
//! self-contained.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// A single published event payload, opaque to the store.
pub type EventPayload = Vec<u8>;

/// A key/value collaborator with TTL, pattern listing, pub/sub, and native
/// HyperLogLog support.
///
/// All methods are `async` because a production implementation talks to a
/// store over the network; the in-process reference implementation simply
/// never actually suspends.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Stores `value` at `key` with an expiry of `ttl_seconds` seconds from now.
    async fn setex(&self, key: &str, ttl_seconds: u64, value: Vec<u8>) -> Result<()>;

    /// Fetches the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes the given keys, returning how many actually existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Lists keys matching a glob-style `pattern` (`*` wildcard only).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Resets `key`'s TTL to `ttl_seconds` seconds from now. Returns `false`
    /// if the key does not exist.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool>;

    /// Publishes `payload` on `channel`. Delivery is best-effort: if no
    /// subscriber is listening, the publish is a no-op.
    async fn publish(&self, channel: &str, payload: EventPayload) -> Result<()>;

    /// Subscribes to `channel`, returning a receiver. Slow subscribers that
    /// fall behind the channel's bounded capacity observe a lag (dropped
    /// messages), never unbounded memory growth.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<EventPayload>>;

    /// Adds `value` to the native HyperLogLog register at `key`, creating it
    /// if absent. Returns `true` if the registers changed.
    async fn pfadd(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Returns the native HyperLogLog cardinality estimate at `key`, or `0`
    /// if the key does not exist.
    async fn pfcount(&self, key: &str) -> Result<u64>;

    /// Merges the native HyperLogLog registers at `srcs` into `dest`, returning
    /// `dest`'s resulting cardinality.
    async fn pfmerge(&self, dest: &str, srcs: &[String]) -> Result<u64>;
}
