//! The storage layer: the `KvStore` contract, an in-process reference
//! implementation, and the load-modify-store wrapper sketches are persisted
//! through.

mod kv;
mod memory;
mod sketch_storage;

pub use kv::{EventPayload, KvStore};
pub use memory::MemoryKvStore;
pub use sketch_storage::{EventSubscription, SketchStorage, SubscriptionStats};
