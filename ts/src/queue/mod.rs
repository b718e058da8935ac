//! The durable task queue: single-claim semantics, namespace isolation, and
//! crash recovery.

mod manager;
mod messages;

pub use manager::{namespace_state_dir, QueueStore};
pub use messages::{QueueMetrics, RecoveryStats};
