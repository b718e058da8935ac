//! `taskstore`: the durable-state layer for orchestrated code-change
//! sessions — a single-claim task queue, a write-once evidence store, a
//! file lock manager, per-task resource budgets, and a conversation
//! tracer. Each component owns its own concurrency primitive (an actor
//! over a channel for the queue, a guarded `Mutex` for the rest) and is
//! safe to share across tasks via `Arc`/`Clone`.

pub mod error;
pub mod evidence;
pub mod ids;
pub mod limits;
pub mod locks;
pub mod namespace;
pub mod queue;
pub mod task;
pub mod tracer;

pub use error::{StoreError, StoreResult};
pub use evidence::{compute_hash, Artifact, EvidenceIndex, EvidenceIndexEntry, EvidenceInventory, EvidenceRecord, EvidenceStore};
pub use ids::{derive_namespace, generate_id, now_ms, slugify};
pub use limits::{LimitConfig, LimitManager, LimitViolation};
pub use locks::{Lock, LockManager, LockType};
pub use namespace::validate_namespace;
pub use queue::{namespace_state_dir, QueueMetrics, QueueStore, RecoveryStats};
pub use task::{Clarification, ProgressEvent, Task, TaskStatus, TaskType};
pub use tracer::{events as trace_events, verify_conversation_trace, ConversationTracer, TraceEntry, TraceVerification};
