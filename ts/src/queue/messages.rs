//! Commands and replies for the `QueueStore` actor.

use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::task::{ProgressEvent, Task, TaskStatus, TaskType};

pub type QueueResponse<T> = Result<T, StoreError>;

/// Snapshot counters for a namespace, used by the CLI and HTTP `/api/health`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueMetrics {
    pub queued: usize,
    pub running: usize,
    pub awaiting_response: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
}

/// Outcome of `recoverStaleTasks`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryStats {
    pub tasks_requeued: usize,
}

/// Commands sent to the `QueueStore` actor over its `mpsc` channel.
#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        namespace: String,
        session_id: String,
        task_group_id: String,
        prompt: String,
        task_id: Option<String>,
        task_type: Option<TaskType>,
        reply: oneshot::Sender<QueueResponse<Task>>,
    },
    Claim {
        namespace: String,
        reply: oneshot::Sender<QueueResponse<Option<Task>>>,
    },
    UpdateStatus {
        namespace: String,
        task_id: String,
        new_status: TaskStatus,
        error_message: Option<String>,
        output: Option<String>,
        reply: oneshot::Sender<QueueResponse<()>>,
    },
    SetAwaitingResponse {
        namespace: String,
        task_id: String,
        question: String,
        context: String,
        output: Option<String>,
        reply: oneshot::Sender<QueueResponse<()>>,
    },
    AppendEvent {
        namespace: String,
        task_id: String,
        event: ProgressEvent,
        reply: oneshot::Sender<QueueResponse<bool>>,
    },
    GetItem {
        namespace: String,
        task_id: String,
        reply: oneshot::Sender<QueueResponse<Option<Task>>>,
    },
    GetBySession {
        namespace: String,
        session_id: String,
        reply: oneshot::Sender<QueueResponse<Vec<Task>>>,
    },
    GetByStatus {
        namespace: String,
        status: TaskStatus,
        reply: oneshot::Sender<QueueResponse<Vec<Task>>>,
    },
    GetByTaskGroup {
        namespace: String,
        task_group_id: String,
        reply: oneshot::Sender<QueueResponse<Vec<Task>>>,
    },
    GetAllTaskGroups {
        namespace: String,
        reply: oneshot::Sender<QueueResponse<Vec<String>>>,
    },
    RecoverStaleTasks {
        namespace: String,
        max_age_ms: i64,
        reply: oneshot::Sender<QueueResponse<RecoveryStats>>,
    },
    Metrics {
        namespace: String,
        reply: oneshot::Sender<QueueResponse<QueueMetrics>>,
    },
    Shutdown,
}
