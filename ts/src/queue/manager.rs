//! `QueueStore`: the durable task queue actor.
//!
//! A single `rusqlite` connection is owned by a dedicated actor task;
//! callers talk to it exclusively through [`QueueStore`]'s cloneable handle
//! over an `mpsc` channel, mirroring the `StateManager` actor shape this
//! component is grounded on. Because commands are processed one at a time,
//! `claim()` trivially satisfies the at-most-one-claimer invariant for every
//! poller sharing a handle; the conditional `UPDATE ... WHERE status =
//! 'QUEUED'` guards against any out-of-process writer touching the same
//! database file.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::ids::{generate_id, now_ms};
use crate::namespace::validate_namespace;
use crate::task::{ProgressEvent, Task, TaskStatus, TaskType};

use super::messages::{QueueCommand, QueueMetrics, QueueResponse, RecoveryStats};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    namespace TEXT NOT NULL,
    task_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    task_group_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (namespace, task_id)
);
CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(namespace, session_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(namespace, status);
CREATE INDEX IF NOT EXISTS idx_tasks_group ON tasks(namespace, task_group_id);
";

/// Handle to the queue actor. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct QueueStore {
    tx: mpsc::Sender<QueueCommand>,
}

impl QueueStore {
    /// Spawn the actor, opening (or creating) `<state_dir>/queue.sqlite3`.
    pub fn spawn(state_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(state_dir)?;
        let db_path = state_dir.join("queue.sqlite3");
        debug!(?db_path, "QueueStore::spawn: opening database");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_actor(conn, rx));
        Ok(Self { tx })
    }

    /// Spawn a purely in-memory store, used by tests.
    pub fn spawn_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_actor(conn, rx));
        Ok(Self { tx })
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<QueueResponse<T>>) -> QueueCommand) -> StoreResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| StoreError::ChannelClosed)?;
        rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    pub async fn enqueue(
        &self,
        namespace: &str,
        session_id: &str,
        task_group_id: &str,
        prompt: &str,
        task_id: Option<String>,
        task_type: Option<TaskType>,
    ) -> StoreResult<Task> {
        self.call(|reply| QueueCommand::Enqueue {
            namespace: namespace.to_string(),
            session_id: session_id.to_string(),
            task_group_id: task_group_id.to_string(),
            prompt: prompt.to_string(),
            task_id,
            task_type,
            reply,
        })
        .await
    }

    pub async fn claim(&self, namespace: &str) -> StoreResult<Option<Task>> {
        self.call(|reply| QueueCommand::Claim {
            namespace: namespace.to_string(),
            reply,
        })
        .await
    }

    pub async fn update_status(
        &self,
        namespace: &str,
        task_id: &str,
        new_status: TaskStatus,
        error_message: Option<String>,
        output: Option<String>,
    ) -> StoreResult<()> {
        self.call(|reply| QueueCommand::UpdateStatus {
            namespace: namespace.to_string(),
            task_id: task_id.to_string(),
            new_status,
            error_message,
            output,
            reply,
        })
        .await
    }

    pub async fn set_awaiting_response(
        &self,
        namespace: &str,
        task_id: &str,
        question: &str,
        context: &str,
        output: Option<String>,
    ) -> StoreResult<()> {
        self.call(|reply| QueueCommand::SetAwaitingResponse {
            namespace: namespace.to_string(),
            task_id: task_id.to_string(),
            question: question.to_string(),
            context: context.to_string(),
            output,
            reply,
        })
        .await
    }

    pub async fn append_event(&self, namespace: &str, task_id: &str, event: ProgressEvent) -> StoreResult<bool> {
        self.call(|reply| QueueCommand::AppendEvent {
            namespace: namespace.to_string(),
            task_id: task_id.to_string(),
            event,
            reply,
        })
        .await
    }

    pub async fn get_item(&self, namespace: &str, task_id: &str) -> StoreResult<Option<Task>> {
        self.call(|reply| QueueCommand::GetItem {
            namespace: namespace.to_string(),
            task_id: task_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_by_session(&self, namespace: &str, session_id: &str) -> StoreResult<Vec<Task>> {
        self.call(|reply| QueueCommand::GetBySession {
            namespace: namespace.to_string(),
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_by_status(&self, namespace: &str, status: TaskStatus) -> StoreResult<Vec<Task>> {
        self.call(|reply| QueueCommand::GetByStatus {
            namespace: namespace.to_string(),
            status,
            reply,
        })
        .await
    }

    pub async fn get_by_task_group(&self, namespace: &str, task_group_id: &str) -> StoreResult<Vec<Task>> {
        self.call(|reply| QueueCommand::GetByTaskGroup {
            namespace: namespace.to_string(),
            task_group_id: task_group_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_all_task_groups(&self, namespace: &str) -> StoreResult<Vec<String>> {
        self.call(|reply| QueueCommand::GetAllTaskGroups {
            namespace: namespace.to_string(),
            reply,
        })
        .await
    }

    pub async fn recover_stale_tasks(&self, namespace: &str, max_age_ms: i64) -> StoreResult<RecoveryStats> {
        self.call(|reply| QueueCommand::RecoverStaleTasks {
            namespace: namespace.to_string(),
            max_age_ms,
            reply,
        })
        .await
    }

    pub async fn metrics(&self, namespace: &str) -> StoreResult<QueueMetrics> {
        self.call(|reply| QueueCommand::Metrics {
            namespace: namespace.to_string(),
            reply,
        })
        .await
    }

    pub async fn shutdown(&self) -> StoreResult<()> {
        self.tx.send(QueueCommand::Shutdown).await.map_err(|_| StoreError::ChannelClosed)
    }
}

async fn run_actor(mut conn: Connection, mut rx: mpsc::Receiver<QueueCommand>) {
    debug!("QueueStore actor: started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            QueueCommand::Shutdown => {
                debug!("QueueStore actor: shutdown received");
                break;
            }
            cmd => handle(&mut conn, cmd),
        }
    }
    debug!("QueueStore actor: stopped");
}

fn handle(conn: &mut Connection, cmd: QueueCommand) {
    match cmd {
        QueueCommand::Enqueue {
            namespace,
            session_id,
            task_group_id,
            prompt,
            task_id,
            task_type,
            reply,
        } => {
            let _ = reply.send(enqueue(conn, &namespace, &session_id, &task_group_id, &prompt, task_id, task_type));
        }
        QueueCommand::Claim { namespace, reply } => {
            let _ = reply.send(claim(conn, &namespace));
        }
        QueueCommand::UpdateStatus {
            namespace,
            task_id,
            new_status,
            error_message,
            output,
            reply,
        } => {
            let _ = reply.send(update_status(conn, &namespace, &task_id, new_status, error_message, output));
        }
        QueueCommand::SetAwaitingResponse {
            namespace,
            task_id,
            question,
            context,
            output,
            reply,
        } => {
            let _ = reply.send(set_awaiting_response(conn, &namespace, &task_id, &question, &context, output));
        }
        QueueCommand::AppendEvent {
            namespace,
            task_id,
            event,
            reply,
        } => {
            let _ = reply.send(append_event(conn, &namespace, &task_id, event));
        }
        QueueCommand::GetItem { namespace, task_id, reply } => {
            let _ = reply.send(load_task(conn, &namespace, &task_id));
        }
        QueueCommand::GetBySession {
            namespace,
            session_id,
            reply,
        } => {
            let _ = reply.send(query_tasks(conn, "session_id", &namespace, &session_id));
        }
        QueueCommand::GetByStatus { namespace, status, reply } => {
            let _ = reply.send(query_tasks(conn, "status", &namespace, &status.to_string()));
        }
        QueueCommand::GetByTaskGroup {
            namespace,
            task_group_id,
            reply,
        } => {
            let _ = reply.send(query_tasks(conn, "task_group_id", &namespace, &task_group_id));
        }
        QueueCommand::GetAllTaskGroups { namespace, reply } => {
            let _ = reply.send(all_task_groups(conn, &namespace));
        }
        QueueCommand::RecoverStaleTasks {
            namespace,
            max_age_ms,
            reply,
        } => {
            let _ = reply.send(recover_stale_tasks(conn, &namespace, max_age_ms));
        }
        QueueCommand::Metrics { namespace, reply } => {
            let _ = reply.send(metrics(conn, &namespace));
        }
        QueueCommand::Shutdown => unreachable!("handled by caller"),
    }
}

fn persist(conn: &Connection, task: &Task) -> StoreResult<()> {
    let data = serde_json::to_string(task)?;
    conn.execute(
        "INSERT INTO tasks (namespace, task_id, session_id, task_group_id, status, created_at, updated_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(namespace, task_id) DO UPDATE SET
            session_id=excluded.session_id, task_group_id=excluded.task_group_id,
            status=excluded.status, updated_at=excluded.updated_at, data=excluded.data",
        params![
            task.namespace,
            task.task_id,
            task.session_id,
            task.task_group_id,
            task.status.to_string(),
            task.created_at,
            task.updated_at,
            data
        ],
    )?;
    Ok(())
}

fn decode(data: String) -> StoreResult<Task> {
    Ok(serde_json::from_str(&data)?)
}

fn load_task(conn: &Connection, namespace: &str, task_id: &str) -> StoreResult<Option<Task>> {
    validate_namespace(namespace)?;
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM tasks WHERE namespace=?1 AND task_id=?2",
            params![namespace, task_id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(decode).transpose()
}

fn enqueue(
    conn: &Connection,
    namespace: &str,
    session_id: &str,
    task_group_id: &str,
    prompt: &str,
    task_id: Option<String>,
    task_type: Option<TaskType>,
) -> StoreResult<Task> {
    validate_namespace(namespace)?;
    let task_type = task_type.unwrap_or_default();
    let task_id = task_id.unwrap_or_else(|| generate_id(task_type.tag(), prompt));
    let task = Task::new(namespace, task_id, task_group_id, session_id, prompt, task_type);
    debug!(task_id = %task.task_id, %namespace, "QueueStore::enqueue");
    persist(conn, &task)?;
    Ok(task)
}

fn claim(conn: &Connection, namespace: &str) -> StoreResult<Option<Task>> {
    validate_namespace(namespace)?;
    let candidate: Option<String> = conn
        .query_row(
            "SELECT task_id FROM tasks WHERE namespace=?1 AND status='QUEUED' ORDER BY created_at ASC LIMIT 1",
            params![namespace],
            |row| row.get(0),
        )
        .optional()?;

    let Some(task_id) = candidate else {
        return Ok(None);
    };

    let rows = conn.execute(
        "UPDATE tasks SET status='RUNNING' WHERE namespace=?1 AND task_id=?2 AND status='QUEUED'",
        params![namespace, task_id],
    )?;
    if rows == 0 {
        debug!(%task_id, "QueueStore::claim: lost race to another claimer");
        return Ok(None);
    }

    let mut task = load_task(conn, namespace, &task_id)?.ok_or_else(|| StoreError::TaskNotFound(task_id.clone()))?;
    task.status = TaskStatus::Running;
    task.updated_at = now_ms();
    task.attempt += 1;
    persist(conn, &task)?;
    info!(task_id = %task.task_id, "QueueStore::claim: claimed task");
    Ok(Some(task))
}

fn update_status(
    conn: &Connection,
    namespace: &str,
    task_id: &str,
    new_status: TaskStatus,
    error_message: Option<String>,
    output: Option<String>,
) -> StoreResult<()> {
    validate_namespace(namespace)?;
    let mut task = load_task(conn, namespace, task_id)?.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
    task.transition_to(new_status)?;
    if error_message.is_some() {
        task.error_message = error_message;
    }
    if output.is_some() {
        task.output = output;
    }
    persist(conn, &task)?;
    Ok(())
}

fn set_awaiting_response(
    conn: &Connection,
    namespace: &str,
    task_id: &str,
    question: &str,
    context: &str,
    output: Option<String>,
) -> StoreResult<()> {
    validate_namespace(namespace)?;
    let mut task = load_task(conn, namespace, task_id)?.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
    task.transition_to(TaskStatus::AwaitingResponse)?;
    task.clarification = Some(crate::task::Clarification {
        question: question.to_string(),
        context: context.to_string(),
    });
    if output.is_some() {
        task.output = output;
    }
    persist(conn, &task)?;
    Ok(())
}

fn append_event(conn: &Connection, namespace: &str, task_id: &str, event: ProgressEvent) -> StoreResult<bool> {
    validate_namespace(namespace)?;
    let Some(mut task) = load_task(conn, namespace, task_id)? else {
        return Ok(false);
    };
    task.append_event(event);
    persist(conn, &task)?;
    Ok(true)
}

fn query_tasks(conn: &Connection, column: &str, namespace: &str, value: &str) -> StoreResult<Vec<Task>> {
    validate_namespace(namespace)?;
    let sql = format!("SELECT data FROM tasks WHERE namespace=?1 AND {column}=?2 ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![namespace, value], |row| row.get::<_, String>(0))?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(decode(row?)?);
    }
    Ok(tasks)
}

fn all_task_groups(conn: &Connection, namespace: &str) -> StoreResult<Vec<String>> {
    validate_namespace(namespace)?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT task_group_id FROM tasks WHERE namespace=?1 ORDER BY task_group_id ASC",
    )?;
    let rows = stmt.query_map(params![namespace], |row| row.get::<_, String>(0))?;
    let mut groups = Vec::new();
    for row in rows {
        groups.push(row?);
    }
    Ok(groups)
}

fn recover_stale_tasks(conn: &Connection, namespace: &str, max_age_ms: i64) -> StoreResult<RecoveryStats> {
    validate_namespace(namespace)?;
    let cutoff = now_ms() - max_age_ms;
    let mut stmt = conn.prepare(
        "SELECT task_id FROM tasks WHERE namespace=?1 AND status='RUNNING' AND updated_at < ?2",
    )?;
    let stale_ids: Vec<String> = stmt
        .query_map(params![namespace, cutoff], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut stats = RecoveryStats::default();
    for task_id in stale_ids {
        let Some(mut task) = load_task(conn, namespace, &task_id)? else {
            continue;
        };
        warn!(%task_id, "QueueStore::recover_stale_tasks: requeuing crashed task");
        task.status = TaskStatus::Queued;
        task.updated_at = now_ms();
        persist(conn, &task)?;
        stats.tasks_requeued += 1;
    }
    if stats.tasks_requeued > 0 {
        info!(count = stats.tasks_requeued, %namespace, "QueueStore::recover_stale_tasks: recovered stale tasks");
    }
    Ok(stats)
}

fn metrics(conn: &Connection, namespace: &str) -> StoreResult<QueueMetrics> {
    validate_namespace(namespace)?;
    let mut m = QueueMetrics::default();
    for status in [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::AwaitingResponse,
        TaskStatus::Complete,
        TaskStatus::Error,
        TaskStatus::Cancelled,
    ] {
        let count: usize = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE namespace=?1 AND status=?2",
            params![namespace, status.to_string()],
            |row| row.get(0),
        )?;
        match status {
            TaskStatus::Queued => m.queued = count,
            TaskStatus::Running => m.running = count,
            TaskStatus::AwaitingResponse => m.awaiting_response = count,
            TaskStatus::Complete => m.completed = count,
            TaskStatus::Error => m.error = count,
            TaskStatus::Cancelled => m.cancelled = count,
        }
    }
    Ok(m)
}

/// Default directory name for a namespace's dedicated sqlite file, used by
/// callers that want to lay out `<state_dir>/<namespace>/queue.sqlite3`
/// instead of sharing one store across namespaces.
pub fn namespace_state_dir(state_dir: &Path, namespace: &str) -> PathBuf {
    state_dir.join(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_then_claim_round_trip() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let enqueued = store.enqueue("ns", "s1", "g1", "Fix typo", None, None).await.unwrap();
        let (claimed, ok) = match store.claim("ns").await.unwrap() {
            Some(t) => (t, true),
            None => (enqueued.clone(), false),
        };
        assert!(ok);
        assert_eq!(claimed.task_id, enqueued.task_id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.prompt, "Fix typo");
    }

    #[tokio::test]
    async fn test_claim_empty_namespace() {
        let store = QueueStore::spawn_in_memory().unwrap();
        assert!(store.claim("ns").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_oldest_first() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let a = store.enqueue("ns", "s1", "g1", "first", None, None).await.unwrap();
        let _b = store.enqueue("ns", "s1", "g1", "second", None, None).await.unwrap();
        let claimed = store.claim("ns").await.unwrap().unwrap();
        assert_eq!(claimed.task_id, a.task_id);
    }

    #[tokio::test]
    async fn test_claim_does_not_cross_namespaces() {
        let store = QueueStore::spawn_in_memory().unwrap();
        store.enqueue("ns-a", "s1", "g1", "task", None, None).await.unwrap();
        assert!(store.claim("ns-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_rejects_illegal_transition() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let t = store.enqueue("ns", "s1", "g1", "task", None, None).await.unwrap();
        let result = store.update_status("ns", &t.task_id, TaskStatus::Complete, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_status_happy_path() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let t = store.enqueue("ns", "s1", "g1", "task", None, None).await.unwrap();
        store.claim("ns").await.unwrap();
        store
            .update_status("ns", &t.task_id, TaskStatus::Complete, None, Some("done".into()))
            .await
            .unwrap();
        let reloaded = store.get_item("ns", &t.task_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Complete);
        assert_eq!(reloaded.output.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_set_awaiting_response_preserves_output() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let t = store.enqueue("ns", "s1", "g1", "task", None, None).await.unwrap();
        store.claim("ns").await.unwrap();
        store
            .set_awaiting_response("ns", &t.task_id, "which file?", "ambiguous request", Some("partial".into()))
            .await
            .unwrap();
        let reloaded = store.get_item("ns", &t.task_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::AwaitingResponse);
        assert_eq!(reloaded.clarification.unwrap().question, "which file?");
        assert_eq!(reloaded.output.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_append_event_unknown_task_returns_false() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let ok = store
            .append_event("ns", "missing", ProgressEvent::new("X", None))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_recover_stale_tasks() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let t = store.enqueue("ns", "s1", "g1", "task", None, None).await.unwrap();
        store.claim("ns").await.unwrap();
        // simulate a crash: force updated_at far enough in the past via recover with 0 max_age
        let stats = store.recover_stale_tasks("ns", -1).await.unwrap();
        assert_eq!(stats.tasks_requeued, 1);
        let reloaded = store.get_item("ns", &t.task_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_get_by_status_ordered_by_created_at() {
        let store = QueueStore::spawn_in_memory().unwrap();
        store.enqueue("ns", "s1", "g1", "a", None, None).await.unwrap();
        store.enqueue("ns", "s1", "g1", "b", None, None).await.unwrap();
        let queued = store.get_by_status("ns", TaskStatus::Queued).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].created_at <= queued[1].created_at);
    }

    #[tokio::test]
    async fn test_metrics_counts() {
        let store = QueueStore::spawn_in_memory().unwrap();
        store.enqueue("ns", "s1", "g1", "a", None, None).await.unwrap();
        store.enqueue("ns", "s1", "g1", "b", None, None).await.unwrap();
        store.claim("ns").await.unwrap();
        let m = store.metrics("ns").await.unwrap();
        assert_eq!(m.queued, 1);
        assert_eq!(m.running, 1);
    }

    #[tokio::test]
    async fn test_invalid_namespace_rejected() {
        let store = QueueStore::spawn_in_memory().unwrap();
        let result = store.enqueue("BadNS", "s1", "g1", "task", None, None).await;
        assert!(result.is_err());
    }
}
