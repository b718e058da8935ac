//! The task (queue item) domain type and its status machine.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ids::now_ms;

/// Lifecycle states for a `Task`.
///
/// ```text
/// QUEUED --claim--> RUNNING --success--> COMPLETE
///                    |        --fail----> ERROR
///                    |        --question-> AWAITING_RESPONSE --reply--> QUEUED
///                    '--cancel--> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Complete,
    Error,
    AwaitingResponse,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are not subject to further pipeline processing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::AwaitingResponse | Self::Cancelled)
    }

    /// Whether `self -> to` is a legal transition per the state machine.
    pub fn can_transition_to(self, to: Self) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Running, Complete)
                | (Running, Error)
                | (Running, AwaitingResponse)
                | (AwaitingResponse, Queued)
                | (Queued, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::AwaitingResponse => "AWAITING_RESPONSE",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Implementation,
    ReadInfo,
    Report,
    LightEdit,
    ConfigCiChange,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Implementation
    }
}

impl TaskType {
    /// Lowercase snake_case tag used as the id-generation type component,
    /// e.g. `a1b2c3-implementation-fix-typo-in-readme`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::ReadInfo => "read_info",
            Self::Report => "report",
            Self::LightEdit => "light_edit",
            Self::ConfigCiChange => "config_ci_change",
        }
    }
}

/// A question posed back to the user, with the context it arose from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub context: String,
}

/// One entry in a task's ordered progress-event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub name: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(name: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            timestamp: now_ms(),
            data,
        }
    }
}

/// The durable task record (`QueueItem` in the wider design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub namespace: String,
    pub task_id: String,
    pub task_group_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub prompt: String,
    pub task_type: TaskType,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
    #[serde(default)]
    pub events: Vec<ProgressEvent>,
    #[serde(default)]
    pub attempt: u32,
}

impl Task {
    pub fn new(
        namespace: impl Into<String>,
        task_id: String,
        task_group_id: impl Into<String>,
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        let now = now_ms();
        Self {
            namespace: namespace.into(),
            task_id,
            task_group_id: task_group_id.into(),
            session_id: session_id.into(),
            status: TaskStatus::Queued,
            prompt: prompt.into(),
            task_type,
            created_at: now,
            updated_at: now,
            output: None,
            error_message: None,
            clarification: None,
            events: Vec::new(),
            attempt: 0,
        }
    }

    /// Apply a status transition in place, validating it against the state
    /// machine and bumping `updated_at`. Does not persist anything.
    pub fn transition_to(&mut self, to: TaskStatus) -> Result<(), StoreError> {
        if !self.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now_ms();
        Ok(())
    }

    /// Append a progress event, advancing `updated_at` only if the event's
    /// timestamp is later than the current value.
    pub fn append_event(&mut self, event: ProgressEvent) {
        if event.timestamp > self.updated_at {
            self.updated_at = event.timestamp;
        }
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_queued() {
        let t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::Implementation);
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.created_at, t.updated_at);
    }

    #[test]
    fn test_legal_transitions() {
        let mut t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::Implementation);
        assert!(t.transition_to(TaskStatus::Running).is_ok());
        assert!(t.transition_to(TaskStatus::Complete).is_ok());
        assert!(t.status.is_terminal());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::Implementation);
        assert!(t.transition_to(TaskStatus::Complete).is_err());
    }

    #[test]
    fn test_awaiting_response_round_trip() {
        let mut t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::ReadInfo);
        t.transition_to(TaskStatus::Running).unwrap();
        t.transition_to(TaskStatus::AwaitingResponse).unwrap();
        assert!(t.transition_to(TaskStatus::Queued).is_ok());
    }

    #[test]
    fn test_append_event_advances_updated_at() {
        let mut t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::Implementation);
        let before = t.updated_at;
        let ev = ProgressEvent {
            name: "STARTED".into(),
            timestamp: before + 1000,
            data: None,
        };
        t.append_event(ev);
        assert_eq!(t.updated_at, before + 1000);
    }

    #[test]
    fn test_serde_round_trip() {
        let t = Task::new("ns", "id-1".into(), "g1", "s1", "do thing", TaskType::Report);
        let json = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, t.task_id);
        assert_eq!(back.status, t.status);
    }
}
