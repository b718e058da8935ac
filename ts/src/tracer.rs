//! `ConversationTracer`: an append-only JSONL trace of every LLM
//! round-trip per task.
//!
//! Grounded on `coordinator/persistence.rs`'s `EventStore` append pattern,
//! narrowed to one file per task rather than one shared log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreResult;
use crate::ids::now_ms;

/// Well-known trace event names. Not a closed set — the trace accepts any
/// event name a caller passes — but these are the ones every component in
/// this workspace actually emits.
pub mod events {
    pub const USER_REQUEST: &str = "USER_REQUEST";
    pub const SYSTEM_RULES: &str = "SYSTEM_RULES";
    pub const CHUNKING_PLAN: &str = "CHUNKING_PLAN";
    pub const LLM_REQUEST: &str = "LLM_REQUEST";
    pub const LLM_RESPONSE: &str = "LLM_RESPONSE";
    pub const QUALITY_JUDGMENT: &str = "QUALITY_JUDGMENT";
    pub const REJECTION_DETAILS: &str = "REJECTION_DETAILS";
    pub const MODIFICATION_PROMPT: &str = "MODIFICATION_PROMPT";
    pub const ITERATION_END: &str = "ITERATION_END";
    pub const FINAL_SUMMARY: &str = "FINAL_SUMMARY";
    pub const REVIEW_LOOP_START: &str = "REVIEW_LOOP_START";
    pub const REVIEW_LOOP_END: &str = "REVIEW_LOOP_END";
    pub const REVIEW_ITERATION_START: &str = "REVIEW_ITERATION_START";
    pub const REVIEW_ITERATION_END: &str = "REVIEW_ITERATION_END";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: i64,
    pub event: String,
    pub session_id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TraceVerification {
    pub total_lines: usize,
    pub valid_lines: usize,
    pub invalid_lines: usize,
    pub event_counts: HashMap<String, usize>,
    pub total_iterations: u32,
}

pub struct ConversationTracer {
    traces_dir: PathBuf,
    open_files: Mutex<HashMap<String, PathBuf>>,
}

impl ConversationTracer {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            traces_dir: state_dir.into().join("traces"),
            open_files: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve (creating if necessary) the trace file path for a task. The
    /// filename is chosen once per task and reused for every subsequent
    /// `log` call so a task's trace lives in a single file.
    async fn path_for(&self, task_id: &str) -> StoreResult<PathBuf> {
        let mut open_files = self.open_files.lock().await;
        if let Some(path) = open_files.get(task_id) {
            return Ok(path.clone());
        }
        fs::create_dir_all(&self.traces_dir).await?;
        let path = self.traces_dir.join(format!("conversation-{task_id}-{}.jsonl", now_ms()));
        open_files.insert(task_id.to_string(), path.clone());
        Ok(path)
    }

    pub async fn log(
        &self,
        session_id: &str,
        task_id: &str,
        event: &str,
        data: serde_json::Value,
        iteration_index: Option<u32>,
        subtask_id: Option<String>,
    ) -> StoreResult<()> {
        let entry = TraceEntry {
            timestamp: now_ms(),
            event: event.to_string(),
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            iteration_index,
            subtask_id,
            data,
        };

        let path = self.path_for(task_id).await?;
        let line = serde_json::to_string(&entry)? + "\n";
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(%task_id, event, "ConversationTracer::log: appended");
        Ok(())
    }

    pub async fn trace_path(&self, task_id: &str) -> Option<PathBuf> {
        self.open_files.lock().await.get(task_id).cloned()
    }
}

/// Stream a trace file and report per-line validity, event kind counts, and
/// `total_iterations = max(iteration_index) + 1`.
pub async fn verify_conversation_trace(path: &Path) -> StoreResult<TraceVerification> {
    let content = fs::read_to_string(path).await?;
    let mut report = TraceVerification::default();
    let mut max_iteration: Option<u32> = None;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        report.total_lines += 1;
        match serde_json::from_str::<TraceEntry>(line) {
            Ok(entry) => {
                report.valid_lines += 1;
                *report.event_counts.entry(entry.event).or_insert(0) += 1;
                if let Some(idx) = entry.iteration_index {
                    max_iteration = Some(max_iteration.map_or(idx, |m| m.max(idx)));
                }
            }
            Err(_) => report.invalid_lines += 1,
        }
    }

    report.total_iterations = max_iteration.map(|m| m + 1).unwrap_or(0);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_log_then_verify() {
        let dir = tempdir().unwrap();
        let tracer = ConversationTracer::new(dir.path());

        tracer
            .log("s1", "t1", events::USER_REQUEST, serde_json::json!({"prompt": "fix it"}), None, None)
            .await
            .unwrap();
        tracer
            .log("s1", "t1", events::LLM_REQUEST, serde_json::json!({}), Some(0), None)
            .await
            .unwrap();
        tracer
            .log("s1", "t1", events::QUALITY_JUDGMENT, serde_json::json!({"verdict": "PASS"}), Some(0), None)
            .await
            .unwrap();
        tracer
            .log("s1", "t1", events::FINAL_SUMMARY, serde_json::json!({}), None, None)
            .await
            .unwrap();

        let path = tracer.trace_path("t1").await.unwrap();
        let report = verify_conversation_trace(&path).await.unwrap();
        assert_eq!(report.total_lines, 4);
        assert_eq!(report.valid_lines, 4);
        assert_eq!(report.invalid_lines, 0);
        assert_eq!(report.total_iterations, 1);
        assert_eq!(report.event_counts.get(events::LLM_REQUEST), Some(&1));
    }

    #[tokio::test]
    async fn test_verify_detects_invalid_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, b"not json\n{\"timestamp\":1}\n").await.unwrap();

        let report = verify_conversation_trace(&path).await.unwrap();
        assert_eq!(report.total_lines, 2);
        assert_eq!(report.invalid_lines, 2); // second line misses required fields
    }

    #[tokio::test]
    async fn test_all_entries_in_one_task_file() {
        let dir = tempdir().unwrap();
        let tracer = ConversationTracer::new(dir.path());
        tracer.log("s1", "t1", events::USER_REQUEST, serde_json::json!({}), None, None).await.unwrap();
        let first_path = tracer.trace_path("t1").await.unwrap();
        tracer.log("s1", "t1", events::FINAL_SUMMARY, serde_json::json!({}), None, None).await.unwrap();
        let second_path = tracer.trace_path("t1").await.unwrap();
        assert_eq!(first_path, second_path);
    }
}
