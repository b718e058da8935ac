//! `LimitManager`: per-task budgets and parallel-agent ceilings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Per-task budget configuration, validated the way
/// `scheduler::config::SchedulerConfig` validates its own ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub max_files: u32,
    pub max_tests: u32,
    pub max_seconds: u32,
    pub max_subagents: u32,
    pub max_executors: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_tests: 10,
            max_seconds: 300,
            max_subagents: 9,
            max_executors: 4,
        }
    }
}

impl LimitConfig {
    pub fn validate(&self) -> StoreResult<()> {
        let in_range = |v: u32, lo: u32, hi: u32, name: &str| -> StoreResult<()> {
            if (lo..=hi).contains(&v) {
                Ok(())
            } else {
                Err(StoreError::ResourceLimit(format!("{name}={v} out of range [{lo},{hi}]")))
            }
        };
        in_range(self.max_files, 1, 20, "max_files")?;
        in_range(self.max_tests, 1, 50, "max_tests")?;
        in_range(self.max_seconds, 30, 900, "max_seconds")?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct Usage {
    files_used: u32,
    tests_used: u32,
}

/// A single denied operation, returned alongside the fail-closed error.
#[derive(Debug, Clone, Serialize)]
pub struct LimitViolation {
    pub task_id: String,
    pub kind: &'static str,
    pub limit: u32,
    pub attempted: u32,
}

pub struct LimitManager {
    config: LimitConfig,
    usage: Mutex<HashMap<String, Usage>>,
}

impl LimitManager {
    pub fn new(config: LimitConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            usage: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// Consult the per-task file budget before a file operation; denies
    /// (fail-closed) rather than allowing an over-budget write.
    pub async fn check_file_op(&self, task_id: &str) -> Result<(), LimitViolation> {
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(task_id.to_string()).or_default();
        let attempted = entry.files_used + 1;
        if attempted > self.config.max_files {
            debug!(%task_id, attempted, limit = self.config.max_files, "LimitManager::check_file_op: denied");
            return Err(LimitViolation {
                task_id: task_id.to_string(),
                kind: "max_files",
                limit: self.config.max_files,
                attempted,
            });
        }
        entry.files_used = attempted;
        Ok(())
    }

    pub async fn check_test_exec(&self, task_id: &str) -> Result<(), LimitViolation> {
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(task_id.to_string()).or_default();
        let attempted = entry.tests_used + 1;
        if attempted > self.config.max_tests {
            return Err(LimitViolation {
                task_id: task_id.to_string(),
                kind: "max_tests",
                limit: self.config.max_tests,
                attempted,
            });
        }
        entry.tests_used = attempted;
        Ok(())
    }

    pub fn check_time(&self, task_id: &str, elapsed_seconds: u32) -> Result<(), LimitViolation> {
        if elapsed_seconds > self.config.max_seconds {
            return Err(LimitViolation {
                task_id: task_id.to_string(),
                kind: "max_seconds",
                limit: self.config.max_seconds,
                attempted: elapsed_seconds,
            });
        }
        Ok(())
    }

    /// Remaining file-budget capacity, clamped to the requested total.
    pub async fn suggest_chunk_size(&self, task_id: &str, total_files: u32) -> u32 {
        let usage = self.usage.lock().await;
        let used = usage.get(task_id).map(|u| u.files_used).unwrap_or(0);
        let remaining = self.config.max_files.saturating_sub(used);
        remaining.min(total_files)
    }

    pub async fn reset_task(&self, task_id: &str) {
        self.usage.lock().await.remove(task_id);
    }
}
