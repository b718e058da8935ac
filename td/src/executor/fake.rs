use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{verify_files, AuthStatus, ExecuteRequest, ExecuteResult, ExecuteStatus, Executor, ExecutorResult};

/// A scripted `Executor` for pipeline tests: each call pops the next
/// queued response rather than spawning a subprocess.
pub struct FakeExecutor {
    responses: Mutex<VecDeque<ExecuteResult>>,
    available: bool,
}

impl FakeExecutor {
    pub fn new(responses: Vec<ExecuteResult>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            available: false,
        }
    }

    /// Build a `COMPLETE` response that reports `files` as both modified
    /// and verified-present in `working_dir`.
    pub fn complete(working_dir: &std::path::Path, output: &str, files: &[&str]) -> ExecuteResult {
        let files_modified: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        ExecuteResult {
            executed: true,
            output: output.to_string(),
            verified_files: verify_files(working_dir, &files_modified),
            files_modified,
            unverified_files: Vec::new(),
            duration_ms: 10,
            status: ExecuteStatus::Complete,
            cwd: working_dir.display().to_string(),
        }
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteResult> {
        let mut responses = self.responses.lock().await;
        Ok(responses.pop_front().unwrap_or(ExecuteResult {
            executed: false,
            output: String::new(),
            files_modified: Vec::new(),
            verified_files: Vec::new(),
            unverified_files: Vec::new(),
            duration_ms: 0,
            status: ExecuteStatus::Error,
            cwd: request.working_dir.display().to_string(),
        }))
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn check_auth_status(&self) -> AuthStatus {
        AuthStatus {
            ok: self.available,
            reason: if self.available { None } else { Some("fake executor unavailable".to_string()) },
        }
    }
}
