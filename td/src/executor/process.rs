use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::{verify_files, AuthStatus, ExecuteRequest, ExecuteResult, ExecuteStatus, Executor, ExecutorError, ExecutorResult};

/// Invokes a configured binary (default `claude`) as a subprocess per
/// request, the way `WorktreeManager` shells out to `git`.
pub struct ProcessExecutor {
    binary: String,
    timeout_ms: u64,
}

impl ProcessExecutor {
    pub fn new(binary: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout_ms,
        }
    }

    /// Pull modified-file paths out of `git status --porcelain`, the way
    /// `LoopEngine::get_changed_files` parses worktree status.
    async fn changed_files(&self, working_dir: &std::path::Path) -> Vec<String> {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(working_dir)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| line.get(3..).map(str::trim).map(str::to_string))
                .filter(|p| !p.is_empty())
                .collect(),
            Ok(output) => {
                warn!(stderr = %String::from_utf8_lossy(&output.stderr), "ProcessExecutor::changed_files: git status failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "ProcessExecutor::changed_files: failed to invoke git");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteResult> {
        if !request.working_dir.exists() {
            return Err(ExecutorError::WorkingDirMissing(request.working_dir));
        }

        let start = Instant::now();
        debug!(task_id = %request.id, binary = %self.binary, "ProcessExecutor::execute: spawning");

        let run = Command::new(&self.binary)
            .arg("--print")
            .arg(&request.prompt)
            .current_dir(&request.working_dir)
            .output();

        let output = match timeout(Duration::from_millis(self.timeout_ms), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecutorError::SpawnFailed(e.to_string())),
            Err(_) => {
                return Ok(ExecuteResult {
                    executed: false,
                    output: String::new(),
                    files_modified: Vec::new(),
                    verified_files: Vec::new(),
                    unverified_files: Vec::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    status: ExecuteStatus::Timeout,
                    cwd: request.working_dir.display().to_string(),
                })
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let files_modified = self.changed_files(&request.working_dir).await;
        let verified_files = verify_files(&request.working_dir, &files_modified);

        let status = if !output.status.success() {
            ExecuteStatus::Error
        } else if stdout.trim().is_empty() {
            ExecuteStatus::Incomplete
        } else {
            ExecuteStatus::Complete
        };

        debug!(task_id = %request.id, ?status, duration_ms, "ProcessExecutor::execute: finished");

        Ok(ExecuteResult {
            executed: true,
            output: stdout,
            files_modified,
            verified_files,
            unverified_files: Vec::new(),
            duration_ms,
            status,
            cwd: request.working_dir.display().to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        which(&self.binary)
    }

    async fn check_auth_status(&self) -> AuthStatus {
        let output = Command::new(&self.binary).arg("--version").output().await;
        match output {
            Ok(output) if output.status.success() => AuthStatus { ok: true, reason: None },
            Ok(output) => AuthStatus {
                ok: false,
                reason: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            },
            Err(e) => AuthStatus {
                ok: false,
                reason: Some(e.to_string()),
            },
        }
    }
}

fn which(binary: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else { return false };
    std::env::split_paths(&path_var).any(|dir| path_exists(dir.join(binary)))
}

fn path_exists(path: PathBuf) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_working_dir_rejected() {
        let executor = ProcessExecutor::new("claude", 1_000);
        let request = ExecuteRequest {
            id: "t1".to_string(),
            prompt: "do something".to_string(),
            working_dir: PathBuf::from("/nonexistent/path/xyz"),
        };
        let result = executor.execute(request).await;
        assert!(matches!(result, Err(ExecutorError::WorkingDirMissing(_))));
    }

    #[tokio::test]
    async fn test_is_available_false_for_bogus_binary() {
        let executor = ProcessExecutor::new("definitely-not-a-real-binary-xyz", 1_000);
        assert!(!executor.is_available().await);
    }
}
