//! The `Executor` seam: one trait object invoked by the review loop and
//! chunker alike, swappable between a real subprocess and a scripted test
//! double, the way `llm::create_client` returns `Arc<dyn LlmClient>`.

mod fake;
mod process;

pub use fake::FakeExecutor;
pub use process::ProcessExecutor;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor binary not found on PATH: {0}")]
    BinaryNotFound(String),

    #[error("executor process failed to start: {0}")]
    SpawnFailed(String),

    #[error("executor timed out after {0}ms")]
    Timeout(u64),

    #[error("executor working directory does not exist: {0}")]
    WorkingDirMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub id: String,
    pub prompt: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecuteStatus {
    Complete,
    Incomplete,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedFile {
    pub path: String,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub executed: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub verified_files: Vec<VerifiedFile>,
    pub unverified_files: Vec<String>,
    pub duration_ms: u64,
    pub status: ExecuteStatus,
    pub cwd: String,
}

#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub ok: bool,
    pub reason: Option<String>,
}

/// A backend capable of carrying out one executor invocation and reporting
/// on its own availability, analogous to `llm::LlmClient`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> ExecutorResult<ExecuteResult>;

    async fn is_available(&self) -> bool;

    async fn check_auth_status(&self) -> AuthStatus;
}

/// Stat every path in `candidate_files` relative to `working_dir`, splitting
/// them into `verified_files` (with existence) and paths that could not be
/// resolved at all (`unverified_files` stays empty here; reserved for
/// callers that pass paths outside `working_dir`).
pub(crate) fn verify_files(working_dir: &std::path::Path, candidate_files: &[String]) -> Vec<VerifiedFile> {
    candidate_files
        .iter()
        .map(|f| VerifiedFile {
            exists: working_dir.join(f).exists(),
            path: f.clone(),
        })
        .collect()
}
