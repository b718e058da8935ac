//! `ReviewLoop`: up to `max_iterations` rounds of invoke-executor,
//! apply-gates, and (on rejection) re-prompt, modeled on
//! `td::loop::engine::LoopEngine::run`'s bounded while-loop over a typed
//! `IterationResult`.

pub mod gates;
pub mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use taskstore::{trace_events, ConversationTracer};

use crate::executor::{ExecuteRequest, ExecuteResult, Executor, ExecutorError};
use gates::{all_passed, GateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewVerdict {
    Pass,
    Reject,
    Retry,
    Escalate,
}

#[derive(Debug, Serialize)]
pub struct ReviewOutcome {
    pub verdict: ReviewVerdict,
    pub iterations: u32,
    pub last_result: Option<ExecuteResult>,
    pub last_gates: Vec<GateResult>,
}

pub struct ReviewLoopConfig {
    pub max_iterations: u32,
}

impl Default for ReviewLoopConfig {
    fn default() -> Self {
        Self { max_iterations: 5 }
    }
}

pub struct ReviewLoop {
    executor: Arc<dyn Executor>,
    tracer: Arc<ConversationTracer>,
    config: ReviewLoopConfig,
}

impl ReviewLoop {
    pub fn new(executor: Arc<dyn Executor>, tracer: Arc<ConversationTracer>, config: ReviewLoopConfig) -> Self {
        Self { executor, tracer, config }
    }

    pub async fn run(&self, session_id: &str, task_id: &str, prompt: &str, working_dir: &PathBuf) -> ReviewOutcome {
        self.tracer
            .log(session_id, task_id, trace_events::REVIEW_LOOP_START, serde_json::json!({"prompt": prompt}), None, None)
            .await
            .ok();

        let mut current_prompt = prompt.to_string();
        let mut last_result: Option<ExecuteResult> = None;
        let mut last_gates: Vec<GateResult> = Vec::new();

        for iteration in 0..self.config.max_iterations {
            debug!(%task_id, iteration, "ReviewLoop::run: iteration start");
            self.tracer
                .log(session_id, task_id, trace_events::REVIEW_ITERATION_START, serde_json::json!({}), Some(iteration), None)
                .await
                .ok();

            let request = ExecuteRequest {
                id: task_id.to_string(),
                prompt: current_prompt.clone(),
                working_dir: working_dir.clone(),
            };

            let result = match self.executor.execute(request).await {
                Ok(result) => result,
                Err(ExecutorError::Timeout(_)) => {
                    warn!(%task_id, iteration, "ReviewLoop::run: executor timed out, retrying without new prompt");
                    self.tracer
                        .log(session_id, task_id, trace_events::REVIEW_ITERATION_END, serde_json::json!({"verdict": "RETRY"}), Some(iteration), None)
                        .await
                        .ok();
                    continue;
                }
                Err(e) => {
                    warn!(%task_id, iteration, error = %e, "ReviewLoop::run: executor error");
                    self.tracer
                        .log(session_id, task_id, trace_events::REVIEW_ITERATION_END, serde_json::json!({"verdict": "ESCALATE", "error": e.to_string()}), Some(iteration), None)
                        .await
                        .ok();
                    return ReviewOutcome {
                        verdict: ReviewVerdict::Escalate,
                        iterations: iteration + 1,
                        last_result,
                        last_gates,
                    };
                }
            };

            let gates = gates::run_all_gates(&result);
            self.tracer
                .log(session_id, task_id, trace_events::QUALITY_JUDGMENT, serde_json::json!({"gates": gates}), Some(iteration), None)
                .await
                .ok();

            if all_passed(&gates) {
                info!(%task_id, iteration, "ReviewLoop::run: review passed");
                self.tracer
                    .log(session_id, task_id, trace_events::REVIEW_ITERATION_END, serde_json::json!({"verdict": "PASS"}), Some(iteration), None)
                    .await
                    .ok();
                return ReviewOutcome {
                    verdict: ReviewVerdict::Pass,
                    iterations: iteration + 1,
                    last_result: Some(result),
                    last_gates: gates,
                };
            }

            if result.output.trim().is_empty() {
                debug!(%task_id, iteration, "ReviewLoop::run: empty output, retrying without new prompt");
                last_gates = gates;
                last_result = Some(result);
                self.tracer
                    .log(session_id, task_id, trace_events::REVIEW_ITERATION_END, serde_json::json!({"verdict": "RETRY"}), Some(iteration), None)
                    .await
                    .ok();
                continue;
            }

            self.tracer
                .log(session_id, task_id, trace_events::REJECTION_DETAILS, serde_json::json!({"gates": gates}), Some(iteration), None)
                .await
                .ok();

            let modification_prompt = prompt::build_modification_prompt(prompt, &result.output, &gates);
            self.tracer
                .log(session_id, task_id, trace_events::MODIFICATION_PROMPT, serde_json::json!({"prompt": modification_prompt}), Some(iteration), None)
                .await
                .ok();

            current_prompt = modification_prompt;
            self.tracer
                .log(session_id, task_id, trace_events::REVIEW_ITERATION_END, serde_json::json!({"verdict": "REJECT"}), Some(iteration), None)
                .await
                .ok();

            last_gates = gates;
            last_result = Some(result);
        }

        warn!(%task_id, max_iterations = self.config.max_iterations, "ReviewLoop::run: exhausted iterations");
        self.tracer
            .log(session_id, task_id, trace_events::REVIEW_LOOP_END, serde_json::json!({"verdict": "ESCALATE"}), None, None)
            .await
            .ok();

        ReviewOutcome {
            verdict: ReviewVerdict::Escalate,
            iterations: self.config.max_iterations,
            last_result,
            last_gates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecuteStatus, FakeExecutor};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_pass_on_first_iteration() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        let response = FakeExecutor::complete(dir.path(), "done", &["a.rs"]);
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(vec![response]));
        let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
        let review_loop = ReviewLoop::new(executor, tracer, ReviewLoopConfig::default());

        let outcome = review_loop.run("s1", "t1", "add a.rs", &dir.path().to_path_buf()).await;
        assert_eq!(outcome.verdict, ReviewVerdict::Pass);
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_reject_then_pass() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        let mut rejected = FakeExecutor::complete(dir.path(), "// TODO: finish", &["a.rs"]);
        rejected.status = ExecuteStatus::Incomplete;
        let passed = FakeExecutor::complete(dir.path(), "done", &["a.rs"]);
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(vec![rejected, passed]));
        let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
        let review_loop = ReviewLoop::new(executor, tracer, ReviewLoopConfig::default());

        let outcome = review_loop.run("s1", "t1", "add a.rs", &dir.path().to_path_buf()).await;
        assert_eq!(outcome.verdict, ReviewVerdict::Pass);
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn test_escalate_after_max_iterations() {
        let dir = tempdir().unwrap();
        let mut bad = FakeExecutor::complete(dir.path(), "// TODO: finish", &[]);
        bad.status = ExecuteStatus::Incomplete;
        let responses: Vec<_> = (0..5).map(|_| bad.clone()).collect();
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
        let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
        let review_loop = ReviewLoop::new(executor, tracer, ReviewLoopConfig { max_iterations: 5 });

        let outcome = review_loop.run("s1", "t1", "add a.rs", &dir.path().to_path_buf()).await;
        assert_eq!(outcome.verdict, ReviewVerdict::Escalate);
        assert_eq!(outcome.iterations, 5);
    }
}
