//! `TaskChunker`: turns an `ExecutionPlan` with `should_chunk=true` into a
//! set of `SubtaskDefinition`s and runs them either in parallel (bounded by
//! a semaphore) or sequentially in dependency order, delegating retries to
//! `RetryManager` and aggregating results at the end.

mod aggregate;

pub use aggregate::{AggregatedResult, AggregatedStatus};

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use taskstore::trace_events;
use taskstore::ConversationTracer;

use crate::executor::Executor;
use crate::planner::ExecutionPlan;
use crate::review::{ReviewLoop, ReviewLoopConfig, ReviewVerdict};
use crate::retry::{classify, RetryDecision, RetryManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Retrying,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskDefinition {
    pub id: String,
    pub prompt: String,
    pub execution_order: usize,
    pub depends_on: Vec<usize>,
    pub status: SubtaskStatus,
}

fn build_subtasks(plan: &ExecutionPlan, parent_task_id: &str) -> Vec<SubtaskDefinition> {
    let prompts = &plan.chunking_recommendation.subtask_prompts;
    let depends_on_for = |idx: usize| -> Vec<usize> {
        plan.dependency_analysis
            .as_ref()
            .map(|a| a.edges.iter().filter(|e| e.to == idx).map(|e| e.from).collect())
            .unwrap_or_default()
    };

    prompts
        .iter()
        .enumerate()
        .map(|(idx, prompt)| SubtaskDefinition {
            id: format!("{parent_task_id}-sub-{}", idx + 1),
            prompt: prompt.clone(),
            execution_order: plan
                .dependency_analysis
                .as_ref()
                .map(|a| a.topological_order.iter().position(|&n| n == idx).unwrap_or(idx))
                .unwrap_or(idx),
            depends_on: depends_on_for(idx),
            status: SubtaskStatus::Pending,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_parallel: usize,
    pub fail_fast: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            fail_fast: false,
        }
    }
}

impl From<&crate::config::ChunkingConfig> for ChunkerConfig {
    fn from(c: &crate::config::ChunkingConfig) -> Self {
        Self {
            max_parallel: c.max_parallel,
            fail_fast: c.fail_fast,
        }
    }
}

pub struct TaskChunker {
    executor: Arc<dyn Executor>,
    tracer: Arc<ConversationTracer>,
    retry: Arc<RetryManager>,
    config: ChunkerConfig,
}

impl TaskChunker {
    pub fn new(executor: Arc<dyn Executor>, tracer: Arc<ConversationTracer>, retry: Arc<RetryManager>, config: ChunkerConfig) -> Self {
        Self {
            executor,
            tracer,
            retry,
            config,
        }
    }

    /// Run a single subtask to completion through a `ReviewLoop`, retrying
    /// through `RetryManager` when the review loop escalates for a
    /// transient reason.
    async fn run_subtask(&self, session_id: &str, subtask: &SubtaskDefinition, working_dir: &PathBuf) -> (SubtaskStatus, crate::review::ReviewOutcome) {
        let mut attempt = 0u32;
        loop {
            let review_loop = ReviewLoop::new(self.executor.clone(), self.tracer.clone(), ReviewLoopConfig::default());
            let outcome = review_loop.run(session_id, &subtask.id, &subtask.prompt, working_dir).await;

            if outcome.verdict == ReviewVerdict::Pass {
                return (SubtaskStatus::Complete, outcome);
            }

            let failure_type = classify(outcome.last_result.as_ref(), &outcome.last_gates, None);
            match self.retry.decide(failure_type, attempt) {
                RetryDecision::Retry => {
                    let delay_ms = self.retry.delay_ms(failure_type, attempt);
                    warn!(subtask_id = %subtask.id, attempt, delay_ms, "TaskChunker::run_subtask: retrying");
                    self.tracer
                        .log(session_id, &subtask.id, "SUBTASK_RETRY", serde_json::json!({"attempt": attempt, "delay_ms": delay_ms}), None, Some(subtask.id.clone()))
                        .await
                        .ok();
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                RetryDecision::Escalate | RetryDecision::Pass => return (SubtaskStatus::Failed, outcome),
            }
        }
    }

    pub async fn run(&self, session_id: &str, parent_task_id: &str, plan: &ExecutionPlan, working_dir: &PathBuf) -> AggregatedResult {
        self.tracer
            .log(session_id, parent_task_id, "CHUNKING_START", serde_json::json!({}), None, None)
            .await
            .ok();

        let subtasks = build_subtasks(plan, parent_task_id);
        self.tracer
            .log(
                session_id,
                parent_task_id,
                trace_events::CHUNKING_PLAN,
                serde_json::json!({"subtasks": subtasks}),
                None,
                None,
            )
            .await
            .ok();

        for subtask in &subtasks {
            self.tracer
                .log(session_id, parent_task_id, "SUBTASK_CREATED", serde_json::json!({"subtask_id": subtask.id}), None, Some(subtask.id.clone()))
                .await
                .ok();
        }

        let results = if plan.dependency_analysis.as_ref().map(|a| !a.edges.is_empty() || a.has_cycles).unwrap_or(false) {
            self.run_sequential(session_id, &subtasks, working_dir).await
        } else {
            self.run_parallel(session_id, &subtasks, working_dir).await
        };

        let aggregated = aggregate::aggregate(&subtasks, results);
        self.tracer
            .log(session_id, parent_task_id, "CHUNKING_AGGREGATION", serde_json::json!({"status": aggregated.status}), None, None)
            .await
            .ok();
        self.tracer
            .log(session_id, parent_task_id, "CHUNKING_COMPLETE", serde_json::json!({}), None, None)
            .await
            .ok();

        aggregated
    }

    async fn run_parallel(&self, session_id: &str, subtasks: &[SubtaskDefinition], working_dir: &PathBuf) -> Vec<(SubtaskStatus, crate::review::ReviewOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut handles = Vec::new();

        for subtask in subtasks {
            let semaphore = semaphore.clone();
            let session_id = session_id.to_string();
            let subtask = subtask.clone();
            let working_dir = working_dir.clone();
            let this_self = self;
            let permit = semaphore.clone();

            let future = async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                this_self.tracer.log(&session_id, &subtask.id, "SUBTASK_START", serde_json::json!({}), None, Some(subtask.id.clone())).await.ok();
                let (status, outcome) = this_self.run_subtask(&session_id, &subtask, &working_dir).await;
                let event = if status == SubtaskStatus::Complete { "SUBTASK_COMPLETE" } else { "SUBTASK_FAILED" };
                this_self.tracer.log(&session_id, &subtask.id, event, serde_json::json!({}), None, Some(subtask.id.clone())).await.ok();
                (status, outcome)
            };
            handles.push(future);
        }

        futures::future::join_all(handles).await
    }

    async fn run_sequential(&self, session_id: &str, subtasks: &[SubtaskDefinition], working_dir: &PathBuf) -> Vec<(SubtaskStatus, crate::review::ReviewOutcome)> {
        let mut results: Vec<Option<(SubtaskStatus, crate::review::ReviewOutcome)>> = subtasks.iter().map(|_| None).collect();
        let mut ordered: Vec<usize> = (0..subtasks.len()).collect();
        ordered.sort_by_key(|&i| subtasks[i].execution_order);

        for idx in ordered {
            let subtask = &subtasks[idx];
            let deps_met = subtask
                .depends_on
                .iter()
                .all(|&d| matches!(results.get(d), Some(Some((SubtaskStatus::Complete, _)))));

            if !subtask.depends_on.is_empty() && !deps_met {
                warn!(subtask_id = %subtask.id, "TaskChunker::run_sequential: dependencies not satisfied");
                let outcome = crate::review::ReviewOutcome {
                    verdict: ReviewVerdict::Escalate,
                    iterations: 0,
                    last_result: None,
                    last_gates: Vec::new(),
                };
                results[idx] = Some((SubtaskStatus::Failed, outcome));
                if self.config.fail_fast {
                    break;
                }
                continue;
            }

            self.tracer.log(session_id, &subtask.id, "SUBTASK_START", serde_json::json!({}), None, Some(subtask.id.clone())).await.ok();
            let (status, outcome) = self.run_subtask(session_id, subtask, working_dir).await;
            let event = if status == SubtaskStatus::Complete { "SUBTASK_COMPLETE" } else { "SUBTASK_FAILED" };
            self.tracer.log(session_id, &subtask.id, event, serde_json::json!({}), None, Some(subtask.id.clone())).await.ok();

            let failed = status != SubtaskStatus::Complete;
            results[idx] = Some((status, outcome));
            if failed && self.config.fail_fast {
                info!(subtask_id = %subtask.id, "TaskChunker::run_sequential: fail_fast stopping further subtasks");
                break;
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or((
                    SubtaskStatus::Pending,
                    crate::review::ReviewOutcome {
                        verdict: ReviewVerdict::Escalate,
                        iterations: 0,
                        last_result: None,
                        last_gates: Vec::new(),
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeExecutor;
    use crate::planner::TaskPlanner;

    #[tokio::test]
    async fn test_parallel_subtasks_all_complete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();

        let responses = vec![
            FakeExecutor::complete(dir.path(), "done a", &["a.rs"]),
            FakeExecutor::complete(dir.path(), "done b", &["b.rs"]),
        ];
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
        let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
        let retry = Arc::new(RetryManager::new(crate::retry::RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 10,
            jitter_fraction: 0.0,
            rate_limit_initial_delay_ms: 1,
            timeout_max_delay_ms: 10,
        }));
        let chunker = TaskChunker::new(executor, tracer, retry, ChunkerConfig::default());

        let planner = TaskPlanner::new(crate::planner::PlannerConfig::default());
        let plan = planner.plan("- update a.rs\n- update b.rs");

        let aggregated = chunker.run("s1", "parent", &plan, &dir.path().to_path_buf()).await;
        assert_eq!(aggregated.subtask_results.len(), 2);
        assert!(aggregated.files_modified.contains(&"a.rs".to_string()));
        assert!(aggregated.files_modified.contains(&"b.rs".to_string()));
    }

    #[tokio::test]
    async fn test_fail_fast_stops_before_later_subtasks() {
        let dir = tempfile::tempdir().unwrap();

        let mut failing = FakeExecutor::complete(dir.path(), "", &[]);
        failing.status = crate::executor::ExecuteStatus::Incomplete;
        let responses: Vec<_> = (0..5).map(|_| failing.clone()).collect();
        let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
        let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
        let retry = Arc::new(RetryManager::new(crate::retry::RetryPolicy {
            max_retries: 0,
            initial_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 10,
            jitter_fraction: 0.0,
            rate_limit_initial_delay_ms: 1,
            timeout_max_delay_ms: 10,
        }));
        let chunker = TaskChunker::new(
            executor,
            tracer,
            retry,
            ChunkerConfig {
                max_parallel: 4,
                fail_fast: true,
            },
        );

        let planner = TaskPlanner::new(crate::planner::PlannerConfig::default());
        let plan = planner.plan("1. Create the users table\n2. Add the migration, based on the users table\n3. Wire up the API endpoint, using the migration");

        let aggregated = chunker.run("s1", "parent", &plan, &dir.path().to_path_buf()).await;
        assert_eq!(aggregated.subtask_results[0].status, SubtaskStatus::Failed);
        assert_eq!(aggregated.subtask_results[1].status, SubtaskStatus::Pending);
        assert_eq!(aggregated.subtask_results[2].status, SubtaskStatus::Pending);
    }
}
