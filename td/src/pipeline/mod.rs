//! `Pipeline`: the per-task orchestrator composing planner -> chunker ->
//! review -> retry. Also the sole translation point between a pipeline
//! failure and an `AWAITING_RESPONSE` task status (the
//! `AWAITING_CLARIFICATION:` convention), so the poller never has to
//! inspect error strings itself.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use taskstore::{ConversationTracer, Task, TaskStatus, TaskType};

use crate::chunker::{AggregatedResult, ChunkerConfig, TaskChunker};
use crate::config::ChunkingConfig;
use crate::executor::Executor;
use crate::planner::{PlannerConfig, TaskPlanner};
use crate::retry::RetryManager;
use crate::review::{ReviewLoop, ReviewLoopConfig, ReviewOutcome, ReviewVerdict};

const AWAITING_CLARIFICATION_PREFIX: &str = "AWAITING_CLARIFICATION:";

#[derive(Debug, Serialize, Deserialize)]
struct ClarificationPayload {
    question: String,
    context: String,
    output: Option<String>,
}

pub struct TranslatedClarification {
    pub question: String,
    pub context: String,
    pub output: Option<String>,
}

/// Parse a pipeline error message for the `AWAITING_CLARIFICATION:` prefix
/// this module's own escalation path emits. Returns `None` for any other
/// error, which the caller should treat as a hard failure.
pub fn translate_error(_task: &Task, message: &str) -> Option<TranslatedClarification> {
    let payload = message.strip_prefix(AWAITING_CLARIFICATION_PREFIX)?;
    let parsed: ClarificationPayload = serde_json::from_str(payload).ok()?;
    Some(TranslatedClarification {
        question: parsed.question,
        context: parsed.context,
        output: parsed.output,
    })
}

fn awaiting_clarification_error(question: &str, context: &str, output: Option<String>) -> eyre::Report {
    let payload = ClarificationPayload {
        question: question.to_string(),
        context: context.to_string(),
        output,
    };
    eyre::eyre!("{AWAITING_CLARIFICATION_PREFIX}{}", serde_json::to_string(&payload).unwrap())
}

pub struct PipelineOutcome {
    pub status: TaskStatus,
    pub output: Option<String>,
}

pub struct Pipeline {
    executor: Arc<dyn Executor>,
    tracer: Arc<ConversationTracer>,
    retry: Arc<RetryManager>,
    planner: TaskPlanner,
    chunker_config: ChunkerConfig,
    repo_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        executor: Arc<dyn Executor>,
        tracer: Arc<ConversationTracer>,
        retry: Arc<RetryManager>,
        planner_config: PlannerConfig,
        chunking_config: ChunkingConfig,
        repo_root: PathBuf,
    ) -> Self {
        Self {
            executor,
            tracer,
            retry,
            planner: TaskPlanner::new(planner_config),
            chunker_config: ChunkerConfig::from(&chunking_config),
            repo_root,
        }
    }

    pub async fn execute(&self, task: &Task) -> Result<PipelineOutcome> {
        let plan = self.planner.plan(&task.prompt);
        info!(task_id = %task.task_id, should_chunk = plan.chunking_recommendation.should_chunk, "Pipeline::execute: planned");

        if plan.chunking_recommendation.should_chunk {
            let chunker = TaskChunker::new(self.executor.clone(), self.tracer.clone(), self.retry.clone(), self.chunker_config.clone());
            let aggregated = chunker.run(&task.session_id, &task.task_id, &plan, &self.repo_root).await;
            self.outcome_from_aggregated(task, aggregated)
        } else {
            let review_loop = ReviewLoop::new(self.executor.clone(), self.tracer.clone(), ReviewLoopConfig::default());
            let outcome = review_loop.run(&task.session_id, &task.task_id, &task.prompt, &self.repo_root).await;
            self.outcome_from_review(task, outcome)
        }
    }

    fn outcome_from_review(&self, task: &Task, outcome: ReviewOutcome) -> Result<PipelineOutcome> {
        match outcome.verdict {
            ReviewVerdict::Pass => Ok(PipelineOutcome {
                status: TaskStatus::Complete,
                output: outcome.last_result.map(|r| r.output),
            }),
            _ => self.escalate(task, outcome.last_result.map(|r| r.output)),
        }
    }

    fn outcome_from_aggregated(&self, task: &Task, aggregated: AggregatedResult) -> Result<PipelineOutcome> {
        use crate::chunker::AggregatedStatus;
        match aggregated.status {
            AggregatedStatus::Complete | AggregatedStatus::Degraded => Ok(PipelineOutcome {
                status: TaskStatus::Complete,
                output: Some(aggregated.output_summary),
            }),
            AggregatedStatus::Failed => self.escalate(task, Some(aggregated.output_summary)),
        }
    }

    /// Implementation tasks that escalate stay ERROR unless the partial
    /// output is itself a question; READ_INFO/REPORT tasks preserve their
    /// partial output as AWAITING_RESPONSE instead.
    fn escalate(&self, task: &Task, partial_output: Option<String>) -> Result<PipelineOutcome> {
        let looks_like_question = partial_output.as_deref().map(|o| o.trim_end().ends_with('?')).unwrap_or(false);

        let should_await = matches!(task.task_type, TaskType::ReadInfo | TaskType::Report) || looks_like_question;

        if should_await {
            let question = partial_output
                .clone()
                .unwrap_or_else(|| "The task could not be completed automatically; please clarify how to proceed.".to_string());
            Err(awaiting_clarification_error(&question, "escalated by review loop", partial_output))
        } else {
            Err(eyre::eyre!("task escalated after exhausting review iterations"))
        }
    }
}
