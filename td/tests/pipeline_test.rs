//! End-to-end pipeline scenarios: a single-task happy path, a chunked
//! parallel decomposition, a dependency-ordered sequential run, and
//! escalation into AWAITING_RESPONSE for a read-info task.

use std::sync::Arc;

use tempfile::tempdir;

use pmrunner::executor::{Executor, ExecuteStatus, FakeExecutor};
use pmrunner::config::ChunkingConfig;
use pmrunner::planner::PlannerConfig;
use pmrunner::retry::{RetryManager, RetryPolicy};
use pmrunner::{translate_error, Pipeline, PipelineOutcome};

use taskstore::{ConversationTracer, Task, TaskStatus, TaskType};

fn retry_manager() -> Arc<RetryManager> {
    Arc::new(RetryManager::new(RetryPolicy {
        max_retries: 2,
        initial_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 10,
        jitter_fraction: 0.0,
        rate_limit_initial_delay_ms: 1,
        timeout_max_delay_ms: 10,
    }))
}

#[tokio::test]
async fn test_single_task_happy_path() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("handler.rs"), "").unwrap();

    let response = FakeExecutor::complete(dir.path(), "updated the handler", &["handler.rs"]);
    let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(vec![response]));
    let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
    let pipeline = Pipeline::new(executor, tracer, retry_manager(), PlannerConfig::default(), ChunkingConfig::default(), dir.path().to_path_buf());

    let task = Task::new("ns", "t1".to_string(), "group-1", "session-1", "fix the typo in handler.rs", TaskType::Implementation);
    let outcome: PipelineOutcome = pipeline.execute(&task).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Complete);
    assert_eq!(outcome.output.unwrap(), "updated the handler");
}

#[tokio::test]
async fn test_decomposed_prompt_runs_parallel_subtasks() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "").unwrap();
    std::fs::write(dir.path().join("b.rs"), "").unwrap();
    std::fs::write(dir.path().join("c.rs"), "").unwrap();

    let responses = vec![
        FakeExecutor::complete(dir.path(), "done a", &["a.rs"]),
        FakeExecutor::complete(dir.path(), "done b", &["b.rs"]),
        FakeExecutor::complete(dir.path(), "done c", &["c.rs"]),
    ];
    let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
    let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
    let pipeline = Pipeline::new(executor, tracer, retry_manager(), PlannerConfig::default(), ChunkingConfig::default(), dir.path().to_path_buf());

    let prompt = "- implement full authentication in a.rs\n- add database wiring in b.rs\n- wire up the api endpoint in c.rs";
    let task = Task::new("ns", "t1".to_string(), "group-1", "session-1", prompt, TaskType::Implementation);
    let outcome = pipeline.execute(&task).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Complete);
    let output = outcome.output.unwrap();
    assert!(output.contains("done a"));
    assert!(output.contains("done b"));
    assert!(output.contains("done c"));
}

#[tokio::test]
async fn test_dependency_ordered_prompt_runs_sequentially() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("users.rs"), "").unwrap();
    std::fs::write(dir.path().join("migration.rs"), "").unwrap();
    std::fs::write(dir.path().join("api.rs"), "").unwrap();

    let responses = vec![
        FakeExecutor::complete(dir.path(), "created users table", &["users.rs"]),
        FakeExecutor::complete(dir.path(), "added migration", &["migration.rs"]),
        FakeExecutor::complete(dir.path(), "wired up api endpoint", &["api.rs"]),
    ];
    let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
    let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
    let pipeline = Pipeline::new(executor, tracer, retry_manager(), PlannerConfig::default(), ChunkingConfig::default(), dir.path().to_path_buf());

    let prompt = "1. Create the users table\n2. Add the migration, based on the users table\n3. Wire up the API endpoint, using the migration";
    let task = Task::new("ns", "t1".to_string(), "group-1", "session-1", prompt, TaskType::Implementation);
    let outcome = pipeline.execute(&task).await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Complete);
    let output = outcome.output.unwrap();
    let users_pos = output.find("created users table").unwrap();
    let migration_pos = output.find("added migration").unwrap();
    let api_pos = output.find("wired up api endpoint").unwrap();
    assert!(users_pos < migration_pos);
    assert!(migration_pos < api_pos);
}

#[tokio::test]
async fn test_escalation_on_read_info_task_preserves_partial_output() {
    let dir = tempdir().unwrap();

    let mut incomplete = FakeExecutor::complete(dir.path(), "I found several candidates, which one did you mean?", &[]);
    incomplete.status = ExecuteStatus::Incomplete;
    let responses: Vec<_> = (0..5).map(|_| incomplete.clone()).collect();
    let executor: Arc<dyn Executor> = Arc::new(FakeExecutor::new(responses));
    let tracer = Arc::new(ConversationTracer::new(dir.path().join(".state")));
    let pipeline = Pipeline::new(executor, tracer, retry_manager(), PlannerConfig::default(), ChunkingConfig::default(), dir.path().to_path_buf());

    let task = Task::new("ns", "t2".to_string(), "group-1", "session-1", "where is the config file?", TaskType::ReadInfo);
    let result = pipeline.execute(&task).await;

    let err = result.unwrap_err();
    let clarification = translate_error(&task, &err.to_string()).expect("should translate to a clarification");
    assert!(clarification.output.unwrap().contains("which one did you mean"));
}
