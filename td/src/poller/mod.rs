//! `QueuePoller`: a single long-lived loop claiming at most one task at a
//! time from `taskstore::QueueStore`, handing it to the pipeline, and
//! reporting the outcome back. Grounded on
//! `td::loop::engine::LoopEngine::run`'s bounded-loop shape, unbounded
//! here since polling runs for the daemon's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use taskstore::{QueueStore, Task, TaskStatus};

use crate::pipeline::{translate_error, Pipeline};

pub struct PollerConfig {
    pub namespace: String,
    pub poll_interval_ms: u64,
    pub stale_threshold_ms: i64,
}

pub struct QueuePoller {
    queue: Arc<QueueStore>,
    pipeline: Arc<Pipeline>,
    config: PollerConfig,
    stop: Arc<AtomicBool>,
}

impl QueuePoller {
    pub fn new(queue: Arc<QueueStore>, pipeline: Arc<Pipeline>, config: PollerConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn run(&self) {
        info!(namespace = %self.config.namespace, "QueuePoller::run: started");

        match self.queue.recover_stale_tasks(&self.config.namespace, self.config.stale_threshold_ms).await {
            Ok(stats) => info!(requeued = stats.tasks_requeued, "QueuePoller::run: recovered stale tasks on startup"),
            Err(e) => error!(error = %e, "QueuePoller::run: stale-task recovery failed"),
        }

        while !self.stop.load(Ordering::Relaxed) {
            match self.queue.claim(&self.config.namespace).await {
                Ok(Some(task)) => {
                    debug!(task_id = %task.task_id, "QueuePoller::run: claimed task");
                    self.run_one(task).await;
                }
                Ok(None) => {
                    tokio::time::sleep(tokio::time::Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Err(e) => {
                    warn!(error = %e, "QueuePoller::run: claim failed");
                    tokio::time::sleep(tokio::time::Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }

        info!(namespace = %self.config.namespace, "QueuePoller::run: stopped");
    }

    async fn run_one(&self, task: Task) {
        let namespace = task.namespace.clone();
        let task_id = task.task_id.clone();

        match self.pipeline.execute(&task).await {
            Ok(outcome) => {
                let result = self
                    .queue
                    .update_status(&namespace, &task_id, outcome.status, None, outcome.output)
                    .await;
                if let Err(e) = result {
                    error!(%task_id, error = %e, "QueuePoller::run_one: update_status failed");
                }
            }
            Err(e) => {
                let message = e.to_string();
                match translate_error(&task, &message) {
                    Some(clarification) => {
                        let result = self
                            .queue
                            .set_awaiting_response(&namespace, &task_id, &clarification.question, &clarification.context, clarification.output)
                            .await;
                        if let Err(e) = result {
                            error!(%task_id, error = %e, "QueuePoller::run_one: set_awaiting_response failed");
                        }
                    }
                    None => {
                        warn!(%task_id, error = %message, "QueuePoller::run_one: pipeline failed, failing closed");
                        let result = self.queue.update_status(&namespace, &task_id, TaskStatus::Error, Some(message), None).await;
                        if let Err(e) = result {
                            error!(%task_id, error = %e, "QueuePoller::run_one: update_status failed");
                        }
                    }
                }
            }
        }
    }
}
