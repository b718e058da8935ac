use std::collections::HashSet;

use serde::Serialize;

use super::{SubtaskDefinition, SubtaskStatus};
use crate::review::ReviewOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregatedStatus {
    Complete,
    Degraded,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct SubtaskSummary {
    pub subtask_id: String,
    pub status: SubtaskStatus,
    pub iterations: u32,
}

#[derive(Debug, Serialize)]
pub struct AggregatedResult {
    pub status: AggregatedStatus,
    pub files_modified: Vec<String>,
    pub output_summary: String,
    pub total_review_iterations: u32,
    pub subtask_results: Vec<SubtaskSummary>,
}

/// Union `files_modified` across every subtask, preserving first-seen
/// order (a plain `Vec` + `HashSet` guard rather than pulling in
/// `indexmap` for one call site).
pub fn aggregate(subtasks: &[SubtaskDefinition], results: Vec<(SubtaskStatus, ReviewOutcome)>) -> AggregatedResult {
    let mut files_modified = Vec::new();
    let mut seen = HashSet::new();
    let mut output_parts = Vec::new();
    let mut total_review_iterations = 0u32;
    let mut subtask_results = Vec::new();
    let mut any_failed = false;
    let mut all_complete = true;

    for (subtask, (status, outcome)) in subtasks.iter().zip(results.into_iter()) {
        if status != SubtaskStatus::Complete {
            any_failed = true;
            all_complete = false;
        }

        if let Some(result) = &outcome.last_result {
            for file in &result.files_modified {
                if seen.insert(file.clone()) {
                    files_modified.push(file.clone());
                }
            }
            if !result.output.is_empty() {
                output_parts.push(format!("[{}] {}", subtask.id, result.output));
            }
        }

        total_review_iterations += outcome.iterations;
        subtask_results.push(SubtaskSummary {
            subtask_id: subtask.id.clone(),
            status,
            iterations: outcome.iterations,
        });
    }

    let status = if all_complete {
        AggregatedStatus::Complete
    } else if any_failed && files_modified.is_empty() {
        AggregatedStatus::Failed
    } else {
        AggregatedStatus::Degraded
    };

    AggregatedResult {
        status,
        files_modified,
        output_summary: output_parts.join("\n"),
        total_review_iterations,
        subtask_results,
    }
}
