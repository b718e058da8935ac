use std::collections::HashMap;

use serde::Serialize;

use super::FailureType;

#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub failure_type: FailureType,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationReport {
    pub task_id: String,
    pub reason: String,
    pub failure_counts: HashMap<String, u32>,
    pub retry_history: Vec<RetryAttempt>,
    pub recommended_actions: Vec<String>,
    pub user_message: String,
    pub trace_file: Option<String>,
}

/// Build a human-readable escalation report from a task's retry history,
/// with a small heuristic for `recommended_actions` keyed on the most
/// frequent failure type.
pub fn build_report(task_id: &str, history: Vec<RetryAttempt>, trace_file: Option<String>) -> EscalationReport {
    let mut failure_counts: HashMap<String, u32> = HashMap::new();
    for attempt in &history {
        *failure_counts.entry(format!("{:?}", attempt.failure_type)).or_insert(0) += 1;
    }

    let dominant = failure_counts.iter().max_by_key(|(_, count)| **count).map(|(k, _)| k.clone());

    let recommended_actions = match dominant.as_deref() {
        Some("RateLimit") => vec![
            "Increase the retry backoff ceiling or reduce executor concurrency.".to_string(),
            "Check whether the account has hit an API rate limit.".to_string(),
        ],
        Some("FatalError") => vec!["Re-authenticate the executor binary and retry manually.".to_string()],
        Some("QualityFailure") => vec![
            "Review the failed gates in the conversation trace for a pattern.".to_string(),
            "Consider narrowing the prompt scope.".to_string(),
        ],
        Some("Timeout") => vec!["Increase the executor timeout or split the task into smaller subtasks.".to_string()],
        _ => vec!["Inspect the conversation trace for this task.".to_string()],
    };

    let reason = format!(
        "task {task_id} escalated after {} retr{} (dominant cause: {})",
        history.len(),
        if history.len() == 1 { "y" } else { "ies" },
        dominant.clone().unwrap_or_else(|| "unknown".to_string())
    );

    let user_message = format!(
        "This task needs a human look: it failed {} times, mostly due to {}.",
        history.len(),
        dominant.unwrap_or_else(|| "an unclear cause".to_string())
    );

    EscalationReport {
        task_id: task_id.to_string(),
        reason,
        failure_counts,
        retry_history: history,
        recommended_actions,
        user_message,
        trace_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_rate_limit_recommends_backoff() {
        let history = vec![
            RetryAttempt {
                attempt: 0,
                failure_type: FailureType::RateLimit,
                delay_ms: 5_000,
            },
            RetryAttempt {
                attempt: 1,
                failure_type: FailureType::RateLimit,
                delay_ms: 10_000,
            },
        ];
        let report = build_report("t1", history, None);
        assert!(report.recommended_actions[0].contains("backoff"));
        assert_eq!(report.failure_counts.get("RateLimit"), Some(&2));
    }
}
