use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeCategory {
    Xs,
    S,
    M,
    L,
    Xl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeEstimation {
    pub complexity_score: u32,
    pub estimated_file_count: u32,
    pub estimated_tokens: u32,
    pub size_category: SizeCategory,
    pub estimation_reasons: Vec<String>,
}

/// Additive keyword weights. Each hit contributes its score once and is
/// recorded as a human-readable reason.
const KEYWORD_WEIGHTS: &[(&str, u32)] = &[
    ("implement full", 3),
    ("authentication", 2),
    ("database", 2),
    ("api endpoint", 2),
    ("security", 2),
    ("integrate", 2),
    ("migration", 1),
    ("refactor", 1),
    ("end-to-end", 2),
];

/// Phrases whose presence suggests the prompt decomposes into ordered
/// subtasks rather than one self-contained change.
const DEPENDENCY_KEYWORDS: &[&str] = &["after", "then", "once", "following", "based on", "using"];

pub fn estimate_size(prompt: &str) -> SizeEstimation {
    let lowered = prompt.to_lowercase();
    let mut score = 0u32;
    let mut reasons = Vec::new();

    for (keyword, weight) in KEYWORD_WEIGHTS {
        if lowered.contains(keyword) {
            score += weight;
            reasons.push(format!("matched \"{keyword}\" (+{weight})"));
        }
    }

    let score = score.min(10);
    let size_category = match score {
        0..=1 => SizeCategory::Xs,
        2..=3 => SizeCategory::S,
        4..=6 => SizeCategory::M,
        7..=9 => SizeCategory::L,
        _ => SizeCategory::Xl,
    };

    let estimated_file_count = (score / 2).max(1);
    let estimated_tokens = estimated_file_count * 800 + prompt.len() as u32;

    SizeEstimation {
        complexity_score: score,
        estimated_file_count,
        estimated_tokens,
        size_category,
        estimation_reasons: reasons,
    }
}

pub fn count_decomposition_indicators(prompt: &str) -> usize {
    let lowered = prompt.to_lowercase();
    DEPENDENCY_KEYWORDS.iter().filter(|kw| lowered.contains(*kw)).count()
}

/// Extract candidate subtask prompts, preferring numbered lists, then
/// bullet lists, then comma-separated coordinated objects.
pub fn extract_subtasks(prompt: &str) -> Vec<String> {
    if let Some(items) = extract_numbered(prompt) {
        return items;
    }
    if let Some(items) = extract_bulleted(prompt) {
        return items;
    }
    extract_comma_separated(prompt)
}

fn extract_numbered(prompt: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").unwrap();
    let items: Vec<String> = re.captures_iter(prompt).map(|c| c[1].trim().to_string()).collect();
    if items.len() >= 2 {
        Some(items)
    } else {
        None
    }
}

fn extract_bulleted(prompt: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?m)^\s*[-*]\s+(.+)$").unwrap();
    let items: Vec<String> = re.captures_iter(prompt).map(|c| c[1].trim().to_string()).collect();
    if items.len() >= 2 {
        Some(items)
    } else {
        None
    }
}

/// Split a single coordinated sentence like "add X, update Y, and wire Z"
/// on commas, treating the prompt as one subtask if no commas are found.
fn extract_comma_separated(prompt: &str) -> Vec<String> {
    let trimmed = prompt.trim();
    let parts: Vec<String> = trimmed
        .split(',')
        .map(|p| p.trim().trim_start_matches("and ").trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() >= 2 {
        parts
    } else {
        vec![trimmed.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worked_example_scores_ten() {
        let prompt = "Implement full authentication with database and api endpoint, add security, and integrate with the existing app";
        let estimation = estimate_size(prompt);
        assert_eq!(estimation.complexity_score, 10);
        assert_eq!(estimation.size_category, SizeCategory::Xl);
    }

    #[test]
    fn test_trivial_prompt_is_xs() {
        let estimation = estimate_size("fix the typo");
        assert_eq!(estimation.size_category, SizeCategory::Xs);
    }

    #[test]
    fn test_extract_numbered_preferred_over_bulleted() {
        let prompt = "1. first step\n2. second step\n- ignored bullet";
        let items = extract_subtasks(prompt);
        assert_eq!(items, vec!["first step".to_string(), "second step".to_string()]);
    }

    #[test]
    fn test_extract_comma_separated_fallback() {
        let items = extract_subtasks("add logging, update the README, and bump the version");
        assert_eq!(items.len(), 3);
    }
}
