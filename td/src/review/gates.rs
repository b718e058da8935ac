//! Q1-Q6 quality gates applied to an `ExecuteResult` before a review
//! iteration is allowed to PASS.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::{ExecuteResult, ExecuteStatus};

const OMISSION_MARKERS: &[&str] = &["…", "// 残り省略", "// etc.", "// 以下同様"];
const TODO_MARKERS: &[&str] = &["TODO", "FIXME", "TBD"];
const TERMINAL_PHRASES: &[&str] = &["完了しました", "これで完了です", "以上です", "Done."];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: &'static str,
    pub verdict: GateVerdict,
    pub reason: Option<String>,
}

fn pass(gate: &'static str) -> GateResult {
    GateResult {
        gate,
        verdict: GateVerdict::Pass,
        reason: None,
    }
}

fn fail(gate: &'static str, reason: impl Into<String>) -> GateResult {
    GateResult {
        gate,
        verdict: GateVerdict::Fail,
        reason: Some(reason.into()),
    }
}

/// Q1: every verified file path reported actually exists on disk; a result
/// claiming modifications with no verified files at all fails.
fn q1_files_verified(result: &ExecuteResult) -> GateResult {
    if result.verified_files.is_empty() && !result.files_modified.is_empty() {
        return fail("Q1", "modifications reported but no files were verified");
    }
    match result.verified_files.iter().find(|f| !f.exists) {
        Some(f) => fail("Q1", format!("verified file does not exist: {}", f.path)),
        None => pass("Q1"),
    }
}

/// Read the current content of every verified, existing file so Q2/Q3 can
/// scan the files the agent actually touched, not just its stdout.
fn preview_verified_files(result: &ExecuteResult) -> String {
    let cwd = Path::new(&result.cwd);
    result
        .verified_files
        .iter()
        .filter(|f| f.exists)
        .filter_map(|f| std::fs::read_to_string(cwd.join(&f.path)).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Q2: no literal TODO/FIXME/TBD markers left in the output or in any
/// verified file's content.
fn q2_no_todo_markers(result: &ExecuteResult, file_contents: &str) -> GateResult {
    match TODO_MARKERS.iter().find(|m| result.output.contains(**m) || file_contents.contains(**m)) {
        Some(m) => fail("Q2", format!("output or verified file contains marker: {m}")),
        None => pass("Q2"),
    }
}

/// Q3: no omission markers indicating truncated work, in the output or in
/// any verified file's content.
fn q3_no_omission_markers(result: &ExecuteResult, file_contents: &str) -> GateResult {
    match OMISSION_MARKERS.iter().find(|m| result.output.contains(**m) || file_contents.contains(**m)) {
        Some(m) => fail("Q3", format!("output or verified file contains omission marker: {m}")),
        None => pass("Q3"),
    }
}

/// Q4: braces/brackets/parens balance, a cheap proxy for "not truncated
/// mid-statement".
fn q4_syntax_completeness(result: &ExecuteResult) -> GateResult {
    let mut depth = 0i32;
    for c in result.output.chars() {
        match c {
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return fail("Q4", "unbalanced closing bracket in output");
        }
    }
    if depth != 0 {
        return fail("Q4", "unbalanced brackets in output, likely truncated");
    }
    pass("Q4")
}

/// Q5: some concrete evidence of work exists — either a verified existing
/// file, or a COMPLETE status with a non-empty modified-files list.
fn q5_evidence_presence(result: &ExecuteResult) -> GateResult {
    let has_verified_file = result.verified_files.iter().any(|f| f.exists);
    let complete_with_files = result.status == ExecuteStatus::Complete && !result.files_modified.is_empty();
    if has_verified_file || complete_with_files {
        pass("Q5")
    } else {
        fail("Q5", "NO_EVIDENCE: no verified files and no completed modification")
    }
}

/// Q6: an early-termination phrase in the output must be backed by Q5
/// evidence, else the agent likely declared victory without doing work.
fn q6_no_early_termination_without_evidence(result: &ExecuteResult, q5: &GateResult) -> GateResult {
    let claims_done = TERMINAL_PHRASES.iter().any(|p| result.output.contains(p));
    if claims_done && q5.verdict == GateVerdict::Fail {
        fail("Q6", "output claims completion but Q5 evidence is missing")
    } else {
        pass("Q6")
    }
}

pub fn run_all_gates(result: &ExecuteResult) -> Vec<GateResult> {
    let file_contents = preview_verified_files(result);
    let q1 = q1_files_verified(result);
    let q2 = q2_no_todo_markers(result, &file_contents);
    let q3 = q3_no_omission_markers(result, &file_contents);
    let q4 = q4_syntax_completeness(result);
    let q5 = q5_evidence_presence(result);
    let q6 = q6_no_early_termination_without_evidence(result, &q5);
    vec![q1, q2, q3, q4, q5, q6]
}

pub fn all_passed(gates: &[GateResult]) -> bool {
    gates.iter().all(|g| g.verdict == GateVerdict::Pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::VerifiedFile;

    fn base_result() -> ExecuteResult {
        ExecuteResult {
            executed: true,
            output: "updated the handler".to_string(),
            files_modified: vec!["src/handler.rs".to_string()],
            verified_files: vec![VerifiedFile {
                path: "src/handler.rs".to_string(),
                exists: true,
            }],
            unverified_files: Vec::new(),
            duration_ms: 10,
            status: ExecuteStatus::Complete,
            cwd: "/tmp".to_string(),
        }
    }

    #[test]
    fn test_clean_result_passes_all_gates() {
        let result = base_result();
        let gates = run_all_gates(&result);
        assert!(all_passed(&gates));
    }

    #[test]
    fn test_todo_marker_fails_q2() {
        let mut result = base_result();
        result.output = "// TODO: finish this".to_string();
        let gates = run_all_gates(&result);
        assert!(!all_passed(&gates));
        assert_eq!(gates[1].gate, "Q2");
        assert_eq!(gates[1].verdict, GateVerdict::Fail);
    }

    #[test]
    fn test_claims_done_without_evidence_fails_q6() {
        let mut result = base_result();
        result.verified_files.clear();
        result.files_modified.clear();
        result.status = ExecuteStatus::Incomplete;
        result.output = "以上です".to_string();
        let gates = run_all_gates(&result);
        assert!(!all_passed(&gates));
        let q6 = gates.iter().find(|g| g.gate == "Q6").unwrap();
        assert_eq!(q6.verdict, GateVerdict::Fail);
    }

    #[test]
    fn test_missing_file_fails_q1() {
        let mut result = base_result();
        result.verified_files[0].exists = false;
        let gates = run_all_gates(&result);
        assert_eq!(gates[0].gate, "Q1");
        assert_eq!(gates[0].verdict, GateVerdict::Fail);
    }

    #[test]
    fn test_todo_in_verified_file_content_fails_q2() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("handler.rs"), "fn handler() {}\n// TODO: add auth check\n").unwrap();

        let mut result = base_result();
        result.cwd = dir.path().display().to_string();
        result.verified_files[0].path = "handler.rs".to_string();

        let gates = run_all_gates(&result);
        assert!(!all_passed(&gates));
        let q2 = gates.iter().find(|g| g.gate == "Q2").unwrap();
        assert_eq!(q2.verdict, GateVerdict::Fail);
    }

    #[test]
    fn test_omission_marker_in_verified_file_content_fails_q3() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("handler.rs"), "fn handler() {\n// 以下同様\n}\n").unwrap();

        let mut result = base_result();
        result.cwd = dir.path().display().to_string();
        result.verified_files[0].path = "handler.rs".to_string();

        let gates = run_all_gates(&result);
        assert!(!all_passed(&gates));
        let q3 = gates.iter().find(|g| g.gate == "Q3").unwrap();
        assert_eq!(q3.verdict, GateVerdict::Fail);
    }
}
