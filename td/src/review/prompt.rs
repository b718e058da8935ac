//! Modification-prompt construction for a rejected review iteration,
//! rendered with real Handlebars templates (unlike
//! `td::loop::engine::LoopEngine::render_prompt`'s plain string
//! replacement, which imports Handlebars but never calls it).

use handlebars::Handlebars;
use serde::Serialize;

use super::gates::GateResult;

const MODIFICATION_TEMPLATE: &str = r#"The previous attempt was rejected by automated review.

Original request:
{{original_prompt}}

Previous output:
{{previous_output}}

The following checks failed and must be addressed:
{{#each failed_gates}}
- {{this.gate}}: {{this.reason}}
{{/each}}

Revise the work so every check above passes. Do not restate what already passed.
"#;

#[derive(Debug, Serialize)]
struct ModificationContext<'a> {
    original_prompt: &'a str,
    previous_output: &'a str,
    failed_gates: Vec<&'a GateResult>,
}

pub fn build_modification_prompt(original_prompt: &str, previous_output: &str, gates: &[GateResult]) -> String {
    let failed_gates: Vec<&GateResult> = gates.iter().filter(|g| g.verdict == super::gates::GateVerdict::Fail).collect();

    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(false);
    let context = ModificationContext {
        original_prompt,
        previous_output,
        failed_gates,
    };

    handlebars
        .render_template(MODIFICATION_TEMPLATE, &context)
        .unwrap_or_else(|_| format!("Revise the previous attempt at: {original_prompt}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::gates::GateVerdict;

    #[test]
    fn test_rendered_prompt_lists_failed_gates() {
        let gates = vec![
            GateResult {
                gate: "Q2",
                verdict: GateVerdict::Fail,
                reason: Some("output contains marker: TODO".to_string()),
            },
            GateResult {
                gate: "Q5",
                verdict: GateVerdict::Pass,
                reason: None,
            },
        ];
        let prompt = build_modification_prompt("add logging", "// TODO: later", &gates);
        assert!(prompt.contains("Q2"));
        assert!(prompt.contains("output contains marker: TODO"));
        assert!(!prompt.contains("- Q5:"));
    }
}
