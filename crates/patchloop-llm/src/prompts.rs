//! Prompt text for planning and implementation requests.

use patchloop_utils::types::PlanDocument;

/// System prompt for the planner. The response must be a single JSON object.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are an expert planning assistant helping an autonomous code agent.
Read the user's request and the repository context, then reply with valid JSON only.
Follow this JSON schema:
{
  "objective": str,
  "rationale": str,
  "scope": {"in_scope": [str], "out_of_scope": [str]},
  "files": [{"path": str, "reason": str}],
  "steps": [{"id": str, "description": str, "depends_on": [str]}],
  "tests": {"strategy": str, "commands": [str]},
  "risks": [{"description": str, "mitigation": str}]
}
Rules:
- Emit well-formed JSON without Markdown fences or commentary.
- Include every top-level key, using an empty list where nothing applies.
- Use repository-relative file paths exactly as they appear in the tree.
- Keep each step a focused action suitable for automation.
"#;

/// System prompt for patch generation.
pub const IMPLEMENTER_SYSTEM_PROMPT: &str = "You are an expert software engineer implementing an approved plan.
Return a unified diff that can be applied with `git apply`. Follow these rules:
1. Modify only the files listed under `plan.files`.
2. Output the diff only, with no Markdown code fences or explanations.
3. Include file headers (diff --git, ---, +++) and well-formed hunks.
4. Preserve the existing code style and imports; prefer minimal edits.
5. If no change is required, output an empty string.
";

const NO_CONTEXT: &str = "<no context>";

#[must_use]
pub fn planner_user_prompt(request: &str, context: &str) -> String {
    format!("User request:\n{request}\n\nRepository context:\n{context}\n")
}

/// User prompt for one implementation attempt.
#[must_use]
pub fn implementer_user_prompt(
    plan: &PlanDocument,
    context: &str,
    previous_patch: Option<&str>,
    feedback: Option<&str>,
) -> String {
    let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };

    let mut parts = vec![
        "Approved plan JSON:".to_string(),
        plan_json,
        "\nRepository context snippets:".to_string(),
        context.to_string(),
        "\nInstructions:".to_string(),
        "- Produce a unified diff touching only the allowed files.".to_string(),
        "- Respect the step ordering and intent described in the plan.".to_string(),
    ];

    let allowed = plan.allowed_files();
    if !allowed.is_empty() {
        parts.push(format!("- Allowed files: {}", allowed.join(", ")));
    }
    if let Some(previous) = previous_patch.filter(|p| !p.trim().is_empty()) {
        parts.push("- Previous patch (for reference, do not repeat verbatim):".to_string());
        parts.push(previous.to_string());
    }
    if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
        parts.push("- Address the following feedback or test failures:".to_string());
        parts.push(feedback.to_string());
    }

    parts.join("\n")
}
