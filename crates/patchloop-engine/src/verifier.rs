//! Round summaries and auto-fix feedback built from sandbox results.

use patchloop_utils::types::{CheckStatus, SandboxResult};

/// Characters of test stdout carried into feedback, taken from the end
pub const STDOUT_FEEDBACK_CHARS: usize = 2000;

/// One-line summary of a sandbox round, e.g. `tests rc=1; lint:failed`.
#[must_use]
pub fn round_summary(result: &SandboxResult) -> String {
    let mut summary = if let Some(error) = &result.error {
        format!("sandbox error: {error}")
    } else if !result.applied {
        let (attempts, rejected) = result
            .apply
            .as_ref()
            .map_or((0, 0), |r| (r.attempts.len(), r.rejected.len()));
        format!("patch did not apply ({attempts} attempts, {rejected} rejected fragments)")
    } else {
        match &result.tests {
            Some(outcome) => outcome.summary(),
            None => "tests did not run".to_string(),
        }
    };

    for check in &result.extra_checks {
        summary.push_str(&format!("; {}:{}", check.name, check.status));
    }
    summary
}

/// Feedback for the next implementation attempt, or `None` when there is
/// nothing to say.
#[must_use]
pub fn build_feedback(result: &SandboxResult, summary: &str) -> Option<String> {
    let mut parts: Vec<String> = vec![summary.trim().to_string()];

    if let Some(tests) = &result.tests {
        let stderr = tests.stderr().trim();
        if !stderr.is_empty() {
            parts.push(format!("Test stderr:\n{stderr}"));
        }
        let stdout = tests.stdout().trim();
        if !stdout.is_empty() {
            parts.push(format!(
                "Test stdout (truncated):\n{}",
                tail_chars(stdout, STDOUT_FEEDBACK_CHARS)
            ));
        }
    }

    if !result.applied {
        if let Some(report) = &result.apply {
            if let Some(stderr) = report.last_stderr().map(str::trim).filter(|s| !s.is_empty()) {
                parts.push(format!("git apply output:\n{stderr}"));
            }
            for fragment in &report.rejected {
                parts.push(format!(
                    "Rejected fragment {}:\n{}",
                    fragment.path,
                    fragment.content.trim_end()
                ));
            }
        }
    }

    if let Some(error) = &result.error {
        parts.push(format!("Sandbox error:\n{error}"));
    }

    let failed_checks: Vec<String> = result
        .extra_checks
        .iter()
        .filter(|c| c.status != CheckStatus::Passed)
        .map(|c| {
            let rc = c.exit_code.map_or_else(|| "none".to_string(), |code| code.to_string());
            format!(
                "Check {}: status={} rc={} stderr={}",
                c.name,
                c.status,
                rc,
                c.stderr.trim()
            )
        })
        .collect();
    if !failed_checks.is_empty() {
        parts.push(failed_checks.join("\n"));
    }

    let feedback = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (!feedback.is_empty()).then_some(feedback)
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    text.char_indices()
        .nth(skip)
        .map_or(text, |(idx, _)| &text[idx..])
}
