//! Patch generation and validation.
//!
//! The generator's output is untrusted text. It becomes an implementation
//! attempt only after [`validate_patch`] accepts it.

use patchloop_llm::prompts::{IMPLEMENTER_SYSTEM_PROMPT, implementer_user_prompt};
use patchloop_llm::{Generator, LlmError};
use patchloop_patch_model::{UNKNOWN_PATH, parse_strict};
use patchloop_utils::error::PatchValidationError;
use patchloop_utils::types::{PlanDocument, normalize_repo_path};
use std::collections::BTreeSet;
use tracing::debug;

/// A patch that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPatch {
    /// Cleaned diff text, newline terminated
    pub patch: String,
    /// Sorted, unique touched paths
    pub files: Vec<String>,
}

/// Raw generator output together with its validation verdict.
#[derive(Debug)]
pub struct Generated {
    pub raw_response: String,
    pub outcome: Result<ValidatedPatch, PatchValidationError>,
}

pub struct Implementer<'g> {
    generator: &'g dyn Generator,
}

impl<'g> Implementer<'g> {
    pub fn new(generator: &'g dyn Generator) -> Self {
        Self { generator }
    }

    /// Ask the generator for a patch and validate it against the plan's files.
    ///
    /// Only transport-level failures are errors; a bad patch is reported in
    /// [`Generated::outcome`].
    pub fn generate(
        &self,
        plan: &PlanDocument,
        context: &str,
        previous_patch: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<Generated, LlmError> {
        let user = implementer_user_prompt(plan, context, previous_patch, feedback);
        debug!(
            generator = self.generator.name(),
            prompt_chars = user.len(),
            has_feedback = feedback.is_some(),
            "Requesting patch"
        );
        let raw_response = self.generator.generate(IMPLEMENTER_SYSTEM_PROMPT, &user)?;
        let outcome = validate_patch(&raw_response, &plan.allowed_files());
        Ok(Generated {
            raw_response,
            outcome,
        })
    }
}

/// Remove one Markdown code fence wrapping the whole text.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Opening fence line may carry an info string such as `diff`.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Validate generator output against the allowed file list.
///
/// An empty `allowed` list permits any path.
pub fn validate_patch(raw: &str, allowed: &[String]) -> Result<ValidatedPatch, PatchValidationError> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Err(PatchValidationError::Empty);
    }
    if !text.contains("diff --git") {
        return Err(PatchValidationError::MissingDiffHeader);
    }

    let patch = parse_strict(text).map_err(|e| PatchValidationError::Unparseable {
        reason: e.to_string(),
    })?;

    let allowed_set: BTreeSet<String> = allowed.iter().map(|p| normalize_repo_path(p)).collect();
    // Renames and copies read their source, so it is checked like the target.
    let candidates: BTreeSet<&str> = patch
        .files
        .iter()
        .flat_map(|f| std::iter::once(f.path.as_str()).chain(f.source_path.as_deref()))
        .collect();
    let mut files = BTreeSet::new();
    for path in candidates {
        if path == UNKNOWN_PATH {
            return Err(PatchValidationError::UnresolvedPath);
        }
        let path = normalize_repo_path(path);
        if !allowed_set.is_empty() && !allowed_set.contains(&path) {
            return Err(PatchValidationError::OutOfScope {
                path,
                allowed: allowed_set.into_iter().collect(),
            });
        }
        files.insert(path);
    }
    if files.is_empty() {
        return Err(PatchValidationError::NoFiles);
    }

    Ok(ValidatedPatch {
        patch: format!("{text}\n"),
        files: files.into_iter().collect(),
    })
}
