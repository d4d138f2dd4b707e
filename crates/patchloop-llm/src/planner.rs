use patchloop_utils::error::LlmError;
use patchloop_utils::types::{PLAN_SCHEMA_VERSION, PlanDocument};
use tracing::{debug, info};

use crate::context::{ContextProvider, NoContext};
use crate::prompts::{PLANNER_SYSTEM_PROMPT, planner_user_prompt};
use crate::types::{Generator, Planner, PlannerOutput};

/// [`Planner`] backed by any [`Generator`].
pub struct LlmPlanner<G> {
    generator: G,
    context: Box<dyn ContextProvider>,
}

impl<G: Generator> LlmPlanner<G> {
    #[must_use]
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            context: Box::new(NoContext),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Box<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }
}

impl<G: Generator> Planner for LlmPlanner<G> {
    fn create_plan(&self, request: &str) -> Result<PlannerOutput, LlmError> {
        let context = self.context.context_for(request)?;
        debug!(
            backend = self.generator.name(),
            context_len = context.len(),
            "Requesting plan"
        );
        let raw_plan = self
            .generator
            .generate(PLANNER_SYSTEM_PROMPT, &planner_user_prompt(request, &context))?;
        let plan = parse_plan_response(&raw_plan)?;
        info!(
            files = plan.files.len(),
            steps = plan.steps.len(),
            "Planner produced plan"
        );
        Ok(PlannerOutput {
            raw_plan,
            plan,
            context,
        })
    }
}

/// Parse a planner response into a [`PlanDocument`].
///
/// The whole trimmed text is tried first, then the slice between the first
/// `{` and the last `}`. The schema version is always stamped.
pub fn parse_plan_response(raw: &str) -> Result<PlanDocument, LlmError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(LlmError::InvalidResponse(
            "planner returned an empty response".to_string(),
        ));
    }

    let mut plan: PlanDocument = match serde_json::from_str(text) {
        Ok(plan) => plan,
        Err(whole_err) => {
            let slice = match (text.find('{'), text.rfind('}')) {
                (Some(start), Some(end)) if end > start => &text[start..=end],
                _ => {
                    return Err(LlmError::InvalidResponse(format!(
                        "planner response is not JSON: {whole_err}"
                    )));
                }
            };
            serde_json::from_str(slice).map_err(|e| {
                LlmError::InvalidResponse(format!("planner response is not JSON: {e}"))
            })?
        }
    };
    plan.schema_version = PLAN_SCHEMA_VERSION.to_string();
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::scripted::ScriptedGenerator;

    #[test]
    fn test_parses_whole_json_and_stamps_version() {
        let plan = parse_plan_response(r#"{"objective":"x","schema_version":"0.1"}"#).unwrap();
        assert_eq!(plan.objective, "x");
        assert_eq!(plan.schema_version, "1.0");
    }

    #[test]
    fn test_extracts_embedded_object() {
        let raw = "Sure! Here is the plan:\n```json\n{\"objective\":\"y\",\"files\":[{\"path\":\"a.py\"}]}\n```";
        let plan = parse_plan_response(raw).unwrap();
        assert_eq!(plan.objective, "y");
        assert_eq!(plan.allowed_files(), vec!["a.py".to_string()]);
    }

    #[test]
    fn test_rejects_empty_and_non_json() {
        assert!(matches!(
            parse_plan_response("   "),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_plan_response("no braces here"),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_plan_response("} backwards {"),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_planner_passes_context_and_keeps_raw_text() {
        let generator = ScriptedGenerator::new().respond(r#"{"objective":"z"}"#);
        let planner = LlmPlanner::new(&generator)
            .with_context(Box::new(StaticContext("def f(): pass".into())));

        let out = planner.create_plan("rename f").unwrap();
        assert_eq!(out.raw_plan, r#"{"objective":"z"}"#);
        assert_eq!(out.context, "def f(): pass");
        assert_eq!(out.plan.schema_version, "1.0");

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PLANNER_SYSTEM_PROMPT);
        assert!(calls[0].1.contains("rename f"));
        assert!(calls[0].1.contains("def f(): pass"));
    }
}
