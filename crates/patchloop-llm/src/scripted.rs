//! Deterministic collaborators for tests.

use patchloop_utils::error::LlmError;
use patchloop_utils::types::{PLAN_SCHEMA_VERSION, PlanDocument};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::{Generator, Planner, PlannerOutput};

/// Replays queued responses in order and records every prompt pair.
///
/// Once the queue is empty every call fails with `LlmError::Transport`, which
/// makes an unexpected extra generation visible in tests.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn respond(self, text: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(text.into()));
        }
        self
    }

    #[must_use]
    pub fn fail(self, error: LlmError) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    /// `(system, user)` prompt pairs received so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system.to_string(), user.to_string()));
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(LlmError::Transport(
                    "scripted generator has no responses left".to_string(),
                ))
            })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Returns the same plan for every request.
#[derive(Debug)]
pub struct ScriptedPlanner {
    plan: PlanDocument,
    context: String,
    requests: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    #[must_use]
    pub fn new(mut plan: PlanDocument) -> Self {
        plan.schema_version = PLAN_SCHEMA_VERSION.to_string();
        Self {
            plan,
            context: String::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Planner for ScriptedPlanner {
    fn create_plan(&self, request: &str) -> Result<PlannerOutput, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.to_string());
        }
        let raw_plan = serde_json::to_string(&self.plan)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(PlannerOutput {
            raw_plan,
            plan: self.plan.clone(),
            context: self.context.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_replays_in_order_then_fails() {
        let generator = ScriptedGenerator::new()
            .respond("one")
            .fail(LlmError::Misconfiguration("boom".into()));

        assert_eq!(generator.generate("s", "u1").unwrap(), "one");
        assert!(matches!(
            generator.generate("s", "u2"),
            Err(LlmError::Misconfiguration(_))
        ));
        assert!(matches!(
            generator.generate("s", "u3"),
            Err(LlmError::Transport(_))
        ));
        assert_eq!(generator.call_count(), 3);
        assert_eq!(generator.calls()[1].1, "u2");
    }

    #[test]
    fn test_planner_stamps_schema_version() {
        let planner = ScriptedPlanner::new(PlanDocument::default()).with_context("ctx");
        let out = planner.create_plan("do it").unwrap();
        assert_eq!(out.plan.schema_version, "1.0");
        assert_eq!(out.context, "ctx");
        assert_eq!(planner.requests(), vec!["do it".to_string()]);
    }
}
