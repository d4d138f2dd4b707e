//! Core types for the model collaborators

use patchloop_utils::error::LlmError;
use patchloop_utils::types::PlanDocument;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role of a message in a chat conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Text generation backend.
///
/// Calls block until the model has produced its full response.
pub trait Generator: Send + Sync {
    /// Generate a response for one system/user prompt pair.
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        (**self).generate(system, user)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        (**self).generate(system, user)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        (**self).generate(system, user)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// What a planner hands back for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerOutput {
    /// Response text as received from the model
    pub raw_plan: String,
    /// Parsed plan with `schema_version` stamped
    pub plan: PlanDocument,
    /// Context text the plan was produced with
    pub context: String,
}

/// Turns a natural-language request into a structured plan.
pub trait Planner: Send + Sync {
    fn create_plan(&self, request: &str) -> Result<PlannerOutput, LlmError>;
}

impl<P: Planner + ?Sized> Planner for Box<P> {
    fn create_plan(&self, request: &str) -> Result<PlannerOutput, LlmError> {
        (**self).create_plan(request)
    }
}

impl<P: Planner + ?Sized> Planner for Arc<P> {
    fn create_plan(&self, request: &str) -> Result<PlannerOutput, LlmError> {
        (**self).create_plan(request)
    }
}
