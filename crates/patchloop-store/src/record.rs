use chrono::{DateTime, Utc};
use patchloop_utils::types::{
    PlanDocument, PlanId, PlanStatus, SandboxResult, VerificationStatus,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle record of one plan. Mutated in place by every workflow stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan_id: PlanId,
    pub request: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: PlanStatus,
    /// Context text used for every prompt of this plan
    #[serde(default)]
    pub context: String,
    /// Planner response as received
    #[serde(default)]
    pub raw_plan: String,
    pub plan: PlanDocument,
    #[serde(default)]
    pub implementation: ImplementationState,
    #[serde(default)]
    pub verification: VerificationState,
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

impl PlanRecord {
    #[must_use]
    pub fn new(plan_id: PlanId, request: impl Into<String>, plan: PlanDocument) -> Self {
        Self {
            plan_id,
            request: request.into(),
            created_at: Utc::now(),
            status: PlanStatus::Planned,
            context: String::new(),
            raw_plan: String::new(),
            plan,
            implementation: ImplementationState::default(),
            verification: VerificationState::default(),
            commits: Vec::new(),
        }
    }

    /// Round number the next verification attempt will get
    #[must_use]
    pub fn next_round(&self) -> u32 {
        self.verification
            .attempts
            .iter()
            .map(|a| a.round)
            .max()
            .unwrap_or(0)
            + 1
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            plan_id: self.plan_id.clone(),
            request: self.request.clone(),
            created_at: self.created_at,
            status: self.status,
            attempts: self.implementation.attempts.len(),
            rounds: self.verification.attempts.len(),
            has_patch: self.implementation.final_patch.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationState {
    pub attempts: Vec<ImplementationAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_patch: Option<String>,
    /// Generator outputs that failed validation; never counted as attempts
    #[serde(default)]
    pub rejections: Vec<Rejection>,
}

/// A validated patch produced by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationAttempt {
    pub timestamp: DateTime<Utc>,
    pub raw_response: String,
    /// Sorted, unique touched paths
    pub files: Vec<String>,
    pub patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationState {
    pub attempts: Vec<VerificationAttempt>,
    pub status: VerificationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAttempt {
    /// Strictly increasing per plan, never reused
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub status: VerificationStatus,
    pub summary: String,
    pub details: SandboxResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitScope {
    All,
    Files,
    Hunks,
    Revert,
}

impl fmt::Display for CommitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Files => "files",
            Self::Hunks => "hunks",
            Self::Revert => "revert",
        };
        f.write_str(s)
    }
}

/// A commit the engine created on the working tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub scope: CommitScope,
    pub timestamp: DateTime<Utc>,
}

/// Listing row for `patchloop list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: PlanId,
    pub request: String,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub attempts: usize,
    pub rounds: usize,
    pub has_patch: bool,
}
