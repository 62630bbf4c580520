// Batch Domain Model

use crate::domain::container::{ContainerRef, FileRef};
use crate::domain::error::{DomainError, Result};
use crate::domain::gear::GearId;
use crate::domain::job::{BatchId, JobId, JobOrigin, JobSpec, JobState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Running,
    Cancelled,
    Complete,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Running => "running",
            BatchState::Cancelled => "cancelled",
            BatchState::Complete => "complete",
            BatchState::Failed => "failed",
        }
    }

    /// The single state a batch must be in to enter `self`
    pub fn required_prior(&self) -> Option<BatchState> {
        match self {
            BatchState::Running => Some(BatchState::Pending),
            BatchState::Cancelled | BatchState::Complete | BatchState::Failed => {
                Some(BatchState::Running)
            }
            BatchState::Pending => None,
        }
    }

    pub fn check_transition(&self, next: BatchState) -> Result<()> {
        if next.required_prior() == Some(*self) {
            Ok(())
        } else {
            Err(DomainError::InvalidBatchTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How optional gear inputs weigh in classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionalInputPolicy {
    /// Optional inputs never make a container ambiguous or unmatched, and are left unset
    #[default]
    Ignored,
    /// Optional inputs may be ambiguous, and are filled when a candidate exists
    Flexible,
    /// Optional inputs are treated as required
    Required,
}

/// Concrete job a gear proposal will enqueue on run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedJob {
    pub inputs: BTreeMap<String, FileRef>,
    pub destination: ContainerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchProposal {
    Gear {
        #[serde(default)]
        analysis: AnalysisTemplate,
        #[serde(default)]
        tags: Vec<String>,
        jobs: Vec<ProposedJob>,
    },
    Preconstructed {
        jobs: Vec<JobSpec>,
    },
}

/// Group of jobs with an aggregate state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub state: BatchState,
    pub origin: JobOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gear_id: Option<GearId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    pub proposal: BatchProposal,
    #[serde(default)]
    pub optional_input_policy: OptionalInputPolicy,
    #[serde(default)]
    pub matched: Vec<ContainerRef>,
    #[serde(default)]
    pub not_matched: Vec<ContainerRef>,
    #[serde(default)]
    pub ambiguous: Vec<ContainerRef>,
    /// Filled once the batch runs
    #[serde(default)]
    pub job_ids: Vec<JobId>,
    pub created: i64,
    pub modified: i64,
}

/// Aggregate outcome of a batch's job states; `None` while unresolved
pub fn resolve_batch_state(job_states: &[JobState]) -> Option<BatchState> {
    if job_states.iter().any(|s| !s.is_terminal()) {
        return None;
    }
    if job_states.iter().any(|s| *s != JobState::Failed) {
        Some(BatchState::Complete)
    } else {
        Some(BatchState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_transitions() {
        assert!(BatchState::Pending.check_transition(BatchState::Running).is_ok());
        assert!(BatchState::Running.check_transition(BatchState::Complete).is_ok());
        assert!(BatchState::Running.check_transition(BatchState::Cancelled).is_ok());
        assert!(BatchState::Pending.check_transition(BatchState::Cancelled).is_err());
        assert!(BatchState::Complete.check_transition(BatchState::Running).is_err());
        assert!(BatchState::Running.check_transition(BatchState::Running).is_err());
    }

    #[test]
    fn test_resolve_batch_state() {
        use JobState::*;
        assert_eq!(resolve_batch_state(&[Complete, Failed]), Some(BatchState::Complete));
        assert_eq!(resolve_batch_state(&[Failed, Failed]), Some(BatchState::Failed));
        assert_eq!(resolve_batch_state(&[Cancelled, Failed]), Some(BatchState::Complete));
        assert_eq!(resolve_batch_state(&[Complete, Running]), None);
        assert_eq!(resolve_batch_state(&[Pending]), None);
    }
}
