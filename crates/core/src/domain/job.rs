// Job Domain Model

use crate::domain::container::{ContainerId, ContainerKind, ContainerRef, FileRef};
use crate::domain::error::{DomainError, Result};
use crate::domain::gear::{GearId, GearInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Job ID (UUID v4)
pub type JobId = String;

/// Batch ID (UUID v4)
pub type BatchId = String;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Failed,
    Complete,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Running,
        JobState::Failed,
        JobState::Complete,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Failed => "failed",
            JobState::Complete => "complete",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobState::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Failed | JobState::Complete | JobState::Cancelled
        )
    }

    /// Legal successor check. Same-state transitions are heartbeat no-ops.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Cancelled)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Complete)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved context value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextValue {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Job input, discriminated by `base`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "kebab-case")]
pub enum JobInput {
    File(FileRef),
    Context(ContextValue),
    ApiKey,
}

impl JobInput {
    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            JobInput::File(file) => Some(file),
            _ => None,
        }
    }
}

/// Who or what created the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    User,
    Device,
    Job,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOrigin {
    #[serde(rename = "type")]
    pub kind: OriginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl JobOrigin {
    pub fn system() -> Self {
        Self {
            kind: OriginKind::System,
            id: None,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::User,
            id: Some(id.into()),
        }
    }

    pub fn device(id: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::Device,
            id: Some(id.into()),
        }
    }

    /// Uid to enforce permissions with; only user origins carry one
    pub fn uid(&self) -> Option<&str> {
        match self.kind {
            OriginKind::User => self.id.as_deref(),
            _ => None,
        }
    }
}

/// Location an input is mounted at inside the gear container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLocation {
    pub name: String,
    pub path: String,
}

/// Per-input entry of the job config block handed to the gear
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "kebab-case")]
pub enum ConfigInput {
    File {
        hierarchy: ContainerRef,
        location: InputLocation,
        /// Projection of the file document (type, modality, classification, ...)
        object: Value,
    },
    Context {
        found: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    ApiKey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

/// Config block materialized at enqueue time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub inputs: BTreeMap<String, ConfigInput>,
    pub destination: ContainerRef,
}

/// One transfer endpoint of a dispatch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEndpoint {
    #[serde(rename = "type")]
    pub scheme: String,
    pub uri: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTarget {
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Dispatch request consumed by compute agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub inputs: Vec<RequestEndpoint>,
    pub target: RequestTarget,
    pub outputs: Vec<RequestEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProfile {
    #[serde(default)]
    pub total_input_files: u64,
    #[serde(default)]
    pub total_input_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_ms: Option<i64>,
}

/// Caller-supplied description of a job to enqueue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub gear_id: GearId,
    #[serde(default)]
    pub inputs: BTreeMap<String, FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ContainerRef>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Partial update applied through `Mutate`; an empty delta is a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMutation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobMutation {
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn to_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Failed),
            failure_reason: Some(reason.into()),
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub gear_id: GearId,
    pub gear_info: GearInfo,
    pub state: JobState,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_job_id: Option<JobId>,

    pub inputs: BTreeMap<String, JobInput>,
    pub destination: ContainerRef,
    pub config: JobConfig,
    #[serde(default)]
    pub tags: Vec<String>,
    pub origin: JobOrigin,
    pub compute_provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Ancestors of the destination, destination included
    #[serde(default)]
    pub parents: BTreeMap<ContainerKind, ContainerId>,
    /// Captured at creation, never refreshed
    #[serde(default)]
    pub related_container_ids: Vec<ContainerId>,

    pub created: i64, // epoch ms
    pub modified: i64,
    #[serde(default)]
    pub transitions: BTreeMap<JobState, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<JobRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub profile: JobProfile,
}

impl Job {
    /// Same gear, inputs and destination
    pub fn intention_equals(&self, other: &Job) -> bool {
        self.gear_id == other.gear_id
            && self.inputs == other.inputs
            && self.destination == other.destination
    }

    pub fn file_inputs(&self) -> impl Iterator<Item = (&String, &FileRef)> {
        self.inputs
            .iter()
            .filter_map(|(name, input)| input.as_file().map(|f| (name, f)))
    }

    /// Destination plus every container a file input lives on
    pub fn container_refs(&self) -> Vec<ContainerRef> {
        let mut refs = vec![self.destination.clone()];
        for (_, file) in self.file_inputs() {
            let container = file.container();
            if !refs.contains(&container) {
                refs.push(container);
            }
        }
        refs
    }

    pub fn group(&self) -> Option<&str> {
        self.parents.get(&ContainerKind::Group).map(String::as_str)
    }

    /// Move to `next`, stamping transition time and running duration
    pub fn transition(&mut self, next: JobState, now_millis: i64) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        if self.state == JobState::Running && next.is_terminal() {
            if let Some(started) = self.transitions.get(&JobState::Running) {
                self.profile.total_time_ms = Some(now_millis - started);
            }
        }

        if self.state != next {
            self.state = next;
            self.transitions.insert(next, now_millis);
        }
        self.modified = now_millis;
        Ok(())
    }
}
