// Domain Layer - Pure business logic and entities

pub mod batch;
pub mod container;
pub mod error;
pub mod event;
pub mod gear;
pub mod job;
pub mod pattern;
pub mod queue;
pub mod rule;

// Re-exports
pub use batch::{
    resolve_batch_state, AnalysisTemplate, Batch, BatchProposal, BatchState, OptionalInputPolicy,
    ProposedJob,
};
pub use container::{
    AccessLevel, Container, ContainerId, ContainerKind, ContainerRef, FileEntry, FileRef,
    Permission, UserId,
};
pub use error::DomainError;
pub use event::{ContainerEvent, ContainerEventKind, EventReport};
pub use gear::{
    ConfigField, FileInputSpec, FileMatcher, Gear, GearCategory, GearId, GearInfo,
    GearInput,
};
pub use job::{
    BatchId, ConfigInput, ContextValue, InputLocation, Job, JobConfig, JobId, JobInput,
    JobMutation, JobOrigin, JobProfile, JobRequest, JobSpec, JobState, OriginKind,
    RequestEndpoint, RequestTarget,
};
pub use queue::{AskQuery, AskResult, AskReturn, JobFilter, QueueLists, StateCounts};
pub use rule::{MatchKind, Rule, RuleId, RuleMatcher, SITE_SCOPE};
