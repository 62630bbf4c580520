//! RPC Request/Response Types
//!
//! Parameters are passed by name. Callers identify themselves with an
//! optional `uid`; permission checks apply only when one is given.

use gearflow_core::application::ProposeBatchRequest;
use gearflow_core::domain::queue::legacy_tag_parse;
use gearflow_core::domain::{
    AskQuery, Batch, ContainerRef, Gear, Job, JobId, JobMutation, JobOrigin, JobSpec, JobState,
    Rule,
};
use serde::{Deserialize, Serialize};

/// Method names, versioned so the wire contract can evolve side by side
pub mod method {
    pub const JOBS_ENQUEUE: &str = "jobs.enqueue.v1";
    pub const JOBS_GET: &str = "jobs.get.v1";
    pub const JOBS_MUTATE: &str = "jobs.mutate.v1";
    pub const JOBS_HEARTBEAT: &str = "jobs.heartbeat.v1";
    pub const JOBS_RETRY: &str = "jobs.retry.v1";
    pub const JOBS_PREPARE_COMPLETE: &str = "jobs.prepare_complete.v1";
    pub const JOBS_COMPLETE: &str = "jobs.complete.v1";
    pub const JOBS_SEARCH: &str = "jobs.search.v1";
    pub const QUEUE_ASK: &str = "queue.ask.v1";
    pub const BATCH_PROPOSE: &str = "batch.propose.v1";
    pub const BATCH_PROPOSE_JOBS: &str = "batch.propose_jobs.v1";
    pub const BATCH_RUN: &str = "batch.run.v1";
    pub const BATCH_CANCEL: &str = "batch.cancel.v1";
    pub const BATCH_GET: &str = "batch.get.v1";
    pub const EVENTS_PUBLISH: &str = "events.publish.v1";
    pub const RULES_ADD: &str = "rules.add.v1";
    pub const RULES_LIST: &str = "rules.list.v1";
    pub const RULES_COPY_SITE: &str = "rules.copy_site.v1";
    pub const GEARS_PUBLISH: &str = "gears.publish.v1";
}

/// Origin of a write: explicit, else the calling user, else the system
pub fn resolve_origin(origin: Option<JobOrigin>, uid: Option<&str>) -> JobOrigin {
    match (origin, uid) {
        (Some(origin), _) => origin,
        (None, Some(uid)) => JobOrigin::user(uid),
        (None, None) => JobOrigin::system(),
    }
}

/// jobs.enqueue.v1
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub job: JobSpec,
    #[serde(default)]
    pub origin: Option<JobOrigin>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// jobs.get.v1, jobs.heartbeat.v1, jobs.prepare_complete.v1
#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    pub job_id: JobId,
}

/// jobs.mutate.v1
#[derive(Debug, Deserialize)]
pub struct MutateRequest {
    pub job_id: JobId,
    #[serde(flatten)]
    pub mutation: JobMutation,
}

/// jobs.retry.v1
#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryResponse {
    /// Id of the new attempt; absent when the attempt ceiling was reached
    pub job_id: Option<JobId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub job_id: JobId,
}

/// jobs.complete.v1
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub ticket_id: String,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// jobs.search.v1
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub containers: Vec<ContainerRef>,
    #[serde(default)]
    pub states: Vec<JobState>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub skip: u32,
    #[serde(default)]
    pub uid: Option<String>,
}

/// queue.ask.v1
///
/// Agents that still send a flat tag list get `!tag` entries folded into the
/// blacklist.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(flatten)]
    pub query: AskQuery,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AskRequest {
    pub fn into_query(self) -> AskQuery {
        let mut query = self.query;
        if !self.tags.is_empty() {
            let (white, black) = legacy_tag_parse(&self.tags);
            query.whitelist.tag.extend(white.tag);
            query.blacklist.tag.extend(black.tag);
        }
        query
    }
}

/// batch.propose.v1
#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    #[serde(flatten)]
    pub proposal: ProposeBatchRequest,
    #[serde(default)]
    pub origin: Option<JobOrigin>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// batch.propose_jobs.v1
#[derive(Debug, Deserialize)]
pub struct ProposeJobsRequest {
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub origin: Option<JobOrigin>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// batch.run.v1, batch.cancel.v1, batch.get.v1
#[derive(Debug, Deserialize)]
pub struct BatchIdRequest {
    pub batch_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub batch: Batch,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelBatchResponse {
    pub batch_id: String,
    pub cancelled_jobs: usize,
}

/// rules.add.v1
#[derive(Debug, Deserialize)]
pub struct AddRuleRequest {
    pub project_id: String,
    pub rule: Rule,
}

/// rules.list.v1, rules.copy_site.v1
#[derive(Debug, Deserialize)]
pub struct ProjectRequest {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyRulesResponse {
    pub project_id: String,
    pub copied: usize,
}

/// gears.publish.v1
#[derive(Debug, Deserialize)]
pub struct PublishGearRequest {
    pub gear: Gear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gearflow_core::domain::OriginKind;
    use serde_json::json;

    #[test]
    fn test_ask_request_folds_legacy_tags() {
        let req: AskRequest = serde_json::from_value(json!({
            "whitelist": {"group": ["scitran"]},
            "tags": ["qa", "!slow"],
            "return": {"jobs": 1}
        }))
        .unwrap();
        let query = req.into_query();
        assert_eq!(query.whitelist.group, vec!["scitran".to_string()]);
        assert_eq!(query.whitelist.tag, vec!["qa".to_string()]);
        assert_eq!(query.blacklist.tag, vec!["slow".to_string()]);
        assert_eq!(query.want.jobs, 1);
    }

    #[test]
    fn test_mutate_request_flattens_mutation() {
        let req: MutateRequest = serde_json::from_value(json!({
            "job_id": "j1",
            "state": "failed",
            "failure_reason": "oom"
        }))
        .unwrap();
        assert_eq!(req.mutation, JobMutation::failed("oom"));

        let heartbeat: MutateRequest = serde_json::from_value(json!({"job_id": "j1"})).unwrap();
        assert_eq!(heartbeat.mutation, JobMutation::heartbeat());
    }

    #[test]
    fn test_resolve_origin() {
        assert_eq!(resolve_origin(None, None).kind, OriginKind::System);
        let user = resolve_origin(None, Some("admin@example.com"));
        assert_eq!(user.uid(), Some("admin@example.com"));
        let device = resolve_origin(Some(JobOrigin::device("scanner")), Some("admin@example.com"));
        assert_eq!(device.kind, OriginKind::Device);
    }
}
