//! RPC Method Handlers
//!
//! Thin adapters from wire types onto the application services.

use crate::error::to_rpc_error;
use crate::types::{
    resolve_origin, AddRuleRequest, AskRequest, BatchIdRequest, BatchResponse,
    CancelBatchResponse, CompleteRequest, CopyRulesResponse, EnqueueRequest, JobIdRequest,
    MutateRequest, ProjectRequest, ProposeJobsRequest, ProposeRequest, PublishGearRequest,
    RetryRequest, RetryResponse, SearchRequest, TicketResponse,
};
use gearflow_core::application::{
    BatchCoordinator, ContainerEventBus, GearPublisher, JobLifecycle, ProposalOutcome,
    RuleEngine, Scheduler,
};
use gearflow_core::domain::{
    AskResult, Batch, ContainerEvent, EventReport, Gear, Job, Rule,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::{debug, info};

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// Application services the RPC surface dispatches to
#[derive(Clone)]
pub struct Services {
    pub lifecycle: Arc<JobLifecycle>,
    pub scheduler: Arc<Scheduler>,
    pub batches: Arc<BatchCoordinator>,
    pub rules: Arc<RuleEngine>,
    pub gears: Arc<GearPublisher>,
    pub events: Arc<ContainerEventBus>,
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    services: Services,
}

impl RpcHandler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// jobs.enqueue.v1
    pub async fn enqueue(&self, params: EnqueueRequest) -> RpcResult<Job> {
        let uid = params.uid.as_deref();
        let origin = resolve_origin(params.origin, uid);
        let job = self
            .services
            .lifecycle
            .enqueue_and_insert(params.job, origin, uid)
            .await
            .map_err(to_rpc_error)?;
        info!(job_id = %job.id, gear = %job.gear_info.name, "Job enqueued via RPC");
        Ok(job)
    }

    /// jobs.get.v1
    pub async fn get_job(&self, params: JobIdRequest) -> RpcResult<Job> {
        self.services
            .lifecycle
            .get_job(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.mutate.v1
    pub async fn mutate(&self, params: MutateRequest) -> RpcResult<Job> {
        debug!(job_id = %params.job_id, mutation = ?params.mutation, "Mutate requested");
        self.services
            .lifecycle
            .mutate_by_id(&params.job_id, params.mutation)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.heartbeat.v1
    pub async fn heartbeat(&self, params: JobIdRequest) -> RpcResult<Job> {
        self.services
            .lifecycle
            .heartbeat(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.retry.v1
    pub async fn retry(&self, params: RetryRequest) -> RpcResult<RetryResponse> {
        let job_id = self
            .services
            .lifecycle
            .retry_by_id(&params.job_id, params.force)
            .await
            .map_err(to_rpc_error)?;
        Ok(RetryResponse { job_id })
    }

    /// jobs.prepare_complete.v1
    pub async fn prepare_complete(&self, params: JobIdRequest) -> RpcResult<TicketResponse> {
        let ticket = self
            .services
            .lifecycle
            .prepare_complete(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(TicketResponse {
            ticket_id: ticket.id,
            job_id: ticket.job_id,
        })
    }

    /// jobs.complete.v1
    pub async fn complete(&self, params: CompleteRequest) -> RpcResult<Job> {
        self.services
            .lifecycle
            .complete(&params.ticket_id, params.success, params.failure_reason)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.search.v1
    pub async fn search(&self, params: SearchRequest) -> RpcResult<Vec<Job>> {
        self.services
            .scheduler
            .search_by_containers(
                params.containers,
                params.states,
                params.tags,
                params.skip,
                params.uid.as_deref(),
            )
            .await
            .map_err(to_rpc_error)
    }

    /// queue.ask.v1
    pub async fn ask(&self, params: AskRequest) -> RpcResult<AskResult> {
        let query = params.into_query();
        self.services
            .scheduler
            .ask(&query)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.propose.v1
    pub async fn propose_batch(&self, params: ProposeRequest) -> RpcResult<ProposalOutcome> {
        let uid = params.uid.as_deref();
        let origin = resolve_origin(params.origin, uid);
        self.services
            .batches
            .propose(params.proposal, origin, uid)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.propose_jobs.v1
    pub async fn propose_batch_jobs(&self, params: ProposeJobsRequest) -> RpcResult<Batch> {
        let uid = params.uid.as_deref();
        let origin = resolve_origin(params.origin, uid);
        self.services
            .batches
            .propose_with_jobs(params.jobs, origin, uid)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.run.v1
    pub async fn run_batch(&self, params: BatchIdRequest) -> RpcResult<BatchResponse> {
        let (batch, jobs) = self
            .services
            .batches
            .run(&params.batch_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(BatchResponse { batch, jobs })
    }

    /// batch.cancel.v1
    pub async fn cancel_batch(&self, params: BatchIdRequest) -> RpcResult<CancelBatchResponse> {
        let cancelled_jobs = self
            .services
            .batches
            .cancel(&params.batch_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(CancelBatchResponse {
            batch_id: params.batch_id,
            cancelled_jobs,
        })
    }

    /// batch.get.v1
    pub async fn get_batch(&self, params: BatchIdRequest) -> RpcResult<BatchResponse> {
        let batches = &self.services.batches;
        let batch = batches.get(&params.batch_id).await.map_err(to_rpc_error)?;
        let jobs = batches.jobs(&batch).await.map_err(to_rpc_error)?;
        Ok(BatchResponse { batch, jobs })
    }

    /// events.publish.v1
    pub async fn publish_event(&self, event: ContainerEvent) -> RpcResult<EventReport> {
        Ok(self.services.events.publish(&event).await)
    }

    /// rules.add.v1
    pub async fn add_rule(&self, params: AddRuleRequest) -> RpcResult<Rule> {
        self.services
            .rules
            .add_rule(&params.project_id, params.rule)
            .await
            .map_err(to_rpc_error)
    }

    /// rules.list.v1
    pub async fn list_rules(&self, params: ProjectRequest) -> RpcResult<Vec<Rule>> {
        self.services
            .rules
            .list_rules(&params.project_id)
            .await
            .map_err(to_rpc_error)
    }

    /// rules.copy_site.v1
    pub async fn copy_site_rules(&self, params: ProjectRequest) -> RpcResult<CopyRulesResponse> {
        let copied = self
            .services
            .rules
            .copy_site_rules(&params.project_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(CopyRulesResponse {
            project_id: params.project_id,
            copied,
        })
    }

    /// gears.publish.v1
    pub async fn publish_gear(&self, params: PublishGearRequest) -> RpcResult<Gear> {
        self.services
            .gears
            .publish_gear(params.gear)
            .await
            .map_err(to_rpc_error)
    }
}
