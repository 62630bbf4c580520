// Job Lifecycle - creation, state transitions, completion and retry

pub mod enqueue;
pub mod request;
pub mod retry;

#[cfg(test)]
mod lifecycle_test;

use crate::application::batch::finalize_batch;
use crate::config::SchedulerConfig;
use crate::domain::{
    ConfigInput, Job, JobId, JobMutation, JobState,
};
use crate::error::{AppError, Result};
use crate::port::{
    BatchRepository, CasGuard, ComputeProviderResolver, ContainerCatalog, GearCatalog,
    IdProvider, JobRepository, JobTicket, JobTicketRepository, TimeProvider,
};
use std::sync::Arc;
use tracing::{error, info};

/// Job Lifecycle Service
///
/// Every state change goes through `compare_and_swap` keyed on the state the
/// caller observed, so concurrent writers lose with a `Conflict` instead of
/// overwriting each other.
pub struct JobLifecycle {
    pub(crate) jobs: Arc<dyn JobRepository>,
    pub(crate) tickets: Arc<dyn JobTicketRepository>,
    pub(crate) batches: Arc<dyn BatchRepository>,
    pub(crate) gears: Arc<dyn GearCatalog>,
    pub(crate) containers: Arc<dyn ContainerCatalog>,
    pub(crate) providers: Arc<dyn ComputeProviderResolver>,
    pub(crate) id_provider: Arc<dyn IdProvider>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
    pub(crate) config: SchedulerConfig,
}

impl JobLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        tickets: Arc<dyn JobTicketRepository>,
        batches: Arc<dyn BatchRepository>,
        gears: Arc<dyn GearCatalog>,
        containers: Arc<dyn ContainerCatalog>,
        providers: Arc<dyn ComputeProviderResolver>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            tickets,
            batches,
            gears,
            containers,
            providers,
            id_provider,
            time_provider,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    /// Persist an enqueued job as pending
    pub async fn insert(&self, job: &Job) -> Result<JobId> {
        if job.state != JobState::Pending {
            return Err(AppError::InvalidState(format!(
                "Only pending jobs can be inserted, job {} is {}",
                job.id, job.state
            )));
        }
        self.jobs.insert(job).await?;
        info!(
            job_id = %job.id,
            gear = %job.gear_info.name,
            destination = %job.destination,
            "Job enqueued"
        );
        Ok(job.id.clone())
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        self.jobs
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    /// Attach a dispatch request (and job api keys) to a job entering `running`
    pub(crate) async fn materialize_request(&self, job: &mut Job) -> Result<()> {
        let gear = self
            .gears
            .get_gear(&job.gear_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", job.gear_id)))?;

        for input in job.config.inputs.values_mut() {
            if let ConfigInput::ApiKey { key } = input {
                if key.is_none() {
                    *key = Some(self.id_provider.generate_id());
                }
            }
        }

        job.request = Some(request::generate_request(job, &gear)?);
        Ok(())
    }

    /// Validate and save a job mutation.
    ///
    /// Only pending and running jobs can be mutated. An empty mutation is a
    /// heartbeat that just refreshes `modified`.
    pub async fn mutate(&self, job: &Job, mutation: JobMutation) -> Result<Job> {
        if !matches!(job.state, JobState::Pending | JobState::Running) {
            return Err(AppError::InvalidState(format!(
                "Cannot mutate a job that is {}.",
                job.state
            )));
        }

        let now = self.time_provider.now_millis();
        let mut next = job.clone();

        match mutation.state {
            Some(state) => {
                next.transition(state, now)?;
                if state == JobState::Running && job.state != JobState::Running {
                    self.materialize_request(&mut next).await?;
                }
                if state != job.state {
                    info!(job_id = %job.id, from = %job.state, to = %state, "Transitioning job");
                }
            }
            None => next.modified = now,
        }
        if let Some(reason) = mutation.failure_reason {
            next.failure_reason = Some(reason);
        }

        let saved = self
            .jobs
            .compare_and_swap(&next, &CasGuard::in_state(job.state))
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("Job {} modification not saved", job.id))
            })?;

        if saved.state == JobState::Failed
            && job.state != JobState::Failed
            && self.config.retry_on_explicit_fail
        {
            if let Err(e) = self.retry(&saved, false, true).await {
                error!(job_id = %saved.id, error = %e, "Retry after explicit failure failed");
            }
        }

        if saved.state.is_terminal() && job.state != saved.state {
            if let Some(batch_id) = &saved.batch_id {
                if let Err(e) =
                    finalize_batch(self.batches.as_ref(), self.jobs.as_ref(), batch_id, now).await
                {
                    error!(job_id = %saved.id, batch_id = %batch_id, error = %e, "Batch finalization failed");
                }
            }
        }

        Ok(saved)
    }

    /// Load and mutate by id
    pub async fn mutate_by_id(&self, id: &JobId, mutation: JobMutation) -> Result<Job> {
        let job = self.get_job(id).await?;
        self.mutate(&job, mutation).await
    }

    pub async fn heartbeat(&self, id: &JobId) -> Result<Job> {
        self.mutate_by_id(id, JobMutation::heartbeat()).await
    }

    /// Mark a running job as completing; orphan scans skip ticketed jobs
    pub async fn prepare_complete(&self, id: &JobId) -> Result<JobTicket> {
        let job = self.get_job(id).await?;
        if job.state != JobState::Running {
            return Err(AppError::InvalidState(format!(
                "Job {} is {}, only running jobs can be completed",
                id, job.state
            )));
        }

        let ticket = JobTicket {
            id: self.id_provider.generate_id(),
            job_id: job.id.clone(),
            created: self.time_provider.now_millis(),
        };
        self.tickets.create(&ticket).await?;
        info!(job_id = %job.id, ticket_id = %ticket.id, "Job completion ticket created");
        Ok(ticket)
    }

    /// Finish a ticketed job as complete or failed
    pub async fn complete(
        &self,
        ticket_id: &str,
        success: bool,
        failure_reason: Option<String>,
    ) -> Result<Job> {
        let ticket = self
            .tickets
            .find(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job ticket {} not found", ticket_id)))?;

        let mutation = if success {
            JobMutation::to_state(JobState::Complete)
        } else {
            JobMutation {
                state: Some(JobState::Failed),
                failure_reason,
            }
        };

        let job = self.mutate_by_id(&ticket.job_id, mutation).await?;
        self.tickets.remove(&ticket.id).await?;
        Ok(job)
    }
}
