// Retry Use Case

use super::enqueue::spec_from_job;
use super::JobLifecycle;
use crate::domain::{ContainerKind, Job, JobId, JobState};
use crate::error::{AppError, Result};
use crate::port::CasGuard;
use tracing::{error, info, warn};

impl JobLifecycle {
    /// Respawn a finished job as a fresh pending attempt.
    ///
    /// Returns `None` when the attempt ceiling was reached and `force` is off;
    /// the source job then stays permanently failed.
    ///
    /// # Arguments
    ///
    /// * `force` - Ignore `max_attempts`
    /// * `only_failed` - Refuse complete / cancelled sources
    pub async fn retry(&self, job: &Job, force: bool, only_failed: bool) -> Result<Option<JobId>> {
        if job.attempt >= self.config.max_attempts && !force {
            info!(
                job_id = %job.id,
                attempts = job.attempt,
                "Permanently failed job"
            );
            return Ok(None);
        }

        match job.state {
            JobState::Failed => {}
            JobState::Complete | JobState::Cancelled if !only_failed => {}
            JobState::Complete | JobState::Cancelled => {
                return Err(AppError::InvalidState(format!(
                    "Can only retry a job that is failed, job {} is {}",
                    job.id, job.state
                )))
            }
            JobState::Pending | JobState::Running => {
                return Err(AppError::InvalidState(format!(
                    "Can not retry {} job {}",
                    job.state, job.id
                )))
            }
        }

        let request = job.request.clone().ok_or_else(|| {
            AppError::PreconditionFailed(format!("Cannot retry job {} without a request", job.id))
        })?;

        if let Some(found) = self.jobs.find_retry_of(&job.id).await? {
            return Err(AppError::Conflict(format!(
                "Job {} has already been retried as {}",
                job.id, found.id
            )));
        }

        let mut new_job = self
            .enqueue(spec_from_job(job), job.origin.clone(), None)
            .await?;
        new_job.previous_job_id = Some(job.id.clone());
        new_job.attempt = job.attempt + 1;

        // Endpoints embed the job id (config.json and the output uri)
        let mut request = request;
        for endpoint in request.inputs.iter_mut().chain(request.outputs.iter_mut()) {
            endpoint.uri = endpoint.uri.replace(&job.id, &new_job.id);
        }
        new_job.request = Some(request);

        // Claim the source first: of two racing retries only one gets past here
        let mut source = job.clone();
        source.retried = Some(new_job.created);
        let stamped = self
            .jobs
            .compare_and_swap(&source, &CasGuard::unretried(job.state))
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("Job {} is being retried concurrently", job.id))
            })?;

        if let Err(e) = self.jobs.insert(&new_job).await {
            self.release_retried(stamped).await;
            return Err(e);
        }
        info!(
            job_id = %job.id,
            new_job_id = %new_job.id,
            attempt = new_job.attempt,
            "Respawned job"
        );

        if new_job.destination.kind == ContainerKind::Analysis {
            self.containers
                .set_analysis_job(&new_job.destination.id, &new_job.id)
                .await?;
        }

        if let Some(batch_id) = &job.batch_id {
            match self.batches.replace_job_id(batch_id, &job.id, &new_job.id).await {
                Ok(()) => info!(batch_id = %batch_id, old = %job.id, new = %new_job.id, "Updated batch job list"),
                Err(e) => warn!(batch_id = %batch_id, error = %e, "Could not relink batch job"),
            }
        }

        Ok(Some(new_job.id))
    }

    /// Clear the `retried` stamp of a source whose respawn was never stored
    async fn release_retried(&self, mut source: Job) {
        source.retried = None;
        let guard = CasGuard::in_state(source.state);
        match self.jobs.compare_and_swap(&source, &guard).await {
            Ok(Some(_)) => warn!(job_id = %source.id, "Respawn not stored, source job can be retried again"),
            Ok(None) => warn!(job_id = %source.id, "Respawn not stored and source job moved on"),
            Err(e) => error!(job_id = %source.id, error = %e, "Could not clear retried marker"),
        }
    }

    pub async fn retry_by_id(&self, id: &JobId, force: bool) -> Result<Option<JobId>> {
        let job = self.get_job(id).await?;
        self.retry(&job, force, true).await
    }
}
