// Scheduler - work dispatch, queue statistics, orphan scanning and job search

use crate::application::batch::finalize_batch;
use crate::application::lifecycle::JobLifecycle;
use crate::domain::{
    AccessLevel, AskQuery, AskResult, ContainerRef, Job, JobFilter, JobId, JobState, StateCounts,
};
use crate::error::{AppError, Result};
use crate::port::{CasGuard, ContainerSearch};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reason stamped on jobs failed by the orphan scan
pub const HEARTBEAT_EXPIRED: &str = "heartbeat expired";

/// Scheduler Service (request/response; owns no background state)
pub struct Scheduler {
    lifecycle: Arc<JobLifecycle>,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<JobLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    /// Ask the queue for work and/or statistics
    pub async fn ask(&self, query: &AskQuery) -> Result<AskResult> {
        let want = &query.want;
        if want.jobs == 0 && !want.states {
            return Err(AppError::Validation(
                "Not asking for work or stats".to_string(),
            ));
        }

        let filter = query.filter();
        let mut result = AskResult::default();
        if want.jobs > 0 {
            result.jobs = Some(self.start_jobs(want.jobs, &filter, want.peek).await?);
        }
        if want.states {
            result.states = Some(self.job_states(&filter).await?);
        }
        Ok(result)
    }

    /// Claim (or peek at) the oldest pending job matching `filter`
    pub async fn start_jobs(&self, max_jobs: u32, filter: &JobFilter, peek: bool) -> Result<Vec<Job>> {
        if max_jobs > 1 {
            return Err(AppError::Validation(
                "Starting multiple jobs not supported".to_string(),
            ));
        }
        if max_jobs < 1 {
            return Err(AppError::Validation(
                "Must start at least one job".to_string(),
            ));
        }

        let lifecycle = &self.lifecycle;
        let claimed = if peek {
            lifecycle.jobs.peek_next(filter).await?
        } else {
            let now = lifecycle.time_provider.now_millis();
            lifecycle.jobs.claim_next(filter, now).await?
        };
        let Some(mut job) = claimed else {
            return Ok(Vec::new());
        };

        if peek {
            let gear = lifecycle.gears.get_gear(&job.gear_id).await?;
            if gear.is_some_and(|g| g.has_api_key_input()) {
                debug!(job_id = %job.id, "Gears with api-key inputs cannot be peeked");
                return Ok(Vec::new());
            }
        }

        if job.request.is_some() {
            info!(job_id = %job.id, "Job already has a request, so not generating");
            return Ok(vec![job]);
        }

        lifecycle.materialize_request(&mut job).await?;
        if peek {
            return Ok(vec![job]);
        }

        let saved = lifecycle
            .jobs
            .compare_and_swap(&job, &CasGuard::in_state(JobState::Running))
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "Marked job {} as running but could not save its request",
                    job.id
                ))
            })?;

        info!(
            job_id = %saved.id,
            gear = %saved.gear_info.name,
            version = %saved.gear_info.version,
            "Starting job"
        );
        Ok(vec![saved])
    }

    /// Job counts per state under `filter`, all states present
    pub async fn job_states(&self, filter: &JobFilter) -> Result<StateCounts> {
        self.lifecycle.jobs.count_by_state(filter).await
    }

    /// Fail and retry running jobs that stopped heartbeating.
    ///
    /// Jobs holding a completion ticket are skipped. Returns the number of
    /// jobs orphaned.
    pub async fn scan_for_orphans(&self) -> Result<usize> {
        let lifecycle = &self.lifecycle;
        let mut orphaned = 0;
        let mut skipped: Vec<JobId> = Vec::new();

        loop {
            let now = lifecycle.time_provider.now_millis();
            let cutoff = now - lifecycle.config.heartbeat_window_ms;

            let Some(candidate) = lifecycle.jobs.find_stale_running(cutoff, &skipped).await? else {
                break;
            };

            if !lifecycle.tickets.find_by_job(&candidate.id).await?.is_empty() {
                debug!(job_id = %candidate.id, "Job is completing, not orphaning");
                skipped.push(candidate.id);
                continue;
            }

            let mut failed = candidate.clone();
            failed.transition(JobState::Failed, now)?;
            failed.failure_reason = Some(HEARTBEAT_EXPIRED.to_string());

            let Some(saved) = lifecycle
                .jobs
                .compare_and_swap(&failed, &CasGuard::stale(JobState::Running, cutoff))
                .await?
            else {
                info!(job_id = %candidate.id, "Job heartbeat during orphan scan, not orphaned");
                skipped.push(candidate.id);
                continue;
            };

            orphaned += 1;
            info!(job_id = %saved.id, "Job did not report in for a long time and was failed");

            match lifecycle.retry(&saved, false, true).await {
                Ok(Some(new_id)) => info!(job_id = %saved.id, new_job_id = %new_id, "Retried orphaned job"),
                Ok(None) => info!(job_id = %saved.id, "Job retries exceeded maximum allowed"),
                Err(e) => error!(job_id = %saved.id, error = %e, "Could not retry orphaned job"),
            }

            if let Some(batch_id) = &saved.batch_id {
                if let Err(e) =
                    finalize_batch(lifecycle.batches.as_ref(), lifecycle.jobs.as_ref(), batch_id, now)
                        .await
                {
                    error!(job_id = %saved.id, batch_id = %batch_id, error = %e, "Batch finalization failed");
                }
            }
        }

        Ok(orphaned)
    }

    /// Newest-first jobs referencing any of `containers`.
    ///
    /// With a `uid`, file inputs on containers the user cannot read are
    /// dropped from each job (and from its config block); the jobs themselves
    /// are always returned.
    pub async fn search_by_containers(
        &self,
        containers: Vec<ContainerRef>,
        states: Vec<JobState>,
        tags: Vec<String>,
        skip: u32,
        uid: Option<&str>,
    ) -> Result<Vec<Job>> {
        let lifecycle = &self.lifecycle;
        let search = ContainerSearch {
            containers,
            states,
            tags,
            limit: lifecycle.config.search_limit,
            skip,
        };
        let mut jobs = lifecycle.jobs.search_by_containers(&search).await?;

        let Some(uid) = uid else {
            return Ok(jobs);
        };

        let referenced: BTreeSet<ContainerRef> = jobs
            .iter()
            .flat_map(|j| j.file_inputs().map(|(_, f)| f.container()))
            .collect();
        let mut readable: HashMap<ContainerRef, bool> = HashMap::new();
        for container in referenced {
            let ok = lifecycle
                .containers
                .check_access(&container, uid, AccessLevel::ReadOnly)
                .await?;
            readable.insert(container, ok);
        }

        for job in &mut jobs {
            let hidden: Vec<String> = job
                .file_inputs()
                .filter(|(_, f)| !readable.get(&f.container()).copied().unwrap_or(false))
                .map(|(name, _)| name.clone())
                .collect();
            for name in hidden {
                job.inputs.remove(&name);
                job.config.inputs.remove(&name);
            }
        }
        Ok(jobs)
    }
}
