// Batch Coordinator - propose, run, cancel and resolve groups of jobs

use crate::application::lifecycle::JobLifecycle;
use crate::application::match_engine::{classify, resolve_context, Candidate};
use crate::domain::{
    resolve_batch_state, AccessLevel, AnalysisTemplate, Batch, BatchId, BatchProposal, BatchState,
    Container, ContainerKind, ContainerRef, GearCategory, GearId, Job, JobId, JobInput,
    JobMutation, JobOrigin, JobSpec, JobState, OptionalInputPolicy, ProposedJob,
};
use crate::error::{AppError, Result};
use crate::port::{
    BatchRepository, ContainerCatalog, GearCatalog, IdProvider, JobRepository, TimeProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Propose request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeBatchRequest {
    pub gear_id: GearId,
    /// Containers to search; all must share one kind
    pub targets: Vec<ContainerRef>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub analysis: AnalysisTemplate,
    #[serde(default)]
    pub optional_input_policy: OptionalInputPolicy,
}

/// Classification report; `batch` is set only when something matched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub batch: Option<Batch>,
    pub matched: Vec<ContainerRef>,
    pub not_matched: Vec<ContainerRef>,
    pub ambiguous: Vec<ContainerRef>,
    pub improper_permissions: Vec<ContainerRef>,
}

/// Batch Coordinator Service
pub struct BatchCoordinator {
    lifecycle: Arc<JobLifecycle>,
    batches: Arc<dyn BatchRepository>,
    gears: Arc<dyn GearCatalog>,
    containers: Arc<dyn ContainerCatalog>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl BatchCoordinator {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        batches: Arc<dyn BatchRepository>,
        gears: Arc<dyn GearCatalog>,
        containers: Arc<dyn ContainerCatalog>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            lifecycle,
            batches,
            gears,
            containers,
            id_provider,
            time_provider,
        }
    }

    pub async fn get(&self, id: &BatchId) -> Result<Batch> {
        self.batches
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch job {} not found", id)))
    }

    /// Jobs spawned by a batch, in run order
    pub async fn jobs(&self, batch: &Batch) -> Result<Vec<Job>> {
        self.lifecycle.jobs().find_by_ids(&batch.job_ids).await
    }

    /// Match `request.gear_id` against the containers under the targets.
    ///
    /// Gears without file inputs run once per session; others are classified
    /// per acquisition. A pending batch is stored only if something matched.
    pub async fn propose(
        &self,
        request: ProposeBatchRequest,
        origin: JobOrigin,
        uid: Option<&str>,
    ) -> Result<ProposalOutcome> {
        let gear = self
            .gears
            .get_gear(&request.gear_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", request.gear_id)))?;
        let config = self
            .gears
            .validate_config(&gear, &request.config.clone().unwrap_or_default())?;

        let Some(first) = request.targets.first() else {
            return Err(AppError::Validation("targets must not be empty.".to_string()));
        };
        if request.targets.iter().any(|t| t.kind != first.kind) {
            return Err(AppError::Validation(
                "targets must all be of same type.".to_string(),
            ));
        }

        let kind = if gear.has_file_inputs() {
            ContainerKind::Acquisition
        } else {
            ContainerKind::Session
        };

        let mut containers: Vec<Container> = Vec::new();
        for target in &request.targets {
            for container in self.containers.find_descendants(target, kind).await? {
                if !containers.iter().any(|c| c.id == container.id) {
                    containers.push(container);
                }
            }
        }
        if containers.is_empty() {
            return Err(AppError::NotFound(
                "Could not find necessary containers from targets.".to_string(),
            ));
        }

        let mut outcome = ProposalOutcome::default();
        let mut permitted = Vec::with_capacity(containers.len());
        for container in containers {
            match uid {
                Some(uid) if !container.has_access(uid, AccessLevel::ReadWrite) => {
                    outcome.improper_permissions.push(container.reference())
                }
                _ => permitted.push(container),
            }
        }
        if permitted.is_empty() {
            return Err(AppError::Permission(
                "User does not have write access to targets.".to_string(),
            ));
        }

        let mut proposed = Vec::new();
        if !gear.has_file_inputs() {
            for container in permitted {
                outcome.matched.push(container.reference());
                proposed.push(ProposedJob {
                    inputs: Default::default(),
                    destination: container.reference(),
                    compute_provider_id: None,
                });
            }
        } else {
            let mut candidates = Vec::with_capacity(permitted.len());
            for container in permitted {
                let context = if gear.has_context_inputs() {
                    resolve_context(self.containers.as_ref(), &container.reference(), uid).await?
                } else {
                    Map::new()
                };
                candidates.push(Candidate { container, context });
            }

            let classification = classify(&gear, candidates, request.optional_input_policy);
            for (container, inputs) in classification.matched {
                outcome.matched.push(container.reference());
                proposed.push(ProposedJob {
                    inputs: inputs
                        .into_iter()
                        .filter_map(|(name, input)| match input {
                            JobInput::File(file) => Some((name, file)),
                            _ => None,
                        })
                        .collect(),
                    destination: container.reference(),
                    compute_provider_id: None,
                });
            }
            outcome.not_matched = classification
                .not_matched
                .iter()
                .map(Container::reference)
                .collect();
            outcome.ambiguous = classification
                .ambiguous
                .iter()
                .map(Container::reference)
                .collect();
        }

        if proposed.is_empty() {
            info!(gear_id = %gear.id, "Batch proposal matched nothing");
            return Ok(outcome);
        }

        let now = self.time_provider.now_millis();
        let batch = Batch {
            id: self.id_provider.generate_id(),
            state: BatchState::Pending,
            origin,
            gear_id: Some(gear.id.clone()),
            config: Some(config),
            proposal: BatchProposal::Gear {
                analysis: request.analysis,
                tags: request.tags,
                jobs: proposed,
            },
            optional_input_policy: request.optional_input_policy,
            matched: outcome.matched.clone(),
            not_matched: outcome.not_matched.clone(),
            ambiguous: outcome.ambiguous.clone(),
            job_ids: Vec::new(),
            created: now,
            modified: now,
        };
        self.batches.insert(&batch).await?;
        info!(
            batch_id = %batch.id,
            gear_id = %gear.id,
            matched = outcome.matched.len(),
            not_matched = outcome.not_matched.len(),
            ambiguous = outcome.ambiguous.len(),
            "Batch proposed"
        );

        outcome.batch = Some(batch);
        Ok(outcome)
    }

    /// Store already-built job specs as a pending batch, validating each through enqueue
    pub async fn propose_with_jobs(
        &self,
        specs: Vec<JobSpec>,
        origin: JobOrigin,
        uid: Option<&str>,
    ) -> Result<Batch> {
        for (n, spec) in specs.iter().enumerate() {
            if let Err(e) = self.lifecycle.enqueue(spec.clone(), origin.clone(), uid).await {
                return Err(match e {
                    AppError::Validation(msg) => AppError::Validation(format!("Job {}: {}", n, msg)),
                    other => other,
                });
            }
        }

        let now = self.time_provider.now_millis();
        let batch = Batch {
            id: self.id_provider.generate_id(),
            state: BatchState::Pending,
            origin,
            gear_id: None,
            config: None,
            proposal: BatchProposal::Preconstructed { jobs: specs },
            optional_input_policy: OptionalInputPolicy::default(),
            matched: Vec::new(),
            not_matched: Vec::new(),
            ambiguous: Vec::new(),
            job_ids: Vec::new(),
            created: now,
            modified: now,
        };
        self.batches.insert(&batch).await?;
        info!(batch_id = %batch.id, "Batch proposed from preconstructed jobs");
        Ok(batch)
    }

    /// Enqueue every proposed job and move the batch to running
    pub async fn run(&self, id: &BatchId) -> Result<(Batch, Vec<Job>)> {
        let batch = self.get(id).await?;
        if batch.state != BatchState::Pending {
            return Err(AppError::InvalidState(
                "Can only run pending batch jobs.".to_string(),
            ));
        }

        let mut jobs = Vec::new();
        if let Err(e) = self.enqueue_jobs(&batch, &mut jobs).await {
            self.abandon_jobs(&batch.id, &jobs).await;
            return Err(e);
        }

        let job_ids: Vec<JobId> = jobs.iter().map(|j| j.id.clone()).collect();
        let now = self.time_provider.now_millis();
        let moved = self
            .batches
            .transition(&batch.id, BatchState::Pending, BatchState::Running, Some(&job_ids), now)
            .await
            .and_then(|moved| {
                moved.ok_or_else(|| {
                    AppError::Conflict(format!("Batch job {} not updated", batch.id))
                })
            });
        let batch = match moved {
            Ok(batch) => batch,
            Err(e) => {
                self.abandon_jobs(&batch.id, &jobs).await;
                return Err(e);
            }
        };

        info!(batch_id = %batch.id, jobs = job_ids.len(), "Batch running");
        Ok((batch, jobs))
    }

    /// Enqueue the batch's jobs, pushing each onto `jobs` as soon as it is stored
    async fn enqueue_jobs(&self, batch: &Batch, jobs: &mut Vec<Job>) -> Result<()> {
        match &batch.proposal {
            BatchProposal::Gear {
                analysis,
                tags,
                jobs: proposed,
            } => {
                let gear_id = batch.gear_id.clone().ok_or_else(|| {
                    AppError::Internal(format!("Batch {} has no gear", batch.id))
                })?;
                let gear = self
                    .gears
                    .get_gear(&gear_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", gear_id)))?;

                let mut tags = tags.clone();
                tags.push("batch".to_string());

                for proposed_job in proposed {
                    let mut spec = JobSpec {
                        gear_id: gear_id.clone(),
                        inputs: proposed_job.inputs.clone(),
                        destination: Some(proposed_job.destination.clone()),
                        tags: tags.clone(),
                        config: batch.config.clone(),
                        compute_provider_id: proposed_job.compute_provider_id.clone(),
                        batch_id: Some(batch.id.clone()),
                        label: None,
                    };

                    let analysis_id = if gear.category == GearCategory::Analysis {
                        let analysis = self
                            .create_analysis(&proposed_job.destination, analysis, &gear.name)
                            .await?;
                        spec.destination = Some(analysis.reference());
                        Some(analysis.id)
                    } else {
                        None
                    };

                    let job = self
                        .lifecycle
                        .enqueue_and_insert(spec, batch.origin.clone(), None)
                        .await?;
                    let job_id = job.id.clone();
                    jobs.push(job);
                    if let Some(analysis_id) = analysis_id {
                        self.containers.set_analysis_job(&analysis_id, &job_id).await?;
                    }
                }
            }
            BatchProposal::Preconstructed { jobs: specs } => {
                for spec in specs {
                    let mut spec = spec.clone();
                    spec.batch_id = Some(batch.id.clone());
                    let job = self
                        .lifecycle
                        .enqueue_and_insert(spec, batch.origin.clone(), None)
                        .await?;
                    jobs.push(job);
                }
            }
        }
        Ok(())
    }

    /// Cancel jobs enqueued for a batch run that did not complete
    async fn abandon_jobs(&self, batch_id: &BatchId, jobs: &[Job]) {
        if jobs.is_empty() {
            return;
        }
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        warn!(batch_id = %batch_id, jobs = ?ids, "Batch run aborted, cancelling its enqueued jobs");

        for job in jobs {
            if let Err(e) = self
                .lifecycle
                .mutate(job, JobMutation::to_state(JobState::Cancelled))
                .await
            {
                error!(batch_id = %batch_id, job_id = %job.id, error = %e, "Could not cancel abandoned batch job");
            }
        }
    }

    /// Session-level analysis that a batch job writes into
    async fn create_analysis(
        &self,
        destination: &ContainerRef,
        template: &AnalysisTemplate,
        gear_name: &str,
    ) -> Result<Container> {
        let session_id = match destination.kind {
            ContainerKind::Session => destination.id.clone(),
            ContainerKind::Acquisition => self
                .containers
                .get_container(destination)
                .await?
                .and_then(|c| c.parents.get(&ContainerKind::Session).cloned())
                .ok_or_else(|| {
                    AppError::NotFound(format!("Session of {} not found", destination))
                })?,
            other => {
                return Err(AppError::Validation(format!(
                    "Batch destinations must be a session or acquisition, got {}",
                    other
                )))
            }
        };
        let session_ref = ContainerRef::new(ContainerKind::Session, session_id.clone());
        let session = self
            .containers
            .get_container(&session_ref)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

        let now = self.time_provider.now_millis();
        let label = template.label.clone().unwrap_or_else(|| {
            let stamp = chrono::DateTime::from_timestamp_millis(now)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| now.to_string());
            format!("{} {}", gear_name, stamp)
        });

        let mut analysis = Container::new(ContainerKind::Analysis, self.id_provider.generate_id());
        analysis.label = Some(label);
        analysis.parents = session.parents.clone();
        analysis.parents.insert(ContainerKind::Session, session.id.clone());
        analysis.permissions = session.permissions.clone();

        self.containers.create_analysis(&analysis).await?;
        debug!(analysis_id = %analysis.id, session_id = %session.id, "Analysis created for batch job");
        Ok(analysis)
    }

    /// Cancel a running batch and its still-pending jobs; returns how many jobs were cancelled
    pub async fn cancel(&self, id: &BatchId) -> Result<usize> {
        let batch = self.get(id).await?;
        batch.state.check_transition(BatchState::Cancelled)?;

        // The batch goes first so job-level finalization cannot resolve it meanwhile
        let now = self.time_provider.now_millis();
        self.batches
            .transition(&batch.id, BatchState::Running, BatchState::Cancelled, None, now)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Batch job {} not updated", batch.id)))?;

        let mut cancelled = 0;
        for job in self.lifecycle.jobs().find_by_ids(&batch.job_ids).await? {
            if job.state != JobState::Pending {
                continue;
            }
            match self
                .lifecycle
                .mutate(&job, JobMutation::to_state(JobState::Cancelled))
                .await
            {
                Ok(_) => cancelled += 1,
                Err(e) => debug!(job_id = %job.id, error = %e, "Skipping job that could not be cancelled"),
            }
        }

        info!(batch_id = %batch.id, cancelled, "Batch cancelled");
        Ok(cancelled)
    }

    /// Resolved state from the batch's jobs, `None` while unresolved or once cancelled
    pub async fn check_state(&self, id: &BatchId) -> Result<Option<BatchState>> {
        let batch = self.get(id).await?;
        if batch.state == BatchState::Cancelled {
            return Ok(None);
        }
        let jobs = self.lifecycle.jobs().find_by_ids(&batch.job_ids).await?;
        let states: Vec<JobState> = jobs.iter().map(|j| j.state).collect();
        Ok(resolve_batch_state(&states))
    }
}

/// Move a running batch to its resolved terminal state, if it has one
pub(crate) async fn finalize_batch(
    batches: &dyn BatchRepository,
    jobs: &dyn JobRepository,
    batch_id: &BatchId,
    now_millis: i64,
) -> Result<()> {
    let Some(batch) = batches.find_by_id(batch_id).await? else {
        warn!(batch_id = %batch_id, "Job references a missing batch");
        return Ok(());
    };
    if batch.state != BatchState::Running {
        return Ok(());
    }

    let states: Vec<JobState> = jobs
        .find_by_ids(&batch.job_ids)
        .await?
        .iter()
        .map(|j| j.state)
        .collect();
    let Some(next) = resolve_batch_state(&states) else {
        return Ok(());
    };

    if batches
        .transition(batch_id, BatchState::Running, next, None, now_millis)
        .await?
        .is_some()
    {
        info!(batch_id = %batch_id, state = %next, "Batch finished");
    }
    Ok(())
}
