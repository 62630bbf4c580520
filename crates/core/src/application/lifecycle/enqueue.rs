// Enqueue Use Case

use super::request::GEAR_INPUT_DIR;
use super::JobLifecycle;
use crate::application::match_engine::resolve_context;
use crate::domain::{
    AccessLevel, ConfigInput, ContainerId, ContainerKind, ContextValue, FileEntry,
    FileRef, Gear, GearInput, InputLocation, Job, JobConfig, JobInput, JobOrigin, JobProfile,
    JobSpec, JobState,
};
use crate::error::{AppError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// File fields handed to the gear in the config block
fn file_projection(file: &FileEntry) -> Value {
    let measurements: Vec<&str> = file.classification_values().collect();
    json!({
        "info": file.info,
        "tags": file.tags,
        "classification": file.classification,
        "measurements": measurements,
        "mimetype": file.mimetype,
        "type": file.file_type,
        "modality": file.modality,
        "size": file.size,
    })
}

fn push_unique(ids: &mut Vec<ContainerId>, id: &ContainerId) {
    if !ids.contains(id) {
        ids.push(id.clone());
    }
}

/// Gear name goes last; duplicates keep their first position
fn job_tags(requested: &[String], gear: &Gear) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(requested.len() + 1);
    for tag in requested.iter().chain(std::iter::once(&gear.name)) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

impl JobLifecycle {
    /// Validate a job spec and build an unsaved pending job.
    ///
    /// # Arguments
    ///
    /// * `spec` - Gear, file inputs, optional destination / config / provider
    /// * `origin` - Who is asking
    /// * `uid` - When given, read access on inputs and write access on the destination are enforced
    pub async fn enqueue(&self, spec: JobSpec, origin: JobOrigin, uid: Option<&str>) -> Result<Job> {
        let gear = self
            .gears
            .get_gear(&spec.gear_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", spec.gear_id)))?;

        // Invalid disables a gear from running entirely
        if gear.invalid {
            return Err(AppError::Validation(
                "Gear marked as invalid, will not run!".to_string(),
            ));
        }

        let config = self
            .gears
            .validate_config(&gear, &spec.config.clone().unwrap_or_default())?;

        for name in spec.inputs.keys() {
            match gear.inputs.get(name) {
                None => {
                    return Err(AppError::Validation(format!(
                        "Job input {} is not listed in gear manifest",
                        name
                    )))
                }
                Some(GearInput::File(_)) => {}
                Some(_) => {
                    return Err(AppError::Validation(format!(
                        "Job input {} is not a file input",
                        name
                    )))
                }
            }
        }

        let destination = match &spec.destination {
            Some(destination) => destination.clone(),
            None => {
                let inferred = spec
                    .inputs
                    .values()
                    .next()
                    .map(FileRef::container)
                    .ok_or_else(|| {
                        AppError::Validation(
                            "Must specify destination if gear has no inputs.".to_string(),
                        )
                    })?;
                if inferred.kind == ContainerKind::Analysis {
                    return Err(AppError::Validation(
                        "Cannot use analysis for destination of a job, container was inferred."
                            .to_string(),
                    ));
                }
                inferred
            }
        };

        let destination_container = self
            .containers
            .get_container(&destination)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Destination {} not found", destination)))?;

        if let Some(uid) = uid {
            for file in spec.inputs.values() {
                let container = file.container();
                if !self
                    .containers
                    .check_access(&container, uid, AccessLevel::ReadOnly)
                    .await?
                {
                    return Err(AppError::Permission(format!(
                        "User {} cannot read {}",
                        uid, container
                    )));
                }
            }
            if !destination_container.has_access(uid, AccessLevel::ReadWrite) {
                return Err(AppError::Permission(format!(
                    "User {} cannot write to {}",
                    uid, destination
                )));
            }
        }

        let mut related_container_ids = Vec::new();
        for id in destination_container.related_ids() {
            push_unique(&mut related_container_ids, id);
        }

        let mut inputs = BTreeMap::new();
        let mut config_inputs = BTreeMap::new();
        let mut profile = JobProfile::default();

        for (name, file_ref) in &spec.inputs {
            let container = self
                .containers
                .get_container(&file_ref.container())
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Input container {} not found", file_ref.container()))
                })?;
            let file = container.file(&file_ref.name).ok_or_else(|| {
                AppError::NotFound(format!(
                    "File {} not found on {}",
                    file_ref.name,
                    file_ref.container()
                ))
            })?;

            for id in container.related_ids() {
                push_unique(&mut related_container_ids, id);
            }
            profile.total_input_files += 1;
            profile.total_input_size_bytes += file.size;

            config_inputs.insert(
                name.clone(),
                ConfigInput::File {
                    hierarchy: file_ref.container(),
                    location: InputLocation {
                        name: file.name.clone(),
                        path: format!("{}/{}/{}", GEAR_INPUT_DIR, name, file.name),
                    },
                    object: file_projection(file),
                },
            );
            inputs.insert(name.clone(), JobInput::File(file_ref.clone()));
        }

        if gear.has_context_inputs() {
            let context = resolve_context(self.containers.as_ref(), &destination, uid).await?;
            for (name, input) in &gear.inputs {
                if !matches!(input, GearInput::Context(_)) {
                    continue;
                }
                let value = ContextValue {
                    found: context.contains_key(name),
                    value: context.get(name).cloned(),
                };
                config_inputs.insert(
                    name.clone(),
                    ConfigInput::Context {
                        found: value.found,
                        value: value.value.clone(),
                    },
                );
                inputs.insert(name.clone(), JobInput::Context(value));
            }
        }

        for (name, input) in &gear.inputs {
            if matches!(input, GearInput::ApiKey(_)) {
                config_inputs.insert(name.clone(), ConfigInput::ApiKey { key: None });
                inputs.insert(name.clone(), JobInput::ApiKey);
            }
        }

        let mut parents = destination_container.parents.clone();
        parents.insert(destination.kind, destination.id.clone());

        let compute_provider_id = match &spec.compute_provider_id {
            Some(provider) => {
                if !self.providers.exists(provider).await? {
                    return Err(AppError::Validation(format!(
                        "Compute provider {} not found",
                        provider
                    )));
                }
                provider.clone()
            }
            None => self
                .providers
                .infer(&gear, &destination_container, &origin)
                .await?
                .ok_or_else(|| {
                    AppError::PreconditionFailed(format!(
                        "Cannot determine compute provider for job. gear={}, destination.id={}",
                        gear.id, destination.id
                    ))
                })?,
        };

        let now = self.time_provider.now_millis();
        Ok(Job {
            id: self.id_provider.generate_id(),
            gear_id: gear.id.clone(),
            gear_info: gear.info(),
            state: JobState::Pending,
            attempt: 1,
            previous_job_id: None,
            inputs,
            destination: destination.clone(),
            config: JobConfig {
                config,
                inputs: config_inputs,
                destination,
            },
            tags: job_tags(&spec.tags, &gear),
            origin,
            compute_provider_id,
            batch_id: spec.batch_id,
            label: spec.label,
            parents,
            related_container_ids,
            created: now,
            modified: now,
            transitions: BTreeMap::from([(JobState::Pending, now)]),
            retried: None,
            request: None,
            failure_reason: None,
            profile,
        })
    }

    /// Enqueue and insert in one step
    pub async fn enqueue_and_insert(
        &self,
        spec: JobSpec,
        origin: JobOrigin,
        uid: Option<&str>,
    ) -> Result<Job> {
        let job = self.enqueue(spec, origin, uid).await?;
        self.insert(&job).await?;
        Ok(job)
    }
}

/// Rebuild the spec a job was enqueued from (used by retry)
pub(crate) fn spec_from_job(job: &Job) -> JobSpec {
    JobSpec {
        gear_id: job.gear_id.clone(),
        inputs: job
            .file_inputs()
            .map(|(name, file)| (name.clone(), file.clone()))
            .collect(),
        destination: Some(job.destination.clone()),
        tags: job.tags.clone(),
        config: Some(job.config.config.clone()),
        compute_provider_id: Some(job.compute_provider_id.clone()),
        batch_id: job.batch_id.clone(),
        label: job.label.clone(),
    }
}
