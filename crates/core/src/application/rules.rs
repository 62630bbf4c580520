// Rule Engine - file-triggered job creation and rule management

use crate::application::events::ContainerObserver;
use crate::application::lifecycle::JobLifecycle;
use crate::domain::pattern::{compile_prefix_regex, glob_matches};
use crate::domain::{
    Container, ContainerEvent, ContainerEventKind, ContainerKind, EventReport, FileEntry, FileRef,
    Job, JobOrigin, JobSpec, MatchKind, Rule, RuleId, RuleMatcher, SITE_SCOPE,
};
use crate::error::{AppError, Result};
use crate::port::{ContainerCatalog, GearCatalog, IdProvider, RuleRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Called with every rule whose evaluation or job creation failed
pub type RuleFailureCallback = Arc<dyn Fn(&Rule, &AppError) + Send + Sync>;

/// Does a single matcher accept `file` on `container`?
pub fn eval_match(matcher: &RuleMatcher, file: &FileEntry, container: &Container) -> bool {
    let matches = |value: &str| -> bool {
        if matcher.regex {
            match compile_prefix_regex(&matcher.value) {
                Ok(re) => re.is_match(value),
                Err(e) => {
                    warn!(pattern = %matcher.value, error = %e, "Rule regex does not compile");
                    false
                }
            }
        } else if matcher.kind == MatchKind::FileName {
            glob_matches(&matcher.value, value)
        } else {
            matcher.value.to_lowercase() == value.to_lowercase()
        }
    };

    match matcher.kind {
        MatchKind::FileType => match &file.file_type {
            Some(file_type) => matches(file_type),
            None => {
                warn!(file = %file.name, container = %container.id, "File has no type");
                false
            }
        },
        MatchKind::FileName => matches(&file.name),
        MatchKind::FileModality => file.modality.as_deref().is_some_and(matches),
        MatchKind::FileClassification => {
            !matcher.value.is_empty() && file.classification_values().any(matches)
        }
        MatchKind::ContainerHasType => container
            .files
            .iter()
            .filter_map(|f| f.file_type.as_deref())
            .any(matches),
        MatchKind::ContainerHasClassification => {
            !matcher.value.is_empty()
                && container
                    .files
                    .iter()
                    .any(|f| f.classification_values().any(&matches))
        }
    }
}

/// Decide whether `rule` fires for `file`.
///
/// Any `not` match rejects; a non-empty `any` needs one match; every `all`
/// matcher must match. A rule with no matchers fires on every file.
pub fn evaluate(rule: &Rule, file: &FileEntry, container: &Container) -> bool {
    if rule.not.iter().any(|m| eval_match(m, file, container)) {
        return false;
    }
    if !rule.any.is_empty() && !rule.any.iter().any(|m| eval_match(m, file, container)) {
        return false;
    }
    rule.all.iter().all(|m| eval_match(m, file, container))
}

/// Job a rule would create, before it is enqueued
#[derive(Debug, Clone)]
pub struct PotentialJob {
    pub rule: Rule,
    pub spec: JobSpec,
}

impl PotentialJob {
    /// Same gear, inputs and destination
    pub fn intention_equals(&self, other: &PotentialJob) -> bool {
        self.spec.gear_id == other.spec.gear_id
            && self.spec.inputs == other.spec.inputs
            && self.spec.destination == other.spec.destination
    }

    fn consumes(&self, file: &FileRef) -> bool {
        self.spec.inputs.values().any(|input| input == file)
    }
}

/// Rule Engine Service
pub struct RuleEngine {
    rules: Arc<dyn RuleRepository>,
    gears: Arc<dyn GearCatalog>,
    lifecycle: Arc<JobLifecycle>,
    id_provider: Arc<dyn IdProvider>,
    on_failure: Option<RuleFailureCallback>,
}

impl RuleEngine {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        gears: Arc<dyn GearCatalog>,
        lifecycle: Arc<JobLifecycle>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            rules,
            gears,
            lifecycle,
            id_provider,
            on_failure: None,
        }
    }

    pub fn with_failure_callback(mut self, callback: RuleFailureCallback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    fn report_failure(&self, rule: &Rule, error: &AppError) {
        warn!(rule_id = %rule.id, rule = %rule.name, error = %error, "Rule evaluation failed");
        if let Some(callback) = &self.on_failure {
            callback(rule, error);
        }
    }

    /// Enabled rules of the project owning `container`
    async fn rules_for_container(&self, container: &Container) -> Result<Vec<Rule>> {
        let project_id = if container.kind == ContainerKind::Project {
            Some(&container.id)
        } else {
            container.parents.get(&ContainerKind::Project)
        };
        match project_id {
            Some(project_id) => self.rules.list_for_project(project_id, false).await,
            None => Ok(Vec::new()),
        }
    }

    async fn build_spec(
        &self,
        rule: &Rule,
        container: &Container,
        file: &FileEntry,
    ) -> Result<JobSpec> {
        let gear = self
            .gears
            .get_gear(&rule.gear_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", rule.gear_id)))?;

        let open: Vec<&str> = gear
            .required_file_inputs()
            .into_iter()
            .filter(|name| !rule.fixed_inputs.contains_key(*name))
            .collect();
        let [input_name] = open.as_slice() else {
            return Err(AppError::Validation(format!(
                "Rule {} needs gear {} to have exactly 1 open file input, found {}",
                rule.name,
                gear.name,
                open.len()
            )));
        };

        let mut inputs = rule.fixed_inputs.clone();
        inputs.insert(
            input_name.to_string(),
            FileRef::new(container.kind, container.id.clone(), file.name.clone()),
        );

        Ok(JobSpec {
            gear_id: gear.id.clone(),
            inputs,
            destination: Some(container.reference()),
            tags: vec!["auto".to_string(), gear.name.clone()],
            config: rule.config.clone(),
            compute_provider_id: None,
            batch_id: None,
            label: None,
        })
    }

    /// Jobs the project's rules would create for `file`; failing rules are reported and skipped
    pub async fn potential_jobs(
        &self,
        container: &Container,
        file: &FileEntry,
    ) -> Result<Vec<PotentialJob>> {
        self.collect_potential(container, file, true).await
    }

    async fn collect_potential(
        &self,
        container: &Container,
        file: &FileEntry,
        report: bool,
    ) -> Result<Vec<PotentialJob>> {
        if file.from_failed_job {
            return Ok(Vec::new());
        }

        let mut potential = Vec::new();
        for rule in self.rules_for_container(container).await? {
            if !evaluate(&rule, file, container) {
                continue;
            }
            match self.build_spec(&rule, container, file).await {
                Ok(spec) => potential.push(PotentialJob { rule, spec }),
                Err(e) if report => self.report_failure(&rule, &e),
                Err(_) => {}
            }
        }
        Ok(potential)
    }

    /// Enqueue the jobs that only became possible between `before` and `after`.
    ///
    /// A job is spawned when no intention-equal job was possible before, or
    /// when it consumes one of the `replaced` files.
    pub async fn on_files_updated(
        &self,
        before: &Container,
        after: &Container,
        replaced: &[FileRef],
    ) -> Result<Vec<Job>> {
        let mut jobs_before = Vec::new();
        for file in &before.files {
            // Failures were already reported when `before` was current
            jobs_before.extend(self.collect_potential(before, file, false).await?);
        }
        let mut jobs_after = Vec::new();
        for file in &after.files {
            jobs_after.extend(self.potential_jobs(after, file).await?);
        }

        let mut spawned = Vec::new();
        for candidate in jobs_after {
            if let Some(file) = replaced.iter().find(|f| candidate.consumes(f)) {
                info!(
                    container = %after.reference(),
                    rule = %candidate.rule.name,
                    replaced_file = %file.name,
                    "Scheduling job for replaced file"
                );
            } else if jobs_before.iter().any(|b| candidate.intention_equals(b)) {
                info!(
                    container = %after.reference(),
                    rule = %candidate.rule.name,
                    "Ignoring rule, job has already been queued"
                );
                continue;
            } else {
                info!(container = %after.reference(), rule = %candidate.rule.name, "Scheduling job");
            }

            match self
                .lifecycle
                .enqueue_and_insert(candidate.spec, JobOrigin::system(), None)
                .await
            {
                Ok(job) => spawned.push(job),
                Err(e) => self.report_failure(&candidate.rule, &e),
            }
        }
        Ok(spawned)
    }

    /// Store a new rule for `project_id` (or the site scope)
    pub async fn add_rule(&self, project_id: &str, mut rule: Rule) -> Result<Rule> {
        rule.id = self.id_provider.generate_id();
        rule.project_id = project_id.to_string();
        rule.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let gear = self
            .gears
            .get_gear(&rule.gear_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gear {} not found", rule.gear_id)))?;

        if rule.auto_update {
            let latest = self.gears.get_latest_gear_by_name(&gear.name).await?;
            if latest.map(|g| g.id) != Some(gear.id.clone()) {
                return Err(AppError::Validation(
                    "Gear rule cannot be auto-updated unless it uses the latest version of the gear"
                        .to_string(),
                ));
            }
        }
        if let Some(config) = &rule.config {
            self.gears.validate_config(&gear, config)?;
        }

        self.rules.insert(&rule).await?;
        info!(rule_id = %rule.id, project_id = %project_id, gear = %gear.name, "Rule added");
        Ok(rule)
    }

    pub async fn list_rules(&self, project_id: &str) -> Result<Vec<Rule>> {
        self.rules.list_for_project(project_id, true).await
    }

    pub async fn get_rule(&self, id: &RuleId) -> Result<Rule> {
        self.rules
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Rule {} not found", id)))
    }

    /// Enable or disable a rule; disabled rules never fire
    pub async fn set_disabled(&self, id: &RuleId, disabled: bool) -> Result<Rule> {
        let mut rule = self.get_rule(id).await?;
        rule.disabled = disabled;
        self.rules.update(&rule).await?;
        Ok(rule)
    }

    /// Copy every site rule into `project_id`; returns how many were copied
    pub async fn copy_site_rules(&self, project_id: &str) -> Result<usize> {
        let site_rules = self.rules.list_for_project(SITE_SCOPE, true).await?;
        let count = site_rules.len();
        for mut rule in site_rules {
            rule.id = self.id_provider.generate_id();
            rule.project_id = project_id.to_string();
            self.rules.insert(&rule).await?;
        }
        info!(project_id = %project_id, count, "Copied site rules");
        Ok(count)
    }
}

/// Bridges `files_updated` container events into rule evaluation
pub struct RuleTriggerObserver {
    engine: Arc<RuleEngine>,
    containers: Arc<dyn ContainerCatalog>,
}

impl RuleTriggerObserver {
    pub fn new(engine: Arc<RuleEngine>, containers: Arc<dyn ContainerCatalog>) -> Self {
        Self { engine, containers }
    }
}

#[async_trait]
impl ContainerObserver for RuleTriggerObserver {
    fn name(&self) -> &str {
        "rule-trigger"
    }

    async fn on_event(&self, event: &ContainerEvent) -> Result<EventReport> {
        if event.kind != ContainerEventKind::FilesUpdated {
            return Ok(EventReport::default());
        }
        // Without a before snapshot there is nothing to diff against
        let Some(before) = &event.before else {
            return Ok(EventReport::jobs_spawned(0));
        };

        let after = match &event.after {
            Some(after) => after.clone(),
            None => self
                .containers
                .get_container(&event.container)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Container {} not found", event.container)))?,
        };

        let spawned = self
            .engine
            .on_files_updated(before, &after, &event.replaced_files)
            .await?;
        Ok(EventReport::jobs_spawned(spawned.len()))
    }
}
