// Job Repository Port (Interface)

use crate::domain::{ContainerRef, Job, JobFilter, JobId, JobState, StateCounts};
use crate::error::Result;
use async_trait::async_trait;

/// Predicate the stored job must still satisfy for a compare-and-swap to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasGuard {
    pub state: JobState,
    /// Only swap if the stored `modified` is strictly older (orphan scans)
    pub modified_before: Option<i64>,
    /// Only swap if the stored job has not been retried yet
    pub unretried: bool,
}

impl CasGuard {
    pub fn in_state(state: JobState) -> Self {
        Self {
            state,
            modified_before: None,
            unretried: false,
        }
    }

    pub fn stale(state: JobState, cutoff_millis: i64) -> Self {
        Self {
            state,
            modified_before: Some(cutoff_millis),
            unretried: false,
        }
    }

    pub fn unretried(state: JobState) -> Self {
        Self {
            state,
            modified_before: None,
            unretried: true,
        }
    }

    pub fn admits(&self, stored: &Job) -> bool {
        stored.state == self.state
            && self.modified_before.map_or(true, |cutoff| stored.modified < cutoff)
            && (!self.unretried || stored.retried.is_none())
    }
}

/// Jobs mentioning any of `containers` as destination or input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSearch {
    pub containers: Vec<ContainerRef>,
    pub states: Vec<JobState>,
    pub tags: Vec<String>,
    pub limit: u32,
    pub skip: u32,
}

impl ContainerSearch {
    pub fn matches(&self, job: &Job) -> bool {
        let refs = job.container_refs();
        if !self.containers.iter().any(|c| refs.contains(c)) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&job.state) {
            return false;
        }
        if !self.tags.is_empty() && !job.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Repository interface for Job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Find several jobs; missing ids are skipped
    async fn find_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>>;

    /// Replace the stored job with `job` iff the stored copy satisfies `guard`.
    /// Returns the stored document after the update, or `None` on a miss.
    async fn compare_and_swap(&self, job: &Job, guard: &CasGuard) -> Result<Option<Job>>;

    /// Atomically move the oldest-by-`modified` pending job matching `filter` to running
    async fn claim_next(&self, filter: &JobFilter, now_millis: i64) -> Result<Option<Job>>;

    /// Same selection as `claim_next` without mutating anything
    async fn peek_next(&self, filter: &JobFilter) -> Result<Option<Job>>;

    /// Job whose `previous_job_id` is `id`, if a retry already exists
    async fn find_retry_of(&self, id: &JobId) -> Result<Option<Job>>;

    /// Count jobs per state under `filter` (all five states present)
    async fn count_by_state(&self, filter: &JobFilter) -> Result<StateCounts>;

    /// One running job with `modified < cutoff`, skipping `exclude`
    async fn find_stale_running(&self, cutoff_millis: i64, exclude: &[JobId])
        -> Result<Option<Job>>;

    /// Newest-first page of jobs referencing the given containers
    async fn search_by_containers(&self, search: &ContainerSearch) -> Result<Vec<Job>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::queue::zero_filled_counts;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory job store; every method holds the lock for its whole body
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<HashMap<JobId, Job>>,
        /// (successful inserts still allowed, error for the one after)
        insert_failure: Mutex<Option<(usize, AppError)>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn all(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().values().cloned().collect()
        }

        /// Make the next `insert` fail with `error`
        pub fn fail_next_insert(&self, error: AppError) {
            self.fail_insert_after(0, error);
        }

        /// Let `successes` inserts through, then fail one with `error`
        pub fn fail_insert_after(&self, successes: usize, error: AppError) {
            *self.insert_failure.lock().unwrap() = Some((successes, error));
        }

        /// Overwrite a job unconditionally (test setup only)
        pub fn put(&self, job: Job) {
            self.jobs.lock().unwrap().insert(job.id.clone(), job);
        }

        fn oldest_pending(jobs: &HashMap<JobId, Job>, filter: &JobFilter) -> Option<JobId> {
            jobs.values()
                .filter(|j| j.state == JobState::Pending && filter.matches(j))
                .min_by(|a, b| (a.modified, &a.id).cmp(&(b.modified, &b.id)))
                .map(|j| j.id.clone())
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            {
                let mut failure = self.insert_failure.lock().unwrap();
                match failure.take() {
                    Some((0, error)) => return Err(error),
                    Some((remaining, error)) => *failure = Some((remaining - 1, error)),
                    None => {}
                }
            }
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("job {} already exists", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn find_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(ids.iter().filter_map(|id| jobs.get(id).cloned()).collect())
        }

        async fn compare_and_swap(&self, job: &Job, guard: &CasGuard) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&job.id) {
                Some(stored) if guard.admits(stored) => {
                    *stored = job.clone();
                    Ok(Some(stored.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn claim_next(&self, filter: &JobFilter, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(id) = Self::oldest_pending(&jobs, filter) else {
                return Ok(None);
            };
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::Internal("claimed job vanished".to_string()))?;
            job.transition(JobState::Running, now_millis)?;
            Ok(Some(job.clone()))
        }

        async fn peek_next(&self, filter: &JobFilter) -> Result<Option<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(Self::oldest_pending(&jobs, filter).and_then(|id| jobs.get(&id).cloned()))
        }

        async fn find_retry_of(&self, id: &JobId) -> Result<Option<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs
                .values()
                .find(|j| j.previous_job_id.as_deref() == Some(id.as_str()))
                .cloned())
        }

        async fn count_by_state(&self, filter: &JobFilter) -> Result<StateCounts> {
            let jobs = self.jobs.lock().unwrap();
            let mut counts = zero_filled_counts();
            for job in jobs.values().filter(|j| filter.matches(j)) {
                *counts.entry(job.state).or_insert(0) += 1;
            }
            Ok(counts)
        }

        async fn find_stale_running(
            &self,
            cutoff_millis: i64,
            exclude: &[JobId],
        ) -> Result<Option<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs
                .values()
                .filter(|j| j.state == JobState::Running && j.modified < cutoff_millis)
                .filter(|j| !exclude.contains(&j.id))
                .min_by_key(|j| j.modified)
                .cloned())
        }

        async fn search_by_containers(&self, search: &ContainerSearch) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            let mut found: Vec<Job> = jobs.values().filter(|j| search.matches(j)).cloned().collect();
            found.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
            Ok(found
                .into_iter()
                .skip(search.skip as usize)
                .take(search.limit as usize)
                .collect())
        }
    }
}
