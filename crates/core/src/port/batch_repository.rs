// Batch Repository Port

use crate::domain::{Batch, BatchId, BatchState, JobId};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BatchRepository: Send + Sync {
    async fn insert(&self, batch: &Batch) -> Result<()>;

    async fn find_by_id(&self, id: &BatchId) -> Result<Option<Batch>>;

    /// Move `id` from `expected` to `next`, optionally replacing its job list.
    /// Returns the updated batch, or `None` if it was not in `expected`.
    async fn transition(
        &self,
        id: &BatchId,
        expected: BatchState,
        next: BatchState,
        job_ids: Option<&[JobId]>,
        now_millis: i64,
    ) -> Result<Option<Batch>>;

    /// Swap `old` for `new` in the job list (retry relinking)
    async fn replace_job_id(&self, id: &BatchId, old: &JobId, new: &JobId) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryBatchRepository {
        batches: Mutex<HashMap<BatchId, Batch>>,
        transition_failure: Mutex<Option<AppError>>,
    }

    impl InMemoryBatchRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `transition` fail with `error`
        pub fn fail_next_transition(&self, error: AppError) {
            *self.transition_failure.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl BatchRepository for InMemoryBatchRepository {
        async fn insert(&self, batch: &Batch) -> Result<()> {
            let mut batches = self.batches.lock().unwrap();
            if batches.contains_key(&batch.id) {
                return Err(AppError::Conflict(format!("batch {} already exists", batch.id)));
            }
            batches.insert(batch.id.clone(), batch.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &BatchId) -> Result<Option<Batch>> {
            Ok(self.batches.lock().unwrap().get(id).cloned())
        }

        async fn transition(
            &self,
            id: &BatchId,
            expected: BatchState,
            next: BatchState,
            job_ids: Option<&[JobId]>,
            now_millis: i64,
        ) -> Result<Option<Batch>> {
            if let Some(error) = self.transition_failure.lock().unwrap().take() {
                return Err(error);
            }
            let mut batches = self.batches.lock().unwrap();
            match batches.get_mut(id) {
                Some(batch) if batch.state == expected => {
                    batch.state = next;
                    batch.modified = now_millis;
                    if let Some(ids) = job_ids {
                        batch.job_ids = ids.to_vec();
                    }
                    Ok(Some(batch.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn replace_job_id(&self, id: &BatchId, old: &JobId, new: &JobId) -> Result<()> {
            let mut batches = self.batches.lock().unwrap();
            if let Some(batch) = batches.get_mut(id) {
                for job_id in batch.job_ids.iter_mut().filter(|j| *j == old) {
                    *job_id = new.clone();
                }
            }
            Ok(())
        }
    }
}
