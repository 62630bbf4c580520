// SQLite BatchRepository Implementation

use crate::error::{decode, encode, map_sqlx_error};
use async_trait::async_trait;
use gearflow_core::domain::{Batch, BatchId, BatchState, JobId};
use gearflow_core::error::Result;
use gearflow_core::port::BatchRepository;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteBatchRepository {
    pool: SqlitePool,
}

impl SqliteBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for SqliteBatchRepository {
    async fn insert(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            "INSERT INTO batches (id, state, created, modified, document) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&batch.id)
        .bind(batch.state.as_str())
        .bind(batch.created)
        .bind(batch.modified)
        .bind(encode(batch)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &BatchId) -> Result<Option<Batch>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM batches WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn transition(
        &self,
        id: &BatchId,
        expected: BatchState,
        next: BatchState,
        job_ids: Option<&[JobId]>,
        now_millis: i64,
    ) -> Result<Option<Batch>> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE batches SET state = ");
        qb.push_bind(next.as_str())
            .push(", modified = ")
            .push_bind(now_millis)
            .push(", document = json_set(document, '$.state', ")
            .push_bind(next.as_str())
            .push(", '$.modified', ")
            .push_bind(now_millis);
        if let Some(ids) = job_ids {
            qb.push(", '$.job_ids', json(").push_bind(encode(&ids)?).push(")");
        }
        qb.push(") WHERE id = ")
            .push_bind(id.clone())
            .push(" AND state = ")
            .push_bind(expected.as_str())
            .push(" RETURNING document");

        let row: Option<(String,)> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some((document,)) => {
                tracing::debug!(batch_id = %id, from = %expected, to = %next, "Batch transitioned");
                Ok(Some(decode(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn replace_job_id(&self, id: &BatchId, old: &JobId, new: &JobId) -> Result<()> {
        // One statement, so concurrent relinks on the same batch serialize on
        // the write lock instead of failing a snapshot upgrade
        sqlx::query(
            r#"
            UPDATE batches
            SET document = json_set(document, '$.job_ids', json((
                SELECT json_group_array(CASE WHEN value = ? THEN ? ELSE value END)
                FROM (SELECT value FROM json_each(batches.document, '$.job_ids') ORDER BY key)
            )))
            WHERE id = ?
            "#,
        )
        .bind(old)
        .bind(new)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::setup_test_db;
    use crate::{create_pool, run_migrations};
    use std::sync::Arc;
    use gearflow_core::domain::{BatchProposal, JobOrigin, OptionalInputPolicy};

    fn pending_batch(id: &str) -> Batch {
        Batch {
            id: id.to_string(),
            state: BatchState::Pending,
            origin: JobOrigin::user("admin@example.com"),
            gear_id: None,
            config: None,
            proposal: BatchProposal::Preconstructed { jobs: Vec::new() },
            optional_input_policy: OptionalInputPolicy::default(),
            matched: Vec::new(),
            not_matched: Vec::new(),
            ambiguous: Vec::new(),
            job_ids: Vec::new(),
            created: 1_000,
            modified: 1_000,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteBatchRepository::new(setup_test_db().await);
        let batch = pending_batch("b1");
        repo.insert(&batch).await.unwrap();

        assert_eq!(repo.find_by_id(&batch.id).await.unwrap(), Some(batch));
        assert!(repo.find_by_id(&"nope".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_guarded() {
        let repo = SqliteBatchRepository::new(setup_test_db().await);
        repo.insert(&pending_batch("b1")).await.unwrap();
        let id = "b1".to_string();
        let jobs = vec!["j1".to_string(), "j2".to_string()];

        let running = repo
            .transition(&id, BatchState::Pending, BatchState::Running, Some(&jobs), 2_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.state, BatchState::Running);
        assert_eq!(running.modified, 2_000);
        assert_eq!(running.job_ids, jobs);

        // Second runner loses
        assert!(repo
            .transition(&id, BatchState::Pending, BatchState::Running, None, 3_000)
            .await
            .unwrap()
            .is_none());

        let done = repo
            .transition(&id, BatchState::Running, BatchState::Complete, None, 4_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.state, BatchState::Complete);
        assert_eq!(done.job_ids, jobs);
    }

    #[tokio::test]
    async fn test_replace_job_id() {
        let repo = SqliteBatchRepository::new(setup_test_db().await);
        let mut batch = pending_batch("b1");
        batch.job_ids = vec!["j1".to_string(), "j2".to_string()];
        repo.insert(&batch).await.unwrap();

        repo.replace_job_id(&batch.id, &"j1".to_string(), &"j1-retry".to_string())
            .await
            .unwrap();

        let stored = repo.find_by_id(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.job_ids, vec!["j1-retry".to_string(), "j2".to_string()]);

        // Unknown batch is a no-op
        repo.replace_job_id(&"nope".to_string(), &"a".to_string(), &"b".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replace_job_id_on_empty_batch() {
        let repo = SqliteBatchRepository::new(setup_test_db().await);
        repo.insert(&pending_batch("b1")).await.unwrap();

        repo.replace_job_id(&"b1".to_string(), &"a".to_string(), &"b".to_string())
            .await
            .unwrap();

        let stored = repo.find_by_id(&"b1".to_string()).await.unwrap().unwrap();
        assert!(stored.job_ids.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_relinks_keep_every_update() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("batches.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(SqliteBatchRepository::new(pool));

        let old_ids: Vec<JobId> = (0..20).map(|i| format!("job-{}", i)).collect();
        let mut batch = pending_batch("b1");
        batch.state = BatchState::Running;
        batch.job_ids = old_ids.clone();
        repo.insert(&batch).await.unwrap();

        let handles: Vec<_> = old_ids
            .iter()
            .map(|old| {
                let repo = repo.clone();
                let old = old.clone();
                tokio::spawn(async move {
                    let new = format!("{}-retry", old);
                    repo.replace_job_id(&"b1".to_string(), &old, &new).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = repo.find_by_id(&"b1".to_string()).await.unwrap().unwrap();
        let expected: Vec<JobId> = old_ids.iter().map(|id| format!("{}-retry", id)).collect();
        assert_eq!(stored.job_ids, expected);
        assert_eq!(stored.state, BatchState::Running);
    }
}
