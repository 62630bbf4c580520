// SQLite JobRepository Implementation

use crate::error::{decode, encode, map_sqlx_error};
use crate::filter::{push_job_filter, push_list};
use async_trait::async_trait;
use gearflow_core::domain::queue::zero_filled_counts;
use gearflow_core::domain::{Job, JobFilter, JobId, JobState, StateCounts};
use gearflow_core::error::{AppError, Result};
use gearflow_core::port::{CasGuard, ContainerSearch, JobRepository};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_documents(&self, mut qb: QueryBuilder<'_, Sqlite>) -> Result<Vec<Job>> {
        let rows: Vec<(String,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(|(document,)| decode(document)).collect()
    }

    async fn fetch_document(&self, mut qb: QueryBuilder<'_, Sqlite>) -> Result<Option<Job>> {
        let row: Option<(String,)> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|(document,)| decode(&document)).transpose()
    }
}

/// Scalar projections of a job used for filtering and guards
struct JobColumns {
    group_id: Option<String>,
    origin_id: Option<String>,
    tags: String,
    capabilities: String,
    container_keys: String,
    document: String,
}

impl JobColumns {
    fn of(job: &Job) -> Result<Self> {
        let keys: Vec<String> = job.container_refs().iter().map(|c| c.key()).collect();
        Ok(Self {
            group_id: job.group().map(str::to_string),
            origin_id: job.origin.id.clone(),
            tags: encode(&job.tags)?,
            capabilities: encode(&job.gear_info.capabilities)?,
            container_keys: encode(&keys)?,
            document: encode(job)?,
        })
    }
}

/// `SELECT j.document` over pending jobs matching `filter`, oldest first
fn pending_selection<'a>(select: &str, filter: &JobFilter) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM jobs j WHERE j.state = 'pending'");
    push_job_filter(&mut qb, "j", filter);
    qb.push(" ORDER BY j.modified, j.id LIMIT 1");
    qb
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let columns = JobColumns::of(job)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, state, gear_id, gear_name, group_id, compute_provider_id, origin_id,
                tags, capabilities, container_keys,
                previous_job_id, batch_id, retried, created, modified, document
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.state.as_str())
        .bind(&job.gear_id)
        .bind(&job.gear_info.name)
        .bind(columns.group_id)
        .bind(&job.compute_provider_id)
        .bind(columns.origin_id)
        .bind(columns.tags)
        .bind(columns.capabilities)
        .bind(columns.container_keys)
        .bind(&job.previous_job_id)
        .bind(&job.batch_id)
        .bind(job.retried)
        .bind(job.created)
        .bind(job.modified)
        .bind(columns.document)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(job_id = %job.id, gear = %job.gear_info.name, "Inserted job");
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn find_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new("SELECT j.document FROM jobs j WHERE j.id IN ");
        push_list(&mut qb, ids);
        let mut found = self.fetch_documents(qb).await?;

        // Keep the caller's order
        found.sort_by_key(|job| ids.iter().position(|id| *id == job.id));
        Ok(found)
    }

    async fn compare_and_swap(&self, job: &Job, guard: &CasGuard) -> Result<Option<Job>> {
        let columns = JobColumns::of(job)?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET state = ");
        qb.push_bind(job.state.as_str())
            .push(", modified = ")
            .push_bind(job.modified)
            .push(", retried = ")
            .push_bind(job.retried)
            .push(", tags = ")
            .push_bind(columns.tags)
            .push(", batch_id = ")
            .push_bind(job.batch_id.clone())
            .push(", document = ")
            .push_bind(columns.document)
            .push(" WHERE id = ")
            .push_bind(job.id.clone())
            .push(" AND state = ")
            .push_bind(guard.state.as_str());
        if let Some(cutoff) = guard.modified_before {
            qb.push(" AND modified < ").push_bind(cutoff);
        }
        if guard.unretried {
            qb.push(" AND retried IS NULL");
        }
        qb.push(" RETURNING document");

        let swapped = self.fetch_document(qb).await?;
        if swapped.is_none() {
            tracing::debug!(job_id = %job.id, expected = %guard.state, "Compare-and-swap missed");
        }
        Ok(swapped)
    }

    async fn claim_next(&self, filter: &JobFilter, now_millis: i64) -> Result<Option<Job>> {
        // Single statement: the subquery picks, the outer guard makes the
        // claim exclusive even if another writer got there first.
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET state = 'running', modified = ");
        qb.push_bind(now_millis)
            .push(", document = json_set(document, '$.state', 'running', '$.modified', ")
            .push_bind(now_millis)
            .push(", '$.transitions.running', ")
            .push_bind(now_millis)
            .push(") WHERE id = (SELECT j.id FROM jobs j WHERE j.state = 'pending'");
        push_job_filter(&mut qb, "j", filter);
        qb.push(" ORDER BY j.modified, j.id LIMIT 1) AND state = 'pending' RETURNING document");

        let claimed = self.fetch_document(qb).await?;
        if let Some(job) = &claimed {
            tracing::debug!(job_id = %job.id, gear = %job.gear_info.name, "Claimed job");
        }
        Ok(claimed)
    }

    async fn peek_next(&self, filter: &JobFilter) -> Result<Option<Job>> {
        self.fetch_document(pending_selection("SELECT j.document", filter))
            .await
    }

    async fn find_retry_of(&self, id: &JobId) -> Result<Option<Job>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM jobs WHERE previous_job_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn count_by_state(&self, filter: &JobFilter) -> Result<StateCounts> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT j.state, COUNT(*) FROM jobs j WHERE 1 = 1");
        push_job_filter(&mut qb, "j", filter);
        qb.push(" GROUP BY j.state");

        let rows: Vec<(String, i64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut counts = zero_filled_counts();
        for (state, count) in rows {
            let state = JobState::parse(&state)
                .ok_or_else(|| AppError::Database(format!("Unknown job state '{}'", state)))?;
            counts.insert(state, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn find_stale_running(
        &self,
        cutoff_millis: i64,
        exclude: &[JobId],
    ) -> Result<Option<Job>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT j.document FROM jobs j WHERE j.state = 'running' AND j.modified < ",
        );
        qb.push_bind(cutoff_millis);
        if !exclude.is_empty() {
            qb.push(" AND j.id NOT IN ");
            push_list(&mut qb, exclude);
        }
        qb.push(" ORDER BY j.modified, j.id LIMIT 1");
        self.fetch_document(qb).await
    }

    async fn search_by_containers(&self, search: &ContainerSearch) -> Result<Vec<Job>> {
        if search.containers.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = search.containers.iter().map(|c| c.key()).collect();
        let states: Vec<String> = search.states.iter().map(|s| s.as_str().to_string()).collect();

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT j.document FROM jobs j WHERE EXISTS (SELECT 1 FROM json_each(j.container_keys) AS k WHERE k.value IN ",
        );
        push_list(&mut qb, &keys);
        qb.push(")");
        if !states.is_empty() {
            qb.push(" AND j.state IN ");
            push_list(&mut qb, &states);
        }
        if !search.tags.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM json_each(j.tags) AS t WHERE t.value IN ");
            push_list(&mut qb, &search.tags);
            qb.push(")");
        }
        qb.push(" ORDER BY j.modified DESC, j.id ASC LIMIT ")
            .push_bind(i64::from(search.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(search.skip));

        self.fetch_documents(qb).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{pending_job, setup_test_db};
    use gearflow_core::domain::{ContainerKind, ContainerRef, QueueLists};

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = pending_job("j1", 1_000);

        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(repo.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = pending_job("j1", 1_000);
        repo.insert(&job).await.unwrap();

        let err = repo.insert(&job).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_by_ids_keeps_order_and_skips_missing() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("a", 1)).await.unwrap();
        repo.insert(&pending_job("b", 2)).await.unwrap();

        let ids = vec!["b".to_string(), "zzz".to_string(), "a".to_string()];
        let found = repo.find_by_ids(&ids).await.unwrap();
        let found_ids: Vec<&str> = found.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(found_ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_claim_next_takes_oldest_pending() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("newer", 2_000)).await.unwrap();
        repo.insert(&pending_job("older", 1_000)).await.unwrap();

        let claimed = repo
            .claim_next(&JobFilter::default(), 5_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, "older");
        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.modified, 5_000);
        assert_eq!(claimed.transitions[&JobState::Running], 5_000);

        let next = repo
            .claim_next(&JobFilter::default(), 6_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, "newer");
        assert!(repo
            .claim_next(&JobFilter::default(), 7_000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_filter_and_capabilities() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let mut gpu = pending_job("gpu", 1_000);
        gpu.gear_info.capabilities = vec!["gpu".to_string()];
        repo.insert(&gpu).await.unwrap();
        let mut tagged = pending_job("tagged", 2_000);
        tagged.tags = vec!["urgent".to_string()];
        repo.insert(&tagged).await.unwrap();

        // Without the capability the gpu job is invisible
        let plain = JobFilter::default();
        assert_eq!(repo.peek_next(&plain).await.unwrap().unwrap().id, "tagged");

        let skip_urgent = JobFilter::new(
            QueueLists::default(),
            QueueLists {
                tag: vec!["urgent".to_string()],
                ..Default::default()
            },
            vec!["gpu".to_string()],
        );
        assert_eq!(repo.peek_next(&skip_urgent).await.unwrap().unwrap().id, "gpu");

        let only_other_group = JobFilter::new(
            QueueLists {
                group: vec!["other".to_string()],
                ..Default::default()
            },
            QueueLists::default(),
            vec!["gpu".to_string()],
        );
        assert!(repo.claim_next(&only_other_group, 3_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_next_does_not_mutate() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = pending_job("j1", 1_000);
        repo.insert(&job).await.unwrap();

        let peeked = repo.peek_next(&JobFilter::default()).await.unwrap().unwrap();
        assert_eq!(peeked, job);
        assert_eq!(repo.find_by_id(&job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_compare_and_swap_guards() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = pending_job("j1", 1_000);
        repo.insert(&job).await.unwrap();

        let mut running = job.clone();
        running.transition(JobState::Running, 2_000).unwrap();
        let swapped = repo
            .compare_and_swap(&running, &CasGuard::in_state(JobState::Pending))
            .await
            .unwrap();
        assert_eq!(swapped, Some(running.clone()));

        // Stale copy loses
        assert!(repo
            .compare_and_swap(&running, &CasGuard::in_state(JobState::Pending))
            .await
            .unwrap()
            .is_none());

        // Not older than the cutoff
        let mut failed = running.clone();
        failed.transition(JobState::Failed, 3_000).unwrap();
        assert!(repo
            .compare_and_swap(&failed, &CasGuard::stale(JobState::Running, 2_000))
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .compare_and_swap(&failed, &CasGuard::stale(JobState::Running, 2_001))
            .await
            .unwrap()
            .is_some());

        let mut retried = failed.clone();
        retried.retried = Some(4_000);
        assert!(repo
            .compare_and_swap(&retried, &CasGuard::unretried(JobState::Failed))
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .compare_and_swap(&retried, &CasGuard::unretried(JobState::Failed))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_one_retry_per_job() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("j1", 1_000)).await.unwrap();

        let mut retry = pending_job("j2", 2_000);
        retry.previous_job_id = Some("j1".to_string());
        retry.attempt = 2;
        repo.insert(&retry).await.unwrap();

        let mut duplicate = pending_job("j3", 2_000);
        duplicate.previous_job_id = Some("j1".to_string());
        let err = repo.insert(&duplicate).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let found = repo.find_retry_of(&"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.id, "j2");
        assert!(repo.find_retry_of(&"j2".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_by_state_zero_fills() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("a", 1)).await.unwrap();
        repo.insert(&pending_job("b", 2)).await.unwrap();
        repo.claim_next(&JobFilter::default(), 10).await.unwrap();

        let counts = repo.count_by_state(&JobFilter::default()).await.unwrap();
        assert_eq!(counts.len(), JobState::ALL.len());
        assert_eq!(counts[&JobState::Pending], 1);
        assert_eq!(counts[&JobState::Running], 1);
        assert_eq!(counts[&JobState::Complete], 0);
    }

    #[tokio::test]
    async fn test_find_stale_running_skips_excluded() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("a", 1)).await.unwrap();
        repo.insert(&pending_job("b", 2)).await.unwrap();
        repo.claim_next(&JobFilter::default(), 100).await.unwrap();
        repo.claim_next(&JobFilter::default(), 200).await.unwrap();

        let stale = repo.find_stale_running(150, &[]).await.unwrap().unwrap();
        assert_eq!(stale.id, "a");
        assert!(repo
            .find_stale_running(150, &["a".to_string()])
            .await
            .unwrap()
            .is_none());
        let next = repo
            .find_stale_running(300, &["a".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, "b");
    }

    #[tokio::test]
    async fn test_search_by_containers() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        repo.insert(&pending_job("old", 1)).await.unwrap();
        let mut newer = pending_job("new", 2);
        newer.tags = vec!["batch".to_string()];
        repo.insert(&newer).await.unwrap();
        let mut elsewhere = pending_job("elsewhere", 3);
        elsewhere.destination = ContainerRef::new(ContainerKind::Session, "ses-9");
        elsewhere.inputs.clear();
        repo.insert(&elsewhere).await.unwrap();

        let acq = ContainerRef::new(ContainerKind::Acquisition, "acq-1");
        let mut search = ContainerSearch {
            containers: vec![acq.clone()],
            limit: 10,
            ..Default::default()
        };
        let found: Vec<String> = repo
            .search_by_containers(&search)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(found, vec!["new".to_string(), "old".to_string()]);

        search.skip = 1;
        let page = repo.search_by_containers(&search).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "old");

        search.skip = 0;
        search.tags = vec!["batch".to_string()];
        assert_eq!(repo.search_by_containers(&search).await.unwrap().len(), 1);

        search.tags.clear();
        search.states = vec![JobState::Complete];
        assert!(repo.search_by_containers(&search).await.unwrap().is_empty());

        let empty = ContainerSearch {
            limit: 10,
            ..Default::default()
        };
        assert!(repo.search_by_containers(&empty).await.unwrap().is_empty());
    }
}
