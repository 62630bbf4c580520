// SQLite completion tickets

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use gearflow_core::domain::JobId;
use gearflow_core::error::Result;
use gearflow_core::port::{JobTicket, JobTicketRepository};
use sqlx::SqlitePool;

pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    job_id: String,
    created: i64,
}

impl From<TicketRow> for JobTicket {
    fn from(row: TicketRow) -> Self {
        JobTicket {
            id: row.id,
            job_id: row.job_id,
            created: row.created,
        }
    }
}

#[async_trait]
impl JobTicketRepository for SqliteTicketRepository {
    async fn create(&self, ticket: &JobTicket) -> Result<()> {
        sqlx::query("INSERT INTO job_tickets (id, job_id, created) VALUES (?, ?, ?)")
            .bind(&ticket.id)
            .bind(&ticket.job_id)
            .bind(ticket.created)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find(&self, ticket_id: &str) -> Result<Option<JobTicket>> {
        let row: Option<TicketRow> =
            sqlx::query_as("SELECT id, job_id, created FROM job_tickets WHERE id = ?")
                .bind(ticket_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(row.map(JobTicket::from))
    }

    async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<JobTicket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT id, job_id, created FROM job_tickets WHERE job_id = ? ORDER BY created, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(JobTicket::from).collect())
    }

    async fn remove(&self, ticket_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_tickets WHERE id = ?")
            .bind(ticket_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{pending_job, setup_test_db};
    use crate::SqliteJobRepository;
    use gearflow_core::port::JobRepository;

    #[tokio::test]
    async fn test_ticket_lifecycle() {
        let pool = setup_test_db().await;
        SqliteJobRepository::new(pool.clone())
            .insert(&pending_job("j1", 1_000))
            .await
            .unwrap();
        let repo = SqliteTicketRepository::new(pool);

        let ticket = JobTicket {
            id: "t1".to_string(),
            job_id: "j1".to_string(),
            created: 2_000,
        };
        repo.create(&ticket).await.unwrap();

        assert_eq!(repo.find("t1").await.unwrap(), Some(ticket.clone()));
        assert_eq!(repo.find_by_job(&"j1".to_string()).await.unwrap(), vec![ticket]);

        assert!(repo.remove("t1").await.unwrap());
        assert!(!repo.remove("t1").await.unwrap());
        assert!(repo.find_by_job(&"j1".to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticket_requires_existing_job() {
        let repo = SqliteTicketRepository::new(setup_test_db().await);
        let ticket = JobTicket {
            id: "t1".to_string(),
            job_id: "ghost".to_string(),
            created: 1,
        };
        assert!(repo.create(&ticket).await.is_err());
    }
}
