// SQLite container catalog
//
// The scheduler only reads the hierarchy; containers are written here by
// seeding (`put`) and by batch runs creating analyses.

use crate::error::{decode, encode, map_sqlx_error};
use async_trait::async_trait;
use gearflow_core::domain::{Container, ContainerId, ContainerKind, ContainerRef, JobId};
use gearflow_core::error::{AppError, Result};
use gearflow_core::port::ContainerCatalog;
use sqlx::SqlitePool;

pub struct SqliteContainerCatalog {
    pool: SqlitePool,
}

impl SqliteContainerCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a container document
    pub async fn put(&self, container: &Container) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO containers (kind, id, document) VALUES (?, ?, ?)
            ON CONFLICT (kind, id) DO UPDATE SET document = excluded.document
            "#,
        )
        .bind(container.kind.as_str())
        .bind(&container.id)
        .bind(encode(container)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Job filling an analysis, once a batch run linked one
    pub async fn analysis_job(&self, analysis_id: &str) -> Result<Option<JobId>> {
        let job_id: Option<Option<String>> = sqlx::query_scalar(
            "SELECT analysis_job_id FROM containers WHERE kind = 'analysis' AND id = ?",
        )
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(job_id.flatten())
    }
}

#[async_trait]
impl ContainerCatalog for SqliteContainerCatalog {
    async fn get_container(&self, reference: &ContainerRef) -> Result<Option<Container>> {
        let document: Option<String> =
            sqlx::query_scalar("SELECT document FROM containers WHERE kind = ? AND id = ?")
                .bind(reference.kind.as_str())
                .bind(&reference.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn get_parent_chain(&self, reference: &ContainerRef) -> Result<Vec<Container>> {
        let Some(container) = self.get_container(reference).await? else {
            return Ok(Vec::new());
        };

        // BTreeMap order walks group -> acquisition
        let mut chain = Vec::new();
        for (kind, id) in container.parents.iter().filter(|(k, _)| **k != container.kind) {
            if let Some(parent) = self.get_container(&ContainerRef::new(*kind, id.clone())).await? {
                chain.push(parent);
            }
        }
        Ok(chain)
    }

    async fn find_descendants(
        &self,
        root: &ContainerRef,
        kind: ContainerKind,
    ) -> Result<Vec<Container>> {
        let documents: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT document FROM containers
            WHERE kind = ?
              AND ((kind = ? AND id = ?) OR json_extract(document, ?) = ?)
            ORDER BY id
            "#,
        )
        .bind(kind.as_str())
        .bind(root.kind.as_str())
        .bind(&root.id)
        .bind(format!("$.parents.{}", root.kind))
        .bind(&root.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        documents.iter().map(|d| decode(d)).collect()
    }

    async fn create_analysis(&self, analysis: &Container) -> Result<()> {
        if analysis.kind != ContainerKind::Analysis {
            return Err(AppError::Validation(format!(
                "{} is not an analysis",
                analysis.reference()
            )));
        }
        sqlx::query("INSERT INTO containers (kind, id, document) VALUES (?, ?, ?)")
            .bind(analysis.kind.as_str())
            .bind(&analysis.id)
            .bind(encode(analysis)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_analysis_job(&self, analysis_id: &ContainerId, job_id: &JobId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE containers SET analysis_job_id = ? WHERE kind = 'analysis' AND id = ?",
        )
        .bind(job_id)
        .bind(analysis_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("analysis {}", analysis_id)));
        }
        Ok(())
    }
}
