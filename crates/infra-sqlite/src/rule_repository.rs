// SQLite RuleRepository Implementation

use crate::error::{decode, encode, map_sqlx_error};
use crate::filter::push_list;
use async_trait::async_trait;
use gearflow_core::domain::{GearId, Rule, RuleId};
use gearflow_core::error::{AppError, Result};
use gearflow_core::port::RuleRepository;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode_all(documents: Vec<String>) -> Result<Vec<Rule>> {
    documents.iter().map(|d| decode(d)).collect()
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn insert(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rules (id, project_id, gear_id, auto_update, disabled, document)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.project_id)
        .bind(&rule.gear_id)
        .bind(rule.auto_update)
        .bind(rule.disabled)
        .bind(encode(rule)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &RuleId) -> Result<Option<Rule>> {
        let document: Option<String> = sqlx::query_scalar("SELECT document FROM rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn list_for_project(&self, project_id: &str, include_disabled: bool) -> Result<Vec<Rule>> {
        let documents: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT document FROM rules
            WHERE project_id = ? AND (? OR disabled = 0)
            ORDER BY rowid
            "#,
        )
        .bind(project_id)
        .bind(include_disabled)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        decode_all(documents)
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rules
            SET project_id = ?, gear_id = ?, auto_update = ?, disabled = ?, document = ?
            WHERE id = ?
            "#,
        )
        .bind(&rule.project_id)
        .bind(&rule.gear_id)
        .bind(rule.auto_update)
        .bind(rule.disabled)
        .bind(encode(rule)?)
        .bind(&rule.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    async fn find_auto_update(&self, gear_ids: &[GearId]) -> Result<Vec<Rule>> {
        if gear_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT document FROM rules WHERE auto_update = 1 AND gear_id IN ",
        );
        push_list(&mut qb, gear_ids);
        qb.push(" ORDER BY rowid");

        let rows: Vec<(String,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        decode_all(rows.into_iter().map(|(d,)| d).collect())
    }
}
