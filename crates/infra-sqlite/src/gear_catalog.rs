// SQLite gear catalog

use crate::error::{decode, encode, map_sqlx_error};
use async_trait::async_trait;
use gearflow_core::domain::{Gear, GearId};
use gearflow_core::error::{AppError, Result};
use gearflow_core::port::{GearCatalog, GearRegistry};
use sqlx::SqlitePool;

pub struct SqliteGearCatalog {
    pool: SqlitePool,
}

impl SqliteGearCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GearCatalog for SqliteGearCatalog {
    async fn get_gear(&self, id: &GearId) -> Result<Option<Gear>> {
        let document: Option<String> = sqlx::query_scalar("SELECT document FROM gears WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }

    async fn get_latest_gear_by_name(&self, name: &str) -> Result<Option<Gear>> {
        let document: Option<String> = sqlx::query_scalar(
            "SELECT document FROM gears WHERE name = ? ORDER BY created DESC, rowid DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        document.map(|d| decode(&d)).transpose()
    }
}

#[async_trait]
impl GearRegistry for SqliteGearCatalog {
    async fn insert_gear(&self, gear: &Gear) -> Result<()> {
        sqlx::query("INSERT INTO gears (id, name, version, created, document) VALUES (?, ?, ?, ?, ?)")
            .bind(&gear.id)
            .bind(&gear.name)
            .bind(&gear.version)
            .bind(gear.created)
            .bind(encode(gear)?)
            .execute(&self.pool)
            .await
            .map_err(|e| match map_sqlx_error(e) {
                AppError::Conflict(_) => AppError::Conflict(format!(
                    "gear {}:{} already exists",
                    gear.name, gear.version
                )),
                other => other,
            })?;

        tracing::info!(gear = %gear.name, version = %gear.version, "Gear published");
        Ok(())
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<Gear>> {
        let documents: Vec<String> =
            sqlx::query_scalar("SELECT document FROM gears WHERE name = ? ORDER BY created, rowid")
                .bind(name)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        documents.iter().map(|d| decode(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{gear, setup_test_db};

    #[tokio::test]
    async fn test_latest_version_wins() {
        let catalog = SqliteGearCatalog::new(setup_test_db().await);
        catalog.insert_gear(&gear("g1", "dcm2niix", "1.0.0", 1_000)).await.unwrap();
        catalog.insert_gear(&gear("g2", "dcm2niix", "1.1.0", 2_000)).await.unwrap();
        catalog.insert_gear(&gear("g3", "afq", "0.1.0", 3_000)).await.unwrap();

        let latest = catalog.get_latest_gear_by_name("dcm2niix").await.unwrap().unwrap();
        assert_eq!(latest.id, "g2");
        assert_eq!(catalog.get_gear(&"g1".to_string()).await.unwrap().unwrap().version, "1.0.0");
        assert!(catalog.get_latest_gear_by_name("missing").await.unwrap().is_none());

        let versions = catalog.list_versions("dcm2niix").await.unwrap();
        let ids: Vec<&str> = versions.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_duplicate_version_conflicts() {
        let catalog = SqliteGearCatalog::new(setup_test_db().await);
        catalog.insert_gear(&gear("g1", "dcm2niix", "1.0.0", 1_000)).await.unwrap();

        let err = catalog
            .insert_gear(&gear("g2", "dcm2niix", "1.0.0", 2_000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("dcm2niix:1.0.0")));
    }
}
