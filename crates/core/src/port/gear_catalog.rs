// Gear Catalog Port

use crate::domain::{DomainError, Gear, GearId};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Read-only lookup of published gears
#[async_trait]
pub trait GearCatalog: Send + Sync {
    async fn get_gear(&self, id: &GearId) -> Result<Option<Gear>>;

    /// Most recently published version of `name`
    async fn get_latest_gear_by_name(&self, name: &str) -> Result<Option<Gear>>;

    /// Validate `config` against the gear manifest, returning it with defaults filled
    fn validate_config(&self, gear: &Gear, config: &Map<String, Value>) -> Result<Map<String, Value>> {
        gear.validate_config(config).map_err(|e| match e {
            DomainError::ValidationError(msg) => AppError::Validation(msg),
            other => AppError::Domain(other),
        })
    }
}

/// Write side of the catalog used by gear publishing
#[async_trait]
pub trait GearRegistry: GearCatalog {
    /// Store a new gear; a duplicate (name, version) is a conflict
    async fn insert_gear(&self, gear: &Gear) -> Result<()>;

    /// Every published version of `name`
    async fn list_versions(&self, name: &str) -> Result<Vec<Gear>>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryGearCatalog {
        gears: Mutex<Vec<Gear>>,
    }

    impl InMemoryGearCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_gears(gears: Vec<Gear>) -> Self {
            Self {
                gears: Mutex::new(gears),
            }
        }
    }

    #[async_trait]
    impl GearCatalog for InMemoryGearCatalog {
        async fn get_gear(&self, id: &GearId) -> Result<Option<Gear>> {
            let gears = self.gears.lock().unwrap();
            Ok(gears.iter().find(|g| &g.id == id).cloned())
        }

        async fn get_latest_gear_by_name(&self, name: &str) -> Result<Option<Gear>> {
            let gears = self.gears.lock().unwrap();
            Ok(gears
                .iter()
                .filter(|g| g.name == name)
                .max_by_key(|g| g.created)
                .cloned())
        }
    }

    #[async_trait]
    impl GearRegistry for InMemoryGearCatalog {
        async fn insert_gear(&self, gear: &Gear) -> Result<()> {
            let mut gears = self.gears.lock().unwrap();
            if gears
                .iter()
                .any(|g| g.name == gear.name && g.version == gear.version)
            {
                return Err(AppError::Conflict(format!(
                    "gear {}:{} already exists",
                    gear.name, gear.version
                )));
            }
            gears.push(gear.clone());
            Ok(())
        }

        async fn list_versions(&self, name: &str) -> Result<Vec<Gear>> {
            let gears = self.gears.lock().unwrap();
            Ok(gears.iter().filter(|g| g.name == name).cloned().collect())
        }
    }
}
