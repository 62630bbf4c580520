// Gear Publishing Use Case

use crate::domain::{Gear, GearId};
use crate::error::{AppError, Result};
use crate::port::{GearRegistry, IdProvider, RuleRepository, TimeProvider};
use std::sync::Arc;
use tracing::info;

/// Publishes gear versions and moves auto-updating rules onto them
pub struct GearPublisher {
    registry: Arc<dyn GearRegistry>,
    rules: Arc<dyn RuleRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl GearPublisher {
    pub fn new(
        registry: Arc<dyn GearRegistry>,
        rules: Arc<dyn RuleRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            rules,
            id_provider,
            time_provider,
        }
    }

    /// Store a new (name, version) and return it with id and timestamp assigned
    pub async fn publish_gear(&self, mut gear: Gear) -> Result<Gear> {
        if gear.name.trim().is_empty() || gear.version.trim().is_empty() {
            return Err(AppError::Validation(
                "Gear name and version are required".to_string(),
            ));
        }
        gear.validate_manifest()?;
        if gear.id.is_empty() {
            gear.id = self.id_provider.generate_id();
        }
        gear.created = self.time_provider.now_millis();

        self.registry.insert_gear(&gear).await?;
        info!(gear_id = %gear.id, name = %gear.name, version = %gear.version, "Gear published");

        let previous: Vec<GearId> = self
            .registry
            .list_versions(&gear.name)
            .await?
            .into_iter()
            .map(|g| g.id)
            .filter(|id| *id != gear.id)
            .collect();
        if previous.is_empty() {
            return Ok(gear);
        }

        for mut rule in self.rules.find_auto_update(&previous).await? {
            rule.gear_id = gear.id.clone();
            self.rules.update(&rule).await?;
            info!(rule_id = %rule.id, gear_id = %gear.id, "Auto-updated rule to new gear version");
        }
        Ok(gear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Rule, RuleMatcher, MatchKind};
    use crate::port::gear_catalog::mocks::InMemoryGearCatalog;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::rule_repository::mocks::InMemoryRuleRepository;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use serde_json::json;

    fn gear(version: &str) -> Gear {
        serde_json::from_value(json!({
            "id": "",
            "name": "dcm2niix",
            "version": version,
            "category": "converter",
            "rootfs_url": "https://registry.example.org/dcm2niix.tar.gz"
        }))
        .unwrap()
    }

    fn rule(id: &str, gear_id: &str, auto_update: bool) -> Rule {
        Rule {
            id: id.to_string(),
            project_id: "p1".to_string(),
            name: id.to_string(),
            gear_id: gear_id.to_string(),
            any: vec![RuleMatcher::new(MatchKind::FileType, "dicom")],
            all: Vec::new(),
            not: Vec::new(),
            config: None,
            fixed_inputs: Default::default(),
            auto_update,
            disabled: false,
        }
    }

    fn publisher(rules: Arc<InMemoryRuleRepository>, clock: Arc<FixedTimeProvider>) -> GearPublisher {
        GearPublisher::new(
            Arc::new(InMemoryGearCatalog::new()),
            rules,
            Arc::new(SequentialIdProvider::new("gear")),
            clock,
        )
    }

    #[tokio::test]
    async fn test_duplicate_version_conflicts() {
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let publisher = publisher(Arc::new(InMemoryRuleRepository::new()), clock);

        publisher.publish_gear(gear("1.0.0")).await.unwrap();
        let err = publisher.publish_gear(gear("1.0.0")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_manifest_with_broken_schema_is_rejected() {
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let publisher = publisher(Arc::new(InMemoryRuleRepository::new()), clock);

        let mut broken = gear("2.0.0");
        broken.inputs = serde_json::from_value(json!({
            "dicom": {"base": "file", "type": {"enum": "dicom"}}
        }))
        .unwrap();

        let err = publisher.publish_gear(broken).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(crate::domain::DomainError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_update_rules_follow_new_version() {
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let rules = Arc::new(InMemoryRuleRepository::new());
        let publisher = publisher(rules.clone(), clock.clone());

        let v1 = publisher.publish_gear(gear("1.0.0")).await.unwrap();
        rules.insert(&rule("follow", &v1.id, true)).await.unwrap();
        rules.insert(&rule("pinned", &v1.id, false)).await.unwrap();

        clock.advance(1_000);
        let v2 = publisher.publish_gear(gear("1.1.0")).await.unwrap();

        let follow = rules.find_by_id(&"follow".to_string()).await.unwrap().unwrap();
        let pinned = rules.find_by_id(&"pinned".to_string()).await.unwrap().unwrap();
        assert_eq!(follow.gear_id, v2.id);
        assert_eq!(pinned.gear_id, v1.id);
    }
}
