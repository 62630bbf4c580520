// Rule Repository Port

use crate::domain::{GearId, Rule, RuleId};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn insert(&self, rule: &Rule) -> Result<()>;

    async fn find_by_id(&self, id: &RuleId) -> Result<Option<Rule>>;

    /// Rules owned by `project_id` (or `site`); disabled ones only on request
    async fn list_for_project(&self, project_id: &str, include_disabled: bool) -> Result<Vec<Rule>>;

    async fn update(&self, rule: &Rule) -> Result<()>;

    /// Auto-updating rules currently pointing at any of `gear_ids`
    async fn find_auto_update(&self, gear_ids: &[GearId]) -> Result<Vec<Rule>>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryRuleRepository {
        rules: Mutex<Vec<Rule>>,
    }

    impl InMemoryRuleRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rules(rules: Vec<Rule>) -> Self {
            Self {
                rules: Mutex::new(rules),
            }
        }
    }

    #[async_trait]
    impl RuleRepository for InMemoryRuleRepository {
        async fn insert(&self, rule: &Rule) -> Result<()> {
            self.rules.lock().unwrap().push(rule.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &RuleId) -> Result<Option<Rule>> {
            let rules = self.rules.lock().unwrap();
            Ok(rules.iter().find(|r| &r.id == id).cloned())
        }

        async fn list_for_project(
            &self,
            project_id: &str,
            include_disabled: bool,
        ) -> Result<Vec<Rule>> {
            let rules = self.rules.lock().unwrap();
            Ok(rules
                .iter()
                .filter(|r| r.project_id == project_id && (include_disabled || !r.disabled))
                .cloned()
                .collect())
        }

        async fn update(&self, rule: &Rule) -> Result<()> {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(stored) => {
                    *stored = rule.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("rule {}", rule.id))),
            }
        }

        async fn find_auto_update(&self, gear_ids: &[GearId]) -> Result<Vec<Rule>> {
            let rules = self.rules.lock().unwrap();
            Ok(rules
                .iter()
                .filter(|r| r.auto_update && gear_ids.contains(&r.gear_id))
                .cloned()
                .collect())
        }
    }
}
