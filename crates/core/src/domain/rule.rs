// Rule Domain Model

use crate::domain::container::FileRef;
use crate::domain::error::{DomainError, Result};
use crate::domain::gear::GearId;
use crate::domain::pattern::compile_prefix_regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Rule ID (UUID v4)
pub type RuleId = String;

/// Project id used for site-wide rule templates
pub const SITE_SCOPE: &str = "site";

/// What a matcher inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    #[serde(rename = "file.type")]
    FileType,
    /// Shell glob over the file name
    #[serde(rename = "file.name")]
    FileName,
    #[serde(rename = "file.modality")]
    FileModality,
    /// Any classification value in any group
    #[serde(rename = "file.classification")]
    FileClassification,
    /// Any file on the container (the triggering one included) has this type
    #[serde(rename = "container.has-type")]
    ContainerHasType,
    #[serde(rename = "container.has-classification")]
    ContainerHasClassification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatcher {
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub value: String,
    #[serde(default)]
    pub regex: bool,
}

impl RuleMatcher {
    pub fn new(kind: MatchKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            regex: false,
        }
    }

    pub fn regex(kind: MatchKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            value: pattern.into(),
            regex: true,
        }
    }
}

/// Project-scoped trigger that spawns a gear run when a file matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    /// Owning project id, or `site`
    pub project_id: String,
    pub name: String,
    pub gear_id: GearId,
    #[serde(default)]
    pub any: Vec<RuleMatcher>,
    #[serde(default)]
    pub all: Vec<RuleMatcher>,
    #[serde(default)]
    pub not: Vec<RuleMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    /// Inputs pinned by the rule rather than filled by the triggering file
    #[serde(default)]
    pub fixed_inputs: BTreeMap<String, FileRef>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Rule {
    pub fn is_site_rule(&self) -> bool {
        self.project_id == SITE_SCOPE
    }

    pub fn matchers(&self) -> impl Iterator<Item = &RuleMatcher> {
        self.all.iter().chain(self.any.iter()).chain(self.not.iter())
    }

    /// Structural checks performed before a rule is stored
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidRule("rule name is required".to_string()));
        }

        let mut invalid: Vec<&str> = self
            .matchers()
            .filter(|m| m.regex && compile_prefix_regex(&m.value).is_err())
            .map(|m| m.value.as_str())
            .collect();
        if !invalid.is_empty() {
            invalid.sort_unstable();
            invalid.dedup();
            return Err(DomainError::InvalidRule(format!(
                "Cannot compile regex patterns: {}",
                invalid.join(", ")
            )));
        }

        if self.auto_update && self.config.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(DomainError::InvalidRule(
                "Gear rule cannot be auto-updated with a config".to_string(),
            ));
        }

        Ok(())
    }
}
