// Queue Selection Model (whitelist / blacklist / capability filtering)

use crate::domain::job::{Job, JobState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One side (whitelist or blacklist) of a queue selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueLists {
    #[serde(default)]
    pub group: Vec<String>,
    #[serde(default)]
    pub gear_name: Vec<String>,
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub compute_provider: Vec<String>,
    #[serde(default)]
    pub created_by: Vec<String>,
}

impl QueueLists {
    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
            && self.gear_name.is_empty()
            && self.tag.is_empty()
            && self.compute_provider.is_empty()
            && self.created_by.is_empty()
    }
}

/// Compiled job predicate shared by dispatch, statistics and the SQL adapter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub whitelist: QueueLists,
    #[serde(default)]
    pub blacklist: QueueLists,
    /// Jobs whose gear capabilities are a subset of these are eligible
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn in_list(list: &[String], value: Option<&str>) -> bool {
    value.is_some_and(|v| list.iter().any(|item| item == v))
}

fn scalar_ok(white: &[String], black: &[String], value: Option<&str>) -> bool {
    if !white.is_empty() && !in_list(white, value) {
        return false;
    }
    if !black.is_empty() && in_list(black, value) {
        return false;
    }
    true
}

impl JobFilter {
    pub fn new(whitelist: QueueLists, blacklist: QueueLists, capabilities: Vec<String>) -> Self {
        Self {
            whitelist,
            blacklist,
            capabilities,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        let (w, b) = (&self.whitelist, &self.blacklist);

        if !scalar_ok(&w.group, &b.group, job.group()) {
            return false;
        }
        if !scalar_ok(&w.gear_name, &b.gear_name, Some(&job.gear_info.name)) {
            return false;
        }
        if !scalar_ok(
            &w.compute_provider,
            &b.compute_provider,
            Some(&job.compute_provider_id),
        ) {
            return false;
        }
        if !scalar_ok(&w.created_by, &b.created_by, job.origin.id.as_deref()) {
            return false;
        }

        // Array field: whitelist needs one shared tag, blacklist forbids any
        if !w.tag.is_empty() && !job.tags.iter().any(|t| w.tag.contains(t)) {
            return false;
        }
        if job.tags.iter().any(|t| b.tag.contains(t)) {
            return false;
        }

        job.gear_info
            .capabilities
            .iter()
            .all(|c| self.capabilities.contains(c))
    }
}

/// Translate `!tag` entries into a blacklist; the rest whitelist
pub fn legacy_tag_parse(tags: &[String]) -> (QueueLists, QueueLists) {
    let mut whitelist = QueueLists::default();
    let mut blacklist = QueueLists::default();
    for tag in tags {
        match tag.strip_prefix('!') {
            Some(excluded) => blacklist.tag.push(excluded.to_string()),
            None => whitelist.tag.push(tag.clone()),
        }
    }
    (whitelist, blacklist)
}

/// What the caller wants back from `Ask`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskReturn {
    #[serde(default)]
    pub jobs: u32,
    #[serde(default)]
    pub states: bool,
    #[serde(default)]
    pub peek: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskQuery {
    #[serde(default)]
    pub whitelist: QueueLists,
    #[serde(default)]
    pub blacklist: QueueLists,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(rename = "return", default)]
    pub want: AskReturn,
}

impl AskQuery {
    pub fn filter(&self) -> JobFilter {
        JobFilter::new(
            self.whitelist.clone(),
            self.blacklist.clone(),
            self.capabilities.clone(),
        )
    }
}

/// Per-state job counts, always carrying all five states
pub type StateCounts = BTreeMap<JobState, u64>;

pub fn zero_filled_counts() -> StateCounts {
    JobState::ALL.into_iter().map(|s| (s, 0)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<Job>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<StateCounts>,
}
