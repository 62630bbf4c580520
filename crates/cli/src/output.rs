//! Table rendering for job, batch and rule documents

use serde_json::Value;
use tabled::{Table, Tabled};

#[derive(Debug, Tabled)]
pub struct JobRow {
    pub id: String,
    pub gear: String,
    pub state: String,
    pub attempt: String,
    pub destination: String,
    pub provider: String,
}

impl JobRow {
    pub fn from_json(job: &Value) -> Self {
        let gear = format!(
            "{}:{}",
            text(&job["gear_info"]["name"]),
            text(&job["gear_info"]["version"])
        );
        let destination = format!(
            "{}/{}",
            text(&job["destination"]["type"]),
            text(&job["destination"]["id"])
        );
        Self {
            id: text(&job["id"]),
            gear,
            state: text(&job["state"]),
            attempt: text(&job["attempt"]),
            destination,
            provider: text(&job["compute_provider_id"]),
        }
    }
}

#[derive(Debug, Tabled)]
pub struct StateRow {
    pub state: String,
    pub count: String,
}

#[derive(Debug, Tabled)]
pub struct RuleRow {
    pub id: String,
    pub name: String,
    pub gear_id: String,
    pub disabled: String,
    pub auto_update: String,
}

impl RuleRow {
    pub fn from_json(rule: &Value) -> Self {
        Self {
            id: text(&rule["id"]),
            name: text(&rule["name"]),
            gear_id: text(&rule["gear_id"]),
            disabled: flag(&rule["disabled"]),
            auto_update: flag(&rule["auto_update"]),
        }
    }
}

/// Strings print bare, missing values as `-`
pub fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flag(value: &Value) -> String {
    value.as_bool().unwrap_or(false).to_string()
}

pub fn jobs_table(jobs: &[Value]) -> String {
    Table::new(jobs.iter().map(JobRow::from_json)).to_string()
}

pub fn states_table(states: &Value) -> String {
    let rows: Vec<StateRow> = states
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(state, count)| StateRow {
                    state: state.clone(),
                    count: text(count),
                })
                .collect()
        })
        .unwrap_or_default();
    Table::new(rows).to_string()
}

pub fn rules_table(rules: &[Value]) -> String {
    Table::new(rules.iter().map(RuleRow::from_json)).to_string()
}
