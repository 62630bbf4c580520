// Match Engine
//
// Maps candidate files (and resolved context) onto a gear's declared inputs
// and sorts containers into matched / not_matched / ambiguous.

use crate::domain::{
    AccessLevel, Container, ContainerRef, ContextValue, FileEntry, FileRef, Gear, GearInput,
    JobInput, OptionalInputPolicy,
};
use crate::error::Result;
use crate::port::ContainerCatalog;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Candidate fills for one gear input
#[derive(Debug, Clone, PartialEq)]
pub enum Suggestion {
    /// Names of files satisfying the input schema
    Files(Vec<String>),
    Context(ContextValue),
}

impl Suggestion {
    fn candidate_count(&self) -> usize {
        match self {
            Suggestion::Files(names) => names.len(),
            Suggestion::Context(_) => 1,
        }
    }
}

pub type Suggestions = BTreeMap<String, Suggestion>;

/// Per file input, all files satisfying its schema; per context input, the lookup result.
/// Api-key inputs are filled at dispatch and never suggested.
pub fn suggest(gear: &Gear, files: &[FileEntry], context: &Map<String, Value>) -> Suggestions {
    let mut suggestions = Suggestions::new();
    for (name, input) in &gear.inputs {
        match input {
            GearInput::File(spec) => {
                let names = match spec.matcher() {
                    Ok(matcher) => files
                        .iter()
                        .filter(|f| matcher.accepts(f))
                        .map(|f| f.name.clone())
                        .collect(),
                    Err(e) => {
                        warn!(gear_id = %gear.id, input = %name, error = %e, "Unusable file input schema");
                        Vec::new()
                    }
                };
                suggestions.insert(name.clone(), Suggestion::Files(names));
            }
            GearInput::Context(_) => {
                let value = match context.get(name) {
                    Some(v) => ContextValue {
                        found: true,
                        value: Some(v.clone()),
                    },
                    None => ContextValue {
                        found: false,
                        value: None,
                    },
                };
                suggestions.insert(name.clone(), Suggestion::Context(value));
            }
            GearInput::ApiKey(_) => {}
        }
    }
    suggestions
}

/// Resolve gear run context for `destination`, walking the hierarchy top-down.
///
/// Each level overrides keys set above it. With a uid, levels the user cannot
/// read are skipped.
pub async fn resolve_context(
    catalog: &dyn ContainerCatalog,
    destination: &ContainerRef,
    uid: Option<&str>,
) -> Result<Map<String, Value>> {
    let mut chain = catalog.get_parent_chain(destination).await?;
    if let Some(container) = catalog.get_container(destination).await? {
        chain.push(container);
    }

    let mut context = Map::new();
    for level in &chain {
        if let Some(uid) = uid {
            if !level.has_access(uid, AccessLevel::ReadOnly) {
                continue;
            }
        }
        let Some(entries) = level.context() else {
            continue;
        };
        for (key, entry) in entries {
            let value = entry.get("value").cloned().unwrap_or_else(|| entry.clone());
            if !value.is_null() {
                context.insert(key.clone(), value);
            }
        }
    }
    Ok(context)
}

/// Container plus its resolved context, ready for classification
#[derive(Debug, Clone)]
pub struct Candidate {
    pub container: Container,
    pub context: Map<String, Value>,
}

impl Candidate {
    pub fn without_context(container: Container) -> Self {
        Self {
            container,
            context: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Concrete 1:1 input map
    Matched(BTreeMap<String, JobInput>),
    NotMatched,
    Ambiguous,
}

/// Classify one container against `gear`
pub fn classify_container(
    gear: &Gear,
    candidate: &Candidate,
    policy: OptionalInputPolicy,
) -> MatchOutcome {
    let container = &candidate.container;
    if container.files.is_empty() {
        return MatchOutcome::NotMatched;
    }

    let suggestions = suggest(gear, &container.files, &candidate.context);

    let mut ambiguous = false;
    for (name, suggestion) in &suggestions {
        let optional = gear.inputs.get(name).is_some_and(GearInput::is_optional);
        let ignore_optional = policy == OptionalInputPolicy::Ignored && optional;
        let required = policy == OptionalInputPolicy::Required || !optional;

        let count = suggestion.candidate_count();
        if count > 1 && !ignore_optional {
            ambiguous = true;
        } else if required && count == 0 {
            return MatchOutcome::NotMatched;
        }
    }
    if ambiguous {
        return MatchOutcome::Ambiguous;
    }

    let mut inputs = BTreeMap::new();
    for (name, suggestion) in suggestions {
        let optional = gear.inputs.get(&name).is_some_and(GearInput::is_optional);
        let skip = policy == OptionalInputPolicy::Ignored || suggestion.candidate_count() == 0;
        if skip && optional {
            continue;
        }
        match suggestion {
            Suggestion::Files(names) => {
                if let Some(first) = names.into_iter().next() {
                    inputs.insert(
                        name,
                        JobInput::File(FileRef::new(container.kind, container.id.clone(), first)),
                    );
                }
            }
            Suggestion::Context(value) => {
                inputs.insert(name, JobInput::Context(value));
            }
        }
    }
    MatchOutcome::Matched(inputs)
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub matched: Vec<(Container, BTreeMap<String, JobInput>)>,
    pub not_matched: Vec<Container>,
    pub ambiguous: Vec<Container>,
}

/// Classify every candidate, preserving input order within each bucket
pub fn classify(
    gear: &Gear,
    candidates: Vec<Candidate>,
    policy: OptionalInputPolicy,
) -> Classification {
    let mut out = Classification::default();
    for candidate in candidates {
        match classify_container(gear, &candidate, policy) {
            MatchOutcome::Matched(inputs) => out.matched.push((candidate.container, inputs)),
            MatchOutcome::NotMatched => out.not_matched.push(candidate.container),
            MatchOutcome::Ambiguous => out.ambiguous.push(candidate.container),
        }
    }
    out
}
