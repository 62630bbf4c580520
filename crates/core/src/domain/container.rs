// Container Domain Model (catalog-owned documents the scheduler reads)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container identifier
pub type ContainerId = String;

/// User identifier used for permission checks
pub type UserId = String;

/// Level of the container hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Group,
    Project,
    Subject,
    Session,
    Acquisition,
    Analysis,
    Collection,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Group => "group",
            ContainerKind::Project => "project",
            ContainerKind::Subject => "subject",
            ContainerKind::Session => "session",
            ContainerKind::Acquisition => "acquisition",
            ContainerKind::Analysis => "analysis",
            ContainerKind::Collection => "collection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "group" | "groups" => Some(ContainerKind::Group),
            "project" | "projects" => Some(ContainerKind::Project),
            "subject" | "subjects" => Some(ContainerKind::Subject),
            "session" | "sessions" => Some(ContainerKind::Session),
            "acquisition" | "acquisitions" => Some(ContainerKind::Acquisition),
            "analysis" | "analyses" => Some(ContainerKind::Analysis),
            "collection" | "collections" => Some(ContainerKind::Collection),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a container (type + id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub id: ContainerId,
}

impl ContainerRef {
    pub fn new(kind: ContainerKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Stable `type:id` key, used for indexing and set membership
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.kind, self.id)
    }
}

/// Reference to a file attached to a container
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub id: ContainerId,
    pub name: String,
}

impl FileRef {
    pub fn new(kind: ContainerKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn container(&self) -> ContainerRef {
        ContainerRef::new(self.kind, self.id.clone())
    }

    /// Download URI handed to compute agents
    pub fn file_uri(&self) -> String {
        format!("/{}/{}/files/{}", plural(self.kind), self.id, self.name)
    }
}

fn plural(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Group => "groups",
        ContainerKind::Project => "projects",
        ContainerKind::Subject => "subjects",
        ContainerKind::Session => "sessions",
        ContainerKind::Acquisition => "acquisitions",
        ContainerKind::Analysis => "analyses",
        ContainerKind::Collection => "collections",
    }
}

/// File entry as stored on a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub size: u64,
    /// Classification groups (e.g. "Intent" -> ["Structural"])
    #[serde(default)]
    pub classification: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub info: serde_json::Value,
    /// Set on files produced by a job that failed; such files never trigger rules
    #[serde(default)]
    pub from_failed_job: bool,
}

impl FileEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    pub fn with_classification(
        mut self,
        group: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.classification
            .insert(group.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// All classification values across all groups
    pub fn classification_values(&self) -> impl Iterator<Item = &str> {
        self.classification
            .values()
            .flat_map(|values| values.iter().map(String::as_str))
    }
}

/// Permission level, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "_id")]
    pub user_id: UserId,
    pub access: AccessLevel,
}

/// Container document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub id: ContainerId,
    #[serde(default)]
    pub label: Option<String>,
    /// Ancestor ids keyed by level
    #[serde(default)]
    pub parents: BTreeMap<ContainerKind, ContainerId>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Free-form metadata; gear run context lives under `info.context`
    #[serde(default)]
    pub info: serde_json::Value,
}

impl Container {
    pub fn new(kind: ContainerKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: None,
            parents: BTreeMap::new(),
            files: Vec::new(),
            permissions: Vec::new(),
            info: serde_json::Value::Null,
        }
    }

    pub fn reference(&self) -> ContainerRef {
        ContainerRef::new(self.kind, self.id.clone())
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn has_access(&self, uid: &str, level: AccessLevel) -> bool {
        self.permissions
            .iter()
            .any(|p| p.user_id == uid && p.access >= level)
    }

    /// Context values published on this container (`info.context`)
    pub fn context(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.info.get("context").and_then(|c| c.as_object())
    }

    /// Container id plus all ancestor ids
    pub fn related_ids(&self) -> impl Iterator<Item = &ContainerId> {
        std::iter::once(&self.id).chain(self.parents.values())
    }
}
