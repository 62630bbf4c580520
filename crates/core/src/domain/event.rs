// Container Event Model

use crate::domain::container::{Container, ContainerRef, FileRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerEventKind {
    #[serde(alias = "container_created")]
    Created,
    #[serde(alias = "container_updated")]
    Updated,
    #[serde(alias = "container_deleted")]
    Deleted,
    #[serde(alias = "container_files_updated")]
    FilesUpdated,
}

impl std::fmt::Display for ContainerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerEventKind::Created => "created",
            ContainerEventKind::Updated => "updated",
            ContainerEventKind::Deleted => "deleted",
            ContainerEventKind::FilesUpdated => "files_updated",
        };
        f.write_str(s)
    }
}

/// Ephemeral notification of a container change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub kind: ContainerEventKind,
    pub container: ContainerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Container>,
    /// Files overwritten in place by this change
    #[serde(default)]
    pub replaced_files: Vec<FileRef>,
}

impl ContainerEvent {
    pub fn new(kind: ContainerEventKind, container: ContainerRef) -> Self {
        Self {
            kind,
            container,
            before: None,
            after: None,
            replaced_files: Vec::new(),
        }
    }

    pub fn files_updated(before: Container, after: Container) -> Self {
        Self {
            kind: ContainerEventKind::FilesUpdated,
            container: after.reference(),
            before: Some(before),
            after: Some(after),
            replaced_files: Vec::new(),
        }
    }

    pub fn with_replaced_files(mut self, replaced: Vec<FileRef>) -> Self {
        self.replaced_files = replaced;
        self
    }
}

/// Result of publishing an event, folded across observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_spawned: Option<usize>,
    #[serde(default)]
    pub observers_notified: usize,
}

impl EventReport {
    pub fn jobs_spawned(count: usize) -> Self {
        Self {
            jobs_spawned: Some(count),
            observers_notified: 0,
        }
    }

    pub fn merge(&mut self, other: EventReport) {
        if let Some(n) = other.jobs_spawned {
            self.jobs_spawned = Some(self.jobs_spawned.unwrap_or(0) + n);
        }
        self.observers_notified += other.observers_notified;
    }
}
