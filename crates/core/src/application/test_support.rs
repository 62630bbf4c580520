//! Shared wiring for application-level tests

use crate::application::{BatchCoordinator, JobLifecycle, RuleEngine, Scheduler};
use crate::config::SchedulerConfig;
use crate::domain::{
    AccessLevel, Container, ContainerKind, ContainerRef, FileEntry, FileRef, Gear, JobOrigin,
    JobSpec, Permission,
};
use crate::port::batch_repository::mocks::InMemoryBatchRepository;
use crate::port::container_catalog::mocks::InMemoryContainerCatalog;
use crate::port::gear_catalog::mocks::InMemoryGearCatalog;
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_repository::mocks::InMemoryJobRepository;
use crate::port::rule_repository::mocks::InMemoryRuleRepository;
use crate::port::ticket_repository::mocks::InMemoryTicketRepository;
use crate::port::time_provider::mocks::FixedTimeProvider;
use crate::port::StaticComputeProviders;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const START: i64 = 1_700_000_000_000;
pub const ADMIN: &str = "alice@example.org";
pub const READER: &str = "bob@example.org";

pub struct Harness {
    pub jobs: Arc<InMemoryJobRepository>,
    pub tickets: Arc<InMemoryTicketRepository>,
    pub batches: Arc<InMemoryBatchRepository>,
    pub gears: Arc<InMemoryGearCatalog>,
    pub containers: Arc<InMemoryContainerCatalog>,
    pub rules: Arc<InMemoryRuleRepository>,
    pub ids: Arc<SequentialIdProvider>,
    pub clock: Arc<FixedTimeProvider>,
    pub lifecycle: Arc<JobLifecycle>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let tickets = Arc::new(InMemoryTicketRepository::new());
        let batches = Arc::new(InMemoryBatchRepository::new());
        let gears = Arc::new(InMemoryGearCatalog::with_gears(vec![
            dicom_gear(),
            analysis_gear(),
            api_key_gear(),
        ]));
        let containers = Arc::new(InMemoryContainerCatalog::new());
        let rules = Arc::new(InMemoryRuleRepository::new());
        let ids = Arc::new(SequentialIdProvider::new("id"));
        let clock = Arc::new(FixedTimeProvider::new(START));

        for container in hierarchy() {
            containers.put(container);
        }

        let lifecycle = Arc::new(JobLifecycle::new(
            jobs.clone(),
            tickets.clone(),
            batches.clone(),
            gears.clone(),
            containers.clone(),
            Arc::new(StaticComputeProviders::new(
                vec!["cp-gpu".to_string()],
                Some("cp-default".to_string()),
            )),
            ids.clone(),
            clock.clone(),
            config,
        ));

        Self {
            jobs,
            tickets,
            batches,
            gears,
            containers,
            rules,
            ids,
            clock,
            lifecycle,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.lifecycle.clone())
    }

    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::new(
            self.lifecycle.clone(),
            self.batches.clone(),
            self.gears.clone(),
            self.containers.clone(),
            self.ids.clone(),
            self.clock.clone(),
        )
    }

    pub fn rule_engine(&self) -> RuleEngine {
        RuleEngine::new(
            self.rules.clone(),
            self.gears.clone(),
            self.lifecycle.clone(),
            self.ids.clone(),
        )
    }
}

pub fn gear_from(value: serde_json::Value) -> Gear {
    serde_json::from_value(value).unwrap()
}

pub fn dicom_gear() -> Gear {
    gear_from(json!({
        "id": "gear-dcm",
        "name": "dcm2niix",
        "version": "1.0.0",
        "category": "converter",
        "rootfs_url": "https://registry.example.org/dcm2niix.tar.gz",
        "inputs": {
            "dicom": {"base": "file", "type": {"enum": ["dicom"]}}
        },
        "config": {
            "compress": {"type": "boolean", "default": true},
            "levels": {"type": "integer", "optional": true, "minimum": 1, "maximum": 9}
        }
    }))
}

pub fn analysis_gear() -> Gear {
    gear_from(json!({
        "id": "gear-afq",
        "name": "afq",
        "version": "2.0.0",
        "category": "analysis",
        "rootfs_url": "docker://registry.example.org/afq:2",
        "inputs": {
            "dwi": {"base": "file", "type": {"enum": ["nifti"]}},
            "subject_id": {"base": "context", "optional": true}
        }
    }))
}

pub fn api_key_gear() -> Gear {
    gear_from(json!({
        "id": "gear-sync",
        "name": "sync",
        "version": "0.1.0",
        "category": "utility",
        "rootfs_url": "https://registry.example.org/sync.tar.gz",
        "inputs": {
            "key": {"base": "api-key"}
        }
    }))
}

fn permissions() -> Vec<Permission> {
    vec![
        Permission {
            user_id: ADMIN.to_string(),
            access: AccessLevel::Admin,
        },
        Permission {
            user_id: READER.to_string(),
            access: AccessLevel::ReadOnly,
        },
    ]
}

fn container(kind: ContainerKind, id: &str, parents: &[(ContainerKind, &str)]) -> Container {
    let mut c = Container::new(kind, id);
    c.parents = parents
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect::<BTreeMap<_, _>>();
    c.permissions = permissions();
    c
}

/// group scitran / project proj-1 / session ses-1 / acquisitions acq-1..acq-3
///
/// acq-1 and acq-2 hold one dicom each, acq-3 only a nifti.
pub fn hierarchy() -> Vec<Container> {
    use ContainerKind::*;
    let group = container(Group, "scitran", &[]);
    let mut project = container(Project, "proj-1", &[(Group, "scitran")]);
    project.info = json!({"context": {"subject_id": {"value": "sub-01"}}});
    let session = container(Session, "ses-1", &[(Group, "scitran"), (Project, "proj-1")]);

    let acq_parents = [(Group, "scitran"), (Project, "proj-1"), (Session, "ses-1")];
    let mut acq1 = container(Acquisition, "acq-1", &acq_parents);
    acq1.files = vec![FileEntry {
        size: 1024,
        ..FileEntry::new("a.dcm").with_type("dicom")
    }];
    let mut acq2 = container(Acquisition, "acq-2", &acq_parents);
    acq2.files = vec![FileEntry::new("b.dcm").with_type("dicom")];
    let mut acq3 = container(Acquisition, "acq-3", &acq_parents);
    acq3.files = vec![FileEntry::new("t1.nii.gz").with_type("nifti")];

    vec![group, project, session, acq1, acq2, acq3]
}

pub fn acquisition(id: &str) -> ContainerRef {
    ContainerRef::new(ContainerKind::Acquisition, id)
}

/// dcm2niix on acq-1/a.dcm, destination inferred
pub fn dicom_spec() -> JobSpec {
    JobSpec {
        gear_id: "gear-dcm".to_string(),
        inputs: BTreeMap::from([(
            "dicom".to_string(),
            FileRef::new(ContainerKind::Acquisition, "acq-1", "a.dcm"),
        )]),
        destination: None,
        tags: Vec::new(),
        config: None,
        compute_provider_id: None,
        batch_id: None,
        label: None,
    }
}

pub fn system() -> JobOrigin {
    JobOrigin::system()
}
