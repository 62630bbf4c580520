//! SQLite-backed wiring shared by the integration tests

#![allow(dead_code)]

use gearflow_core::application::{BatchCoordinator, JobLifecycle, RuleEngine, Scheduler};
use gearflow_core::domain::{
    AccessLevel, Container, ContainerKind, ContainerRef, FileEntry, FileRef, Gear, Job, JobOrigin,
    JobSpec, Permission,
};
use gearflow_core::port::id_provider::mocks::SequentialIdProvider;
use gearflow_core::port::time_provider::mocks::FixedTimeProvider;
use gearflow_core::port::{GearRegistry, StaticComputeProviders};
use gearflow_core::SchedulerConfig;
use gearflow_infra_sqlite::{
    create_pool, run_migrations, SqliteBatchRepository, SqliteContainerCatalog,
    SqliteGearCatalog, SqliteJobRepository, SqliteRuleRepository, SqliteTicketRepository,
};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const START: i64 = 1_700_000_000_000;
pub const ADMIN: &str = "admin@example.org";

pub struct SqliteHarness {
    pub pool: SqlitePool,
    pub jobs: Arc<SqliteJobRepository>,
    pub tickets: Arc<SqliteTicketRepository>,
    pub batches: Arc<SqliteBatchRepository>,
    pub rules: Arc<SqliteRuleRepository>,
    pub gears: Arc<SqliteGearCatalog>,
    pub containers: Arc<SqliteContainerCatalog>,
    pub clock: Arc<FixedTimeProvider>,
    pub ids: Arc<SequentialIdProvider>,
    pub lifecycle: Arc<JobLifecycle>,
}

impl SqliteHarness {
    pub async fn new() -> Self {
        Self::with_config(SchedulerConfig::default()).await
    }

    pub async fn with_config(config: SchedulerConfig) -> Self {
        let pool = seeded_pool().await;
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let tickets = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let batches = Arc::new(SqliteBatchRepository::new(pool.clone()));
        let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
        let gears = Arc::new(SqliteGearCatalog::new(pool.clone()));
        let containers = Arc::new(SqliteContainerCatalog::new(pool.clone()));
        let clock = Arc::new(FixedTimeProvider::new(START));
        let ids = Arc::new(SequentialIdProvider::new("it"));

        let lifecycle = Arc::new(JobLifecycle::new(
            jobs.clone(),
            tickets.clone(),
            batches.clone(),
            gears.clone(),
            containers.clone(),
            Arc::new(StaticComputeProviders::new(
                Vec::new(),
                Some("cp-default".to_string()),
            )),
            ids.clone(),
            clock.clone(),
            config,
        ));

        Self {
            pool,
            jobs,
            tickets,
            batches,
            rules,
            gears,
            containers,
            clock,
            ids,
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

    pub async fn enqueue(&self) -> Job {
        self.lifecycle
            .enqueue_and_insert(dicom_spec("acq-1", "a.dcm"), JobOrigin::system(), None)
            .await
            .unwrap()
    }
}

/// Migrated in-memory database holding the gears and hierarchy below
pub async fn seeded_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();

    let gears = SqliteGearCatalog::new(pool.clone());
    for gear in [dcm2niix(), afq()] {
        gears.insert_gear(&gear).await.unwrap();
    }
    let containers = SqliteContainerCatalog::new(pool.clone());
    for container in hierarchy() {
        containers.put(&container).await.unwrap();
    }
    pool
}

pub fn dcm2niix() -> Gear {
    serde_json::from_value(json!({
        "id": "gear-dcm",
        "name": "dcm2niix",
        "version": "1.0.0",
        "category": "converter",
        "rootfs_url": "https://registry.example.org/dcm2niix.tar.gz",
        "inputs": {
            "dicom": {"base": "file", "type": {"enum": ["dicom"]}}
        },
        "config": {
            "compress": {"type": "boolean", "default": true}
        }
    }))
    .unwrap()
}

pub fn afq() -> Gear {
    serde_json::from_value(json!({
        "id": "gear-afq",
        "name": "afq",
        "version": "2.0.0",
        "category": "analysis",
        "rootfs_url": "docker://registry.example.org/afq:2",
        "inputs": {
            "dwi": {"base": "file", "type": {"enum": ["nifti"]}}
        }
    }))
    .unwrap()
}

fn container(kind: ContainerKind, id: &str, parents: &[(ContainerKind, &str)]) -> Container {
    let mut c = Container::new(kind, id);
    c.parents = parents.iter().map(|(k, v)| (*k, v.to_string())).collect();
    c.permissions = vec![Permission {
        user_id: ADMIN.to_string(),
        access: AccessLevel::Admin,
    }];
    c
}

/// scitran / proj-1 / ses-1 with acq-1 (dicom), acq-2 (dicom) and acq-3 (two niftis)
pub fn hierarchy() -> Vec<Container> {
    use ContainerKind::*;
    let acq_parents = [(Group, "scitran"), (Project, "proj-1"), (Session, "ses-1")];

    let mut acq1 = container(Acquisition, "acq-1", &acq_parents);
    acq1.files = vec![FileEntry::new("a.dcm").with_type("dicom")];
    let mut acq2 = container(Acquisition, "acq-2", &acq_parents);
    acq2.files = vec![FileEntry::new("b.dcm").with_type("dicom")];
    let mut acq3 = container(Acquisition, "acq-3", &acq_parents);
    acq3.files = vec![
        FileEntry::new("t1.nii.gz").with_type("nifti"),
        FileEntry::new("t2.nii.gz").with_type("nifti"),
    ];

    vec![
        container(Group, "scitran", &[]),
        container(Project, "proj-1", &[(Group, "scitran")]),
        container(Session, "ses-1", &[(Group, "scitran"), (Project, "proj-1")]),
        acq1,
        acq2,
        acq3,
    ]
}

pub fn acquisition(id: &str) -> ContainerRef {
    ContainerRef::new(ContainerKind::Acquisition, id)
}

pub fn session() -> ContainerRef {
    ContainerRef::new(ContainerKind::Session, "ses-1")
}

pub fn dicom_spec(acquisition_id: &str, file: &str) -> JobSpec {
    JobSpec {
        gear_id: "gear-dcm".to_string(),
        inputs: BTreeMap::from([(
            "dicom".to_string(),
            FileRef::new(ContainerKind::Acquisition, acquisition_id, file),
        )]),
        destination: None,
        tags: Vec::new(),
        config: None,
        compute_provider_id: None,
        batch_id: None,
        label: None,
    }
}
