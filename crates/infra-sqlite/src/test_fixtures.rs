// Shared fixtures for adapter tests

use crate::{create_pool, run_migrations};
use gearflow_core::domain::{
    ContainerKind, ContainerRef, FileRef, Gear, GearCategory, GearInfo, Job, JobConfig, JobInput,
    JobOrigin, JobProfile, JobState,
};
use serde_json::Map;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

pub async fn setup_test_db() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Pending dcm2niix job reading and writing acquisition `acq-1`
pub fn pending_job(id: &str, modified: i64) -> Job {
    let destination = ContainerRef::new(ContainerKind::Acquisition, "acq-1");
    let parents = BTreeMap::from([
        (ContainerKind::Group, "scitran".to_string()),
        (ContainerKind::Acquisition, "acq-1".to_string()),
    ]);

    Job {
        id: id.to_string(),
        gear_id: "gear-1".to_string(),
        gear_info: GearInfo {
            name: "dcm2niix".to_string(),
            version: "1.0.0".to_string(),
            category: GearCategory::Converter,
            capabilities: Vec::new(),
        },
        state: JobState::Pending,
        attempt: 1,
        previous_job_id: None,
        inputs: BTreeMap::from([(
            "dicom".to_string(),
            JobInput::File(FileRef::new(ContainerKind::Acquisition, "acq-1", "a.dcm")),
        )]),
        destination: destination.clone(),
        config: JobConfig {
            config: Map::new(),
            inputs: BTreeMap::new(),
            destination,
        },
        tags: vec!["dcm2niix".to_string()],
        origin: JobOrigin::system(),
        compute_provider_id: "cp-default".to_string(),
        batch_id: None,
        label: None,
        parents,
        related_container_ids: vec!["acq-1".to_string(), "scitran".to_string()],
        created: modified,
        modified,
        transitions: BTreeMap::new(),
        retried: None,
        request: None,
        failure_reason: None,
        profile: JobProfile::default(),
    }
}

pub fn gear(id: &str, name: &str, version: &str, created: i64) -> Gear {
    Gear {
        id: id.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        category: GearCategory::Converter,
        inputs: BTreeMap::new(),
        config: BTreeMap::new(),
        capabilities: Vec::new(),
        invalid: false,
        rootfs_url: format!("docker://flywheel/{}:{}", name, version),
        command: None,
        environment: BTreeMap::new(),
        uid: None,
        gid: None,
        created,
    }
}
