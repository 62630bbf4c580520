// Container Catalog Port (external hierarchy + permission model)

use crate::domain::{AccessLevel, Container, ContainerId, ContainerKind, ContainerRef, JobId};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ContainerCatalog: Send + Sync {
    async fn get_container(&self, reference: &ContainerRef) -> Result<Option<Container>>;

    /// Ancestors of `reference`, root (group) first, excluding the container itself
    async fn get_parent_chain(&self, reference: &ContainerRef) -> Result<Vec<Container>>;

    /// Containers of `kind` at or below `root`
    async fn find_descendants(&self, root: &ContainerRef, kind: ContainerKind)
        -> Result<Vec<Container>>;

    /// Register an analysis container produced by a batch run
    async fn create_analysis(&self, analysis: &Container) -> Result<()>;

    /// Point an analysis at the job that fills it
    async fn set_analysis_job(&self, analysis_id: &ContainerId, job_id: &JobId) -> Result<()>;

    async fn check_access(
        &self,
        reference: &ContainerRef,
        uid: &str,
        level: AccessLevel,
    ) -> Result<bool> {
        Ok(self
            .get_container(reference)
            .await?
            .is_some_and(|c| c.has_access(uid, level)))
    }
}

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryContainerCatalog {
        containers: Mutex<BTreeMap<ContainerRef, Container>>,
        analysis_jobs: Mutex<BTreeMap<ContainerId, JobId>>,
    }

    impl InMemoryContainerCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, container: Container) {
            self.containers
                .lock()
                .unwrap()
                .insert(container.reference(), container);
        }

        pub fn analysis_job(&self, analysis_id: &str) -> Option<JobId> {
            self.analysis_jobs.lock().unwrap().get(analysis_id).cloned()
        }

        pub fn containers_of(&self, kind: ContainerKind) -> Vec<Container> {
            let containers = self.containers.lock().unwrap();
            containers.values().filter(|c| c.kind == kind).cloned().collect()
        }
    }

    #[async_trait]
    impl ContainerCatalog for InMemoryContainerCatalog {
        async fn get_container(&self, reference: &ContainerRef) -> Result<Option<Container>> {
            Ok(self.containers.lock().unwrap().get(reference).cloned())
        }

        async fn get_parent_chain(&self, reference: &ContainerRef) -> Result<Vec<Container>> {
            let containers = self.containers.lock().unwrap();
            let Some(container) = containers.get(reference) else {
                return Ok(Vec::new());
            };
            Ok(container
                .parents
                .iter()
                .filter(|(kind, _)| **kind != container.kind)
                .filter_map(|(kind, id)| containers.get(&ContainerRef::new(*kind, id.clone())))
                .cloned()
                .collect())
        }

        async fn find_descendants(
            &self,
            root: &ContainerRef,
            kind: ContainerKind,
        ) -> Result<Vec<Container>> {
            let containers = self.containers.lock().unwrap();
            Ok(containers
                .values()
                .filter(|c| c.kind == kind)
                .filter(|c| {
                    c.reference() == *root || c.parents.get(&root.kind) == Some(&root.id)
                })
                .cloned()
                .collect())
        }

        async fn create_analysis(&self, analysis: &Container) -> Result<()> {
            self.put(analysis.clone());
            Ok(())
        }

        async fn set_analysis_job(&self, analysis_id: &ContainerId, job_id: &JobId) -> Result<()> {
            self.analysis_jobs
                .lock()
                .unwrap()
                .insert(analysis_id.clone(), job_id.clone());
            Ok(())
        }
    }
}
