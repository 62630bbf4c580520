//! Dependency wiring (DI)
//!
//! Builds every application service on top of one SQLite pool.

use crate::settings::DaemonSettings;
use gearflow_api_rpc::Services;
use gearflow_core::application::{
    BatchCoordinator, ContainerEventBus, EventFilter, GearPublisher, JobLifecycle, RuleEngine,
    RuleTriggerObserver, Scheduler,
};
use gearflow_core::domain::{ContainerEventKind, Rule};
use gearflow_core::AppError;
use gearflow_core::port::{StaticComputeProviders, SystemTimeProvider, UuidProvider};
use gearflow_infra_sqlite::{
    SqliteBatchRepository, SqliteContainerCatalog, SqliteGearCatalog, SqliteJobRepository,
    SqliteRuleRepository, SqliteTicketRepository,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

/// Wired services plus the adapters the daemon touches directly
pub struct Wiring {
    pub services: Services,
    pub containers: Arc<SqliteContainerCatalog>,
    pub gears: Arc<SqliteGearCatalog>,
}

pub fn build_services(pool: SqlitePool, settings: &DaemonSettings) -> Wiring {
    let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
    let tickets = Arc::new(SqliteTicketRepository::new(pool.clone()));
    let batch_repo = Arc::new(SqliteBatchRepository::new(pool.clone()));
    let rule_repo = Arc::new(SqliteRuleRepository::new(pool.clone()));
    let gears = Arc::new(SqliteGearCatalog::new(pool.clone()));
    let containers = Arc::new(SqliteContainerCatalog::new(pool));

    let providers = Arc::new(StaticComputeProviders::new(
        settings.compute.providers.clone(),
        settings.compute.default_provider.clone(),
    ));
    let ids = Arc::new(UuidProvider);
    let clock = Arc::new(SystemTimeProvider);

    let lifecycle = Arc::new(JobLifecycle::new(
        jobs,
        tickets,
        batch_repo.clone(),
        gears.clone(),
        containers.clone(),
        providers,
        ids.clone(),
        clock.clone(),
        settings.scheduler.clone(),
    ));

    let rules = Arc::new(
        RuleEngine::new(rule_repo.clone(), gears.clone(), lifecycle.clone(), ids.clone())
            .with_failure_callback(Arc::new(|rule: &Rule, error: &AppError| {
                warn!(rule_id = %rule.id, project_id = %rule.project_id, error = %error, "Rule could not spawn a job");
            })),
    );

    let mut events = ContainerEventBus::new();
    events.subscribe(
        EventFilter::new(Vec::new(), vec![ContainerEventKind::FilesUpdated]),
        Arc::new(RuleTriggerObserver::new(rules.clone(), containers.clone())),
    );
    info!(observers = events.len(), "Container event bus ready");

    let services = Services {
        scheduler: Arc::new(Scheduler::new(lifecycle.clone())),
        batches: Arc::new(BatchCoordinator::new(
            lifecycle.clone(),
            batch_repo,
            gears.clone(),
            containers.clone(),
            ids.clone(),
            clock.clone(),
        )),
        rules,
        gears: Arc::new(GearPublisher::new(gears.clone(), rule_repo, ids, clock)),
        events: Arc::new(events),
        lifecycle,
    };

    Wiring {
        services,
        containers,
        gears,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gearflow_core::domain::{AskQuery, JobFilter};
    use gearflow_infra_sqlite::{create_pool, run_migrations};

    async fn wired() -> Wiring {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let mut settings = DaemonSettings::default();
        settings.compute.default_provider = Some("cp-default".to_string());
        build_services(pool, &settings)
    }

    #[tokio::test]
    async fn test_rule_observer_is_subscribed() {
        let wiring = wired().await;
        assert_eq!(wiring.services.events.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_over_sqlite() {
        let wiring = wired().await;
        let counts = wiring
            .services
            .scheduler
            .job_states(&JobFilter::default())
            .await
            .unwrap();
        assert_eq!(counts.values().sum::<u64>(), 0);

        let mut query = AskQuery::default();
        query.want.jobs = 1;
        let result = wiring.services.scheduler.ask(&query).await.unwrap();
        assert_eq!(result.jobs.map(|jobs| jobs.len()), Some(0));
    }
}
