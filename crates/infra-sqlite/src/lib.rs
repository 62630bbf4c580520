// Gearflow Infrastructure - SQLite Adapter
// Implements: JobRepository, JobTicketRepository, BatchRepository, RuleRepository,
// GearCatalog/GearRegistry, ContainerCatalog

mod batch_repository;
mod connection;
mod container_catalog;
mod error;
mod filter;
mod gear_catalog;
mod job_repository;
mod migration;
mod rule_repository;
mod ticket_repository;

#[cfg(test)]
mod test_fixtures;

pub use batch_repository::SqliteBatchRepository;
pub use connection::create_pool;
pub use container_catalog::SqliteContainerCatalog;
pub use gear_catalog::SqliteGearCatalog;
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;
pub use rule_repository::SqliteRuleRepository;
pub use ticket_repository::SqliteTicketRepository;

// Note: sqlx::Error conversion goes through error::map_sqlx_error because the
// orphan rule forbids `From<sqlx::Error> for AppError` here
