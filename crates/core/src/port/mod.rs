// Port Layer - Interfaces for external dependencies

pub mod batch_repository;
pub mod compute_provider;
pub mod container_catalog;
pub mod gear_catalog;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod rule_repository;
pub mod ticket_repository;
pub mod time_provider;

// Re-exports
pub use batch_repository::BatchRepository;
pub use compute_provider::{ComputeProviderResolver, StaticComputeProviders};
pub use container_catalog::ContainerCatalog;
pub use gear_catalog::{GearCatalog, GearRegistry};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_repository::{CasGuard, ContainerSearch, JobRepository};
pub use rule_repository::RuleRepository;
pub use ticket_repository::{JobTicket, JobTicketRepository};
pub use time_provider::{SystemTimeProvider, TimeProvider};
