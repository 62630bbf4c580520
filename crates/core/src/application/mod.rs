// Application Layer - Use Cases and Business Logic

pub mod batch;
pub mod events;
pub mod gears;
pub mod lifecycle;
pub mod match_engine;
pub mod queue;
pub mod rules;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use batch::{BatchCoordinator, ProposalOutcome, ProposeBatchRequest};
pub use events::{ContainerEventBus, ContainerObserver, EventFilter};
pub use gears::GearPublisher;
pub use lifecycle::JobLifecycle;
pub use queue::Scheduler;
pub use rules::{RuleEngine, RuleTriggerObserver};
pub use sweeper::{shutdown_channel, OrphanSweeper, ShutdownSender, ShutdownToken};
