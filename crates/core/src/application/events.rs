// Container Event Bus
//
// Fans container change notifications out to subscribed observers. The bus
// knows nothing about rules or jobs; observers decide what an event means.

use crate::domain::{ContainerEvent, ContainerEventKind, ContainerKind, EventReport};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait ContainerObserver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn on_event(&self, event: &ContainerEvent) -> Result<EventReport>;
}

/// Which events an observer wants; empty lists mean "all"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub container_kinds: Vec<ContainerKind>,
    pub event_kinds: Vec<ContainerEventKind>,
}

impl EventFilter {
    pub fn new(container_kinds: Vec<ContainerKind>, event_kinds: Vec<ContainerEventKind>) -> Self {
        Self {
            container_kinds,
            event_kinds,
        }
    }

    pub fn accepts(&self, event: &ContainerEvent) -> bool {
        (self.container_kinds.is_empty() || self.container_kinds.contains(&event.container.kind))
            && (self.event_kinds.is_empty() || self.event_kinds.contains(&event.kind))
    }
}

struct Subscription {
    filter: EventFilter,
    observer: Arc<dyn ContainerObserver>,
}

/// Observer registry; built once at startup, then shared
#[derive(Default)]
pub struct ContainerEventBus {
    subscriptions: Vec<Subscription>,
}

impl ContainerEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: EventFilter, observer: Arc<dyn ContainerObserver>) {
        debug!(observer = observer.name(), ?filter, "Observer subscribed");
        self.subscriptions.push(Subscription { filter, observer });
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Deliver `event` to every matching observer.
    ///
    /// An observer error is logged and does not stop delivery to the others,
    /// nor does it fail the container change that raised the event.
    pub async fn publish(&self, event: &ContainerEvent) -> EventReport {
        let mut report = EventReport::default();
        for subscription in self.subscriptions.iter().filter(|s| s.filter.accepts(event)) {
            let observer = &subscription.observer;
            match observer.on_event(event).await {
                Ok(observed) => report.merge(observed),
                Err(e) => error!(
                    observer = observer.name(),
                    container = %event.container,
                    event = %event.kind,
                    error = %e,
                    "Observer failed"
                ),
            }
            report.observers_notified += 1;
        }
        debug!(
            container = %event.container,
            event = %event.kind,
            notified = report.observers_notified,
            "Container event published"
        );
        report
    }
}
