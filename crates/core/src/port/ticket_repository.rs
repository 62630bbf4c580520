// Completion Ticket Port
//
// A ticket marks a running job as "completing": the agent has finished and is
// uploading results. Orphan scans leave ticketed jobs alone.

use crate::domain::JobId;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: String,
    pub job_id: JobId,
    pub created: i64,
}

#[async_trait]
pub trait JobTicketRepository: Send + Sync {
    async fn create(&self, ticket: &JobTicket) -> Result<()>;

    async fn find(&self, ticket_id: &str) -> Result<Option<JobTicket>>;

    async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<JobTicket>>;

    /// Returns false when the ticket did not exist
    async fn remove(&self, ticket_id: &str) -> Result<bool>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryTicketRepository {
        tickets: Mutex<Vec<JobTicket>>,
    }

    impl InMemoryTicketRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl JobTicketRepository for InMemoryTicketRepository {
        async fn create(&self, ticket: &JobTicket) -> Result<()> {
            self.tickets.lock().unwrap().push(ticket.clone());
            Ok(())
        }

        async fn find(&self, ticket_id: &str) -> Result<Option<JobTicket>> {
            let tickets = self.tickets.lock().unwrap();
            Ok(tickets.iter().find(|t| t.id == ticket_id).cloned())
        }

        async fn find_by_job(&self, job_id: &JobId) -> Result<Vec<JobTicket>> {
            let tickets = self.tickets.lock().unwrap();
            Ok(tickets.iter().filter(|t| &t.job_id == job_id).cloned().collect())
        }

        async fn remove(&self, ticket_id: &str) -> Result<bool> {
            let mut tickets = self.tickets.lock().unwrap();
            let before = tickets.len();
            tickets.retain(|t| t.id != ticket_id);
            Ok(tickets.len() != before)
        }
    }
}
