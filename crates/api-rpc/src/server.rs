//! JSON-RPC Server
//!
//! HTTP transport bound to localhost; every method takes named parameters.

use crate::handler::{RpcHandler, Services};
use crate::types::{
    method, AddRuleRequest, AskRequest, BatchIdRequest, CompleteRequest, EnqueueRequest,
    JobIdRequest, MutateRequest, ProjectRequest, ProposeJobsRequest, ProposeRequest,
    PublishGearRequest, RetryRequest, SearchRequest,
};
use gearflow_core::domain::ContainerEvent;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

/// Parse named params into `P` and hand them to `call`
fn register<P, R, F, Fut>(
    module: &mut RpcModule<()>,
    name: &'static str,
    handler: &Arc<RpcHandler>,
    call: F,
) -> Result<(), String>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Clone + Send + 'static,
    F: Fn(Arc<RpcHandler>, P) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ErrorObjectOwned>> + Send + 'static,
{
    let handler = handler.clone();
    module
        .register_async_method(name, move |params, _, _| {
            let handler = handler.clone();
            let call = call.clone();
            async move {
                let req: P = params.parse()?;
                call(handler, req).await
            }
        })
        .map_err(|e| e.to_string())?;
    Ok(())
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, services: Services) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(services)),
        }
    }

    fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());
        let m = &mut module;
        let h = &self.handler;

        register(m, method::JOBS_ENQUEUE, h, |h, req: EnqueueRequest| async move {
            h.enqueue(req).await
        })?;
        register(m, method::JOBS_GET, h, |h, req: JobIdRequest| async move {
            h.get_job(req).await
        })?;
        register(m, method::JOBS_MUTATE, h, |h, req: MutateRequest| async move {
            h.mutate(req).await
        })?;
        register(m, method::JOBS_HEARTBEAT, h, |h, req: JobIdRequest| async move {
            h.heartbeat(req).await
        })?;
        register(m, method::JOBS_RETRY, h, |h, req: RetryRequest| async move {
            h.retry(req).await
        })?;
        register(m, method::JOBS_PREPARE_COMPLETE, h, |h, req: JobIdRequest| async move {
            h.prepare_complete(req).await
        })?;
        register(m, method::JOBS_COMPLETE, h, |h, req: CompleteRequest| async move {
            h.complete(req).await
        })?;
        register(m, method::JOBS_SEARCH, h, |h, req: SearchRequest| async move {
            h.search(req).await
        })?;

        register(m, method::QUEUE_ASK, h, |h, req: AskRequest| async move {
            h.ask(req).await
        })?;

        register(m, method::BATCH_PROPOSE, h, |h, req: ProposeRequest| async move {
            h.propose_batch(req).await
        })?;
        register(m, method::BATCH_PROPOSE_JOBS, h, |h, req: ProposeJobsRequest| async move {
            h.propose_batch_jobs(req).await
        })?;
        register(m, method::BATCH_RUN, h, |h, req: BatchIdRequest| async move {
            h.run_batch(req).await
        })?;
        register(m, method::BATCH_CANCEL, h, |h, req: BatchIdRequest| async move {
            h.cancel_batch(req).await
        })?;
        register(m, method::BATCH_GET, h, |h, req: BatchIdRequest| async move {
            h.get_batch(req).await
        })?;

        register(m, method::EVENTS_PUBLISH, h, |h, event: ContainerEvent| async move {
            h.publish_event(event).await
        })?;

        register(m, method::RULES_ADD, h, |h, req: AddRuleRequest| async move {
            h.add_rule(req).await
        })?;
        register(m, method::RULES_LIST, h, |h, req: ProjectRequest| async move {
            h.list_rules(req).await
        })?;
        register(m, method::RULES_COPY_SITE, h, |h, req: ProjectRequest| async move {
            h.copy_site_rules(req).await
        })?;
        register(m, method::GEARS_PUBLISH, h, |h, req: PublishGearRequest| async move {
            h.publish_gear(req).await
        })?;

        Ok(module)
    }

    /// Start the JSON-RPC server, returning the bound address and its handle
    ///
    /// Binds to the configured host only; the default is loopback.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let module = self.module()?;

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        info!(addr = %local_addr, methods = module.method_names().count(), "JSON-RPC server started");
        Ok((local_addr, server.start(module)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use gearflow_core::application::{
        BatchCoordinator, ContainerEventBus, GearPublisher, JobLifecycle, RuleEngine, Scheduler,
    };
    use gearflow_core::port::batch_repository::mocks::InMemoryBatchRepository;
    use gearflow_core::port::container_catalog::mocks::InMemoryContainerCatalog;
    use gearflow_core::port::gear_catalog::mocks::InMemoryGearCatalog;
    use gearflow_core::port::job_repository::mocks::InMemoryJobRepository;
    use gearflow_core::port::rule_repository::mocks::InMemoryRuleRepository;
    use gearflow_core::port::ticket_repository::mocks::InMemoryTicketRepository;
    use gearflow_core::port::{StaticComputeProviders, SystemTimeProvider, UuidProvider};
    use gearflow_core::SchedulerConfig;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::core::ClientError;
    use jsonrpsee::http_client::HttpClientBuilder;
    use serde_json::{json, Value};

    fn in_memory_services() -> Services {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let batch_repo = Arc::new(InMemoryBatchRepository::new());
        let gear_catalog = Arc::new(InMemoryGearCatalog::new());
        let containers = Arc::new(InMemoryContainerCatalog::new());
        let rule_repo = Arc::new(InMemoryRuleRepository::new());
        let ids = Arc::new(UuidProvider);
        let clock = Arc::new(SystemTimeProvider);

        let lifecycle = Arc::new(JobLifecycle::new(
            jobs,
            Arc::new(InMemoryTicketRepository::new()),
            batch_repo.clone(),
            gear_catalog.clone(),
            containers.clone(),
            Arc::new(StaticComputeProviders::new(Vec::new(), Some("cp-default".into()))),
            ids.clone(),
            clock.clone(),
            SchedulerConfig::default(),
        ));
        Services {
            scheduler: Arc::new(Scheduler::new(lifecycle.clone())),
            batches: Arc::new(BatchCoordinator::new(
                lifecycle.clone(),
                batch_repo,
                gear_catalog.clone(),
                containers,
                ids.clone(),
                clock.clone(),
            )),
            rules: Arc::new(RuleEngine::new(
                rule_repo.clone(),
                gear_catalog.clone(),
                lifecycle.clone(),
                ids.clone(),
            )),
            gears: Arc::new(GearPublisher::new(gear_catalog, rule_repo, ids, clock)),
            events: Arc::new(ContainerEventBus::new()),
            lifecycle,
        }
    }

    async fn start_test_server() -> (String, ServerHandle) {
        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let (addr, handle) = RpcServer::new(config, in_memory_services())
            .start()
            .await
            .unwrap();
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_ask_reports_all_states() {
        let (url, handle) = start_test_server().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let mut params = ObjectParams::new();
        params.insert("return", json!({"states": true})).unwrap();
        let result: Value = client.request(method::QUEUE_ASK, params).await.unwrap();
        assert_eq!(result["states"]["pending"], 0);
        assert_eq!(result["states"].as_object().unwrap().len(), 5);

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_errors_carry_stable_codes() {
        let (url, handle) = start_test_server().await;
        let client = HttpClientBuilder::default().build(&url).unwrap();

        let mut params = ObjectParams::new();
        params.insert("job_id", "missing").unwrap();
        let err = client
            .request::<Value, _>(method::JOBS_GET, params)
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::NOT_FOUND),
            other => panic!("unexpected error: {other}"),
        }

        // Asking for nothing is a validation error
        let mut params = ObjectParams::new();
        params.insert("return", json!({"jobs": 0})).unwrap();
        let err = client
            .request::<Value, _>(method::QUEUE_ASK, params)
            .await
            .unwrap_err();
        match err {
            ClientError::Call(obj) => assert_eq!(obj.code(), code::VALIDATION_ERROR),
            other => panic!("unexpected error: {other}"),
        }

        handle.stop().unwrap();
    }
}
