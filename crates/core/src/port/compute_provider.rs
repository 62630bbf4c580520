// Compute Provider Port

use crate::domain::{Container, Gear, JobOrigin};
use crate::error::Result;
use async_trait::async_trait;

/// Resolves which compute provider runs a job
#[async_trait]
pub trait ComputeProviderResolver: Send + Sync {
    /// Whether an explicitly requested provider exists
    async fn exists(&self, provider_id: &str) -> Result<bool>;

    /// Provider to use when the caller did not choose one
    async fn infer(
        &self,
        gear: &Gear,
        destination: &Container,
        origin: &JobOrigin,
    ) -> Result<Option<String>>;
}

/// Fixed provider list with an optional site default (production)
#[derive(Debug, Clone, Default)]
pub struct StaticComputeProviders {
    providers: Vec<String>,
    default: Option<String>,
}

impl StaticComputeProviders {
    pub fn new(providers: Vec<String>, default: Option<String>) -> Self {
        let mut providers = providers;
        if let Some(d) = &default {
            if !providers.contains(d) {
                providers.push(d.clone());
            }
        }
        Self { providers, default }
    }
}

#[async_trait]
impl ComputeProviderResolver for StaticComputeProviders {
    async fn exists(&self, provider_id: &str) -> Result<bool> {
        Ok(self.providers.iter().any(|p| p == provider_id))
    }

    async fn infer(
        &self,
        _gear: &Gear,
        _destination: &Container,
        _origin: &JobOrigin,
    ) -> Result<Option<String>> {
        Ok(self.default.clone())
    }
}
