use async_trait::async_trait;

use crate::provider::{IntegrationConfig, Provider};

/// Read-only lookup of declarative provider descriptors and per-tenant
/// integration bindings. The core never mutates either; both are owned by an
/// external collaborator (a config file loader, a database-backed admin
/// surface, or tests).
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn get_provider(&self, name: &str) -> Option<Provider>;

    async fn get_integration(
        &self,
        environment_id: &str,
        provider_config_key: &str,
    ) -> Option<IntegrationConfig>;

    async fn is_available(&self, name: &str) -> bool {
        self.get_provider(name).await.is_some()
    }
}
