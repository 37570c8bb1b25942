//! Registry client abstraction

use crate::error::Result;
use crate::types::{AgentService, CatalogService, HealthCheck, ServiceRegistration};
use async_trait::async_trait;

/// Operations the watch and registration engines need from a registry.
///
/// Implementations are shared as `Arc<dyn RegistryClient>` by every
/// watcher and supervisor task, so they must be safe to call concurrently.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Blocking query for every check of `service` in `datacenter`.
    ///
    /// Returns once the registry index moves past `min_index` (or
    /// immediately when `min_index` is 0) or after the server wait time.
    /// The second value is the registry index of the returned snapshot.
    async fn fetch_health(
        &self,
        service: &str,
        datacenter: &str,
        min_index: u64,
    ) -> Result<(Vec<HealthCheck>, u64)>;

    /// Every catalog instance of `service` in `datacenter`.
    async fn fetch_catalog(&self, service: &str, datacenter: &str) -> Result<Vec<CatalogService>>;

    /// Instances registered with the local agent.
    async fn list_instances(&self) -> Result<Vec<AgentService>>;

    /// Register (or re-register) an instance with the local agent.
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Remove an instance from the local agent.
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// Consistent key read. A missing key yields an empty value.
    async fn read_kv(&self, key: &str, wait_index: u64) -> Result<(String, u64)>;

    /// Check-and-set write; `cas_index` 0 only succeeds if the key is absent.
    async fn write_kv(&self, key: &str, value: &str, cas_index: u64) -> Result<bool>;

    /// Datacenter of the agent this client talks to.
    async fn datacenter(&self) -> Result<String>;
}
