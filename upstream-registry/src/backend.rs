//! Registry backend: watches, registration and manual overrides

use crate::aggregate::DatacenterAggregator;
use crate::client::RegistryClient;
use crate::consul::ConsulClient;
use crate::error::Result;
use crate::kv;
use crate::register::{Registration, RegistrationSupervisor, service_registration};
use crate::types::Cluster;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Span, info, info_span, warn};
use upstream_config::{ConsulConfig, RegisterConfig, Validate, WatchConfig, split_datacenters};

/// Entry point for discovering upstreams and registering the local service.
///
/// # Examples
///
/// ```rust,ignore
/// use upstream_registry::Backend;
/// use upstream_config::ConsulConfig;
///
/// let backend = Backend::new(&ConsulConfig::default()).await?;
/// let mut clusters = backend.watch_services("api", vec!["passing".into()], "dc1,dc2");
/// while let Some(update) = clusters.recv().await {
///     println!("{:?}", update);
/// }
/// ```
#[derive(Clone)]
pub struct Backend {
    client: Arc<dyn RegistryClient>,
    env_tag: Option<String>,
    datacenter: Option<String>,
    span: Span,
}

impl Backend {
    /// Connect to the Consul agent described by `config`.
    ///
    /// Fails only if the configuration is unusable; an unreachable agent is
    /// logged and the backend keeps retrying in its loops.
    pub async fn new(config: &ConsulConfig) -> Result<Self> {
        config.validate()?;
        let client = ConsulClient::new(config)?;
        let mut backend = Self::with_client(Arc::new(client), config.env_tag())
            .with_span(info_span!("consul", addr = %config.base_url()));

        match backend.client.datacenter().await {
            Ok(datacenter) => {
                info!(addr = %config.base_url(), datacenter = %datacenter, "connected to consul agent");
                backend.datacenter = Some(datacenter);
            }
            Err(e) => warn!(addr = %config.base_url(), error = %e, "consul agent not reachable yet"),
        }
        Ok(backend)
    }

    /// Backend over any registry client.
    pub fn with_client(client: Arc<dyn RegistryClient>, env_tag: Option<String>) -> Self {
        Self {
            client,
            env_tag,
            datacenter: None,
            span: Span::current(),
        }
    }

    /// Parent span of every task this backend starts
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Datacenter reported by the agent when the backend connected.
    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }

    pub fn client(&self) -> Arc<dyn RegistryClient> {
        self.client.clone()
    }

    /// Watch `name` across the comma-delimited `datacenters`.
    ///
    /// The receiver yields one cluster named `name` holding every passing
    /// endpoint of every datacenter. Dropping it stops the watch.
    pub fn watch_services(&self, name: &str, status: Vec<String>, datacenters: &str) -> mpsc::Receiver<Vec<Cluster>> {
        DatacenterAggregator::new(self.client.clone(), name, status)
            .with_datacenter_list(split_datacenters(datacenters))
            .with_env_tag(self.env_tag.clone())
            .with_span(self.span.clone())
            .spawn()
    }

    /// Watch the service `config` describes, once it validates.
    pub fn watch(&self, config: &WatchConfig) -> Result<mpsc::Receiver<Vec<Cluster>>> {
        config.validate()?;
        Ok(DatacenterAggregator::from_config(self.client.clone(), config)
            .with_env_tag(self.env_tag.clone())
            .with_span(self.span.clone())
            .spawn())
    }

    /// Register the local service and keep it registered.
    ///
    /// Returns after the first registration attempt; failures are retried
    /// in the background.
    pub async fn register(&self, config: &RegisterConfig) -> Result<Registration> {
        config.validate()?;
        let registration = service_registration(config, config.tags.clone())?;
        let supervisor = RegistrationSupervisor::new(
            self.client.clone(),
            registration,
            config.liveness_interval(),
        )
        .with_span(self.span.clone());
        Ok(supervisor.start().await)
    }

    /// Deregister and wait until the registry has been told.
    pub async fn deregister(&self, registration: Registration) {
        registration.deregister().await;
    }

    pub async fn read_manual(&self, key: &str) -> Result<(String, u64)> {
        kv::read_manual(self.client.as_ref(), key).await
    }

    pub async fn write_manual(&self, key: &str, value: &str, version: u64) -> Result<bool> {
        kv::write_manual(self.client.as_ref(), key, value, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::memory::InMemoryRegistry;
    use crate::types::{CatalogService, HealthCheck};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_new_with_unreachable_agent_still_builds() {
        let config = ConsulConfig {
            addr: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let backend = Backend::new(&config).await.unwrap();
        assert_eq!(backend.datacenter(), None);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = ConsulConfig {
            scheme: "gopher".to_string(),
            ..Default::default()
        };
        assert!(Backend::new(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_watch_services_applies_env_tag() {
        let registry = InMemoryRegistry::new().with_wait_time(Duration::from_millis(100));
        registry
            .set_catalog("dc1", vec![CatalogService::new("dc1", "api", "a1", "10.0.0.1", 80)])
            .await;
        registry
            .set_health("dc1", vec![HealthCheck::service("n1", "api", "a1", "passing")])
            .await;

        let backend = Backend::with_client(Arc::new(registry), Some("env=prod".to_string()));
        let mut rx = backend.watch_services("api", vec!["passing".to_string()], "dc1");

        let clusters = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(clusters[0].endpoints[0].tags, vec!["dc=dc1", "env=prod"]);
    }

    #[tokio::test]
    async fn test_watch_validates_config() {
        let registry = InMemoryRegistry::new().with_wait_time(Duration::from_millis(100));
        let backend = Backend::with_client(Arc::new(registry), None);

        let mut config = WatchConfig::new("api");
        config.retry_backoff_ms = 0;
        assert!(matches!(backend.watch(&config), Err(RegistryError::Config(_))));
        assert!(backend.watch(&WatchConfig::new("")).is_err());

        let mut rx = backend.watch(&WatchConfig::new("api")).unwrap();
        let clusters = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(clusters, vec![Cluster::new("api")]);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_check_dsn() {
        let backend = Backend::with_client(Arc::new(InMemoryRegistry::new()), None);
        let config = RegisterConfig::new("api", "10.0.0.1", 80).with_check_dsn("udp://10.0.0.1:53");
        assert!(backend.register(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = InMemoryRegistry::new();
        let backend = Backend::with_client(Arc::new(registry.clone()), None);

        let registration = backend
            .register(&RegisterConfig::new("api", "10.0.0.1", 80))
            .await
            .unwrap();
        assert_eq!(registry.instances().await.len(), 1);

        backend.deregister(registration).await;
        assert!(registry.instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_values() {
        let backend = Backend::with_client(Arc::new(InMemoryRegistry::new()), None);

        assert!(backend.write_manual("manual/api", "off", 0).await.unwrap());
        let (value, version) = backend.read_manual("manual/api").await.unwrap();
        assert_eq!(value, "off");
        assert!(backend.write_manual("manual/api", "on", version).await.unwrap());
    }
}
