// Upstream - service discovery backed by Consul
//
// Watches service health across datacenters, turns it into clusters of
// healthy endpoints, and keeps the local service registered.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::info;

// Re-export member crates
pub use upstream_config;
pub use upstream_registry;

#[cfg(feature = "log")]
pub use upstream_log;

pub use upstream_config::{ConfigBuilder, ConsulConfig, RegisterConfig, UpstreamConfig, WatchConfig};
pub use upstream_registry::{
    Backend, Cluster, Endpoint, InMemoryRegistry, Registration, RegistryClient, RegistryError,
    Result,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Backend, Cluster, ConfigBuilder, ConsulConfig, Endpoint, RegisterConfig, Registration,
        RegistryClient, Upstream, UpstreamConfig, WatchConfig,
    };
}

/// A running backend: the registration (if configured) and one cluster
/// stream per configured watch.
pub struct Upstream {
    backend: Backend,
    registration: Option<Registration>,
    watches: HashMap<String, mpsc::Receiver<Vec<Cluster>>>,
}

impl Upstream {
    /// Connect to Consul and start everything `config` asks for.
    pub async fn start(config: &UpstreamConfig) -> Result<Self> {
        let backend = Backend::new(&config.consul).await?;
        Self::start_with(backend, config).await
    }

    /// Start the registration and watches of `config` on an existing backend.
    pub async fn start_with(backend: Backend, config: &UpstreamConfig) -> Result<Self> {
        let registration = match &config.register {
            Some(register) => Some(backend.register(register).await?),
            None => None,
        };

        let mut watches = HashMap::with_capacity(config.watch.len());
        for watch in &config.watch {
            watches.insert(watch.service.clone(), backend.watch(watch)?);
        }

        info!(
            registered = registration.is_some(),
            watches = watches.len(),
            "upstream backend started"
        );
        Ok(Self {
            backend,
            registration,
            watches,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    /// Take the cluster stream of a watched service.
    pub fn take_watch(&mut self, service: &str) -> Option<mpsc::Receiver<Vec<Cluster>>> {
        self.watches.remove(service)
    }

    /// Stop every watch and deregister the local service.
    pub async fn shutdown(mut self) {
        self.watches.clear();
        if let Some(registration) = self.registration.take() {
            self.backend.deregister(registration).await;
        }
        info!("upstream backend stopped");
    }
}
