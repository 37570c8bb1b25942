//! Consul-backed upstream discovery
//!
//! This crate watches the health of services in one or more datacenters
//! and turns it into clusters of healthy endpoints, and keeps the local
//! service registered while it runs.
//!
//! ## Features
//!
//! - **Health filtering** - Drops instances on dead or maintenance nodes
//! - **Long-poll watches** - One blocking-query loop per datacenter
//! - **Multi-datacenter merge** - One cluster across every datacenter
//! - **Registration** - Adopt, register, verify and deregister the local instance
//! - **Manual overrides** - Check-and-set key/value helpers
//!
//! ## Quick Start
//!
//! ### Watching a service
//!
//! ```rust,ignore
//! use upstream_registry::Backend;
//! use upstream_config::ConsulConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Backend::new(&ConsulConfig::default()).await?;
//!
//!     let mut clusters = backend.watch_services("api", vec!["passing".into()], "dc1,dc2");
//!     while let Some(update) = clusters.recv().await {
//!         for endpoint in &update[0].endpoints {
//!             println!("{} {:?}", endpoint.address(), endpoint.tags);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Registering the local service
//!
//! ```rust,ignore
//! use upstream_config::RegisterConfig;
//!
//! let registration = backend
//!     .register(&RegisterConfig::new("api", "10.0.0.5", 8080).with_tag("v1"))
//!     .await?;
//!
//! registration.override_tags(vec!["v2".into()]).await?;
//! backend.deregister(registration).await;
//! ```
//!
//! ### Testing without an agent
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use upstream_registry::{Backend, InMemoryRegistry};
//!
//! let registry = InMemoryRegistry::new();
//! let backend = Backend::with_client(Arc::new(registry.clone()), None);
//! ```

pub mod aggregate;
pub mod backend;
pub mod change;
pub mod client;
pub mod cluster;
pub mod consul;
pub mod error;
pub mod kv;
pub mod memory;
pub mod passing;
pub mod register;
pub mod types;
pub mod watch;

pub use aggregate::DatacenterAggregator;
pub use backend::Backend;
pub use change::{checks_equal, clusters_changed};
pub use client::RegistryClient;
pub use cluster::ClusterBuilder;
pub use consul::ConsulClient;
pub use error::{RegistryError, Result};
pub use kv::{read_manual, write_manual};
pub use memory::InMemoryRegistry;
pub use passing::passing_services;
pub use register::{Registration, RegistrationSupervisor, service_registration};
pub use types::{
    AgentService, AgentServiceCheck, CatalogService, Cluster, Endpoint, HealthCheck,
    ServiceRegistration,
};
pub use watch::DatacenterWatcher;
