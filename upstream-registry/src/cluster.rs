//! Joining passing checks against the catalog

use crate::client::RegistryClient;
use crate::error::Result;
use crate::types::{Cluster, Endpoint, HealthCheck};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Builds per-service clusters for one datacenter.
#[derive(Clone)]
pub struct ClusterBuilder {
    client: Arc<dyn RegistryClient>,
    datacenter: String,
    env_tag: Option<String>,
}

impl ClusterBuilder {
    pub fn new(client: Arc<dyn RegistryClient>, datacenter: impl Into<String>) -> Self {
        Self {
            client,
            datacenter: datacenter.into(),
            env_tag: None,
        }
    }

    /// Tag appended to every endpoint built (e.g. `env=prod`)
    pub fn with_env_tag(mut self, env_tag: Option<String>) -> Self {
        self.env_tag = env_tag;
        self
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    /// One cluster per distinct service name in `passing`, sorted by name.
    ///
    /// Fails if any catalog lookup fails; a partial topology is never
    /// returned.
    pub async fn build(&self, passing: &[HealthCheck]) -> Result<Vec<Cluster>> {
        let mut by_name: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
        for check in passing {
            by_name
                .entry(check.service_name.as_str())
                .or_default()
                .insert(check.service_id.as_str());
        }

        let mut clusters = Vec::with_capacity(by_name.len());
        for (name, ids) in &by_name {
            clusters.push(self.service_cluster(name, ids).await?);
        }
        Ok(clusters)
    }

    /// Cluster of the catalog instances of `name` whose id is in `passing`.
    ///
    /// An empty name or an empty passing set give a cluster without
    /// endpoints rather than no cluster.
    pub async fn service_cluster(&self, name: &str, passing: &HashSet<&str>) -> Result<Cluster> {
        let mut cluster = Cluster::new(name);
        if name.is_empty() || passing.is_empty() {
            return Ok(cluster);
        }

        let services = self.client.fetch_catalog(name, &self.datacenter).await?;

        for svc in services {
            if !passing.contains(svc.service_id.as_str()) {
                continue;
            }

            let datacenter = if svc.datacenter.is_empty() {
                self.datacenter.as_str()
            } else {
                svc.datacenter.as_str()
            };
            let mut tags = svc.service_tags.clone();
            tags.push(format!("dc={}", datacenter));
            tags.sort();

            let addr = if svc.service_address.is_empty() {
                svc.address.clone()
            } else {
                svc.service_address.clone()
            };

            cluster.endpoints.push(Endpoint {
                id: svc.service_id.clone(),
                addr,
                port: svc.service_port,
                tags,
            });
        }

        cluster.sort_endpoints();
        if let Some(tag) = &self.env_tag {
            cluster.add_env_tag(tag);
        }
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use crate::types::CatalogService;

    async fn registry() -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        registry
            .set_catalog(
                "dc1",
                vec![
                    CatalogService::new("dc1", "api", "api-2", "10.0.0.2", 8080).with_tags(&["v1"]),
                    CatalogService::new("dc1", "api", "api-1", "", 8080)
                        .with_node("n1", "192.168.0.1")
                        .with_tags(&["zone=a", "v1"]),
                    CatalogService::new("dc1", "api", "api-3", "10.0.0.3", 8080),
                    CatalogService::new("dc1", "db", "db-1", "10.0.1.1", 5432),
                ],
            )
            .await;
        registry
    }

    #[tokio::test]
    async fn test_build_joins_passing_with_catalog() {
        let registry = registry().await;
        let builder = ClusterBuilder::new(Arc::new(registry), "dc1");

        let passing = vec![
            HealthCheck::service("n1", "api", "api-1", "passing"),
            HealthCheck::service("n2", "api", "api-2", "passing"),
        ];
        let clusters = builder.build(&passing).await.unwrap();

        assert_eq!(clusters.len(), 1);
        let api = &clusters[0];
        assert_eq!(api.name, "api");
        assert_eq!(api.endpoints.len(), 2);

        assert_eq!(api.endpoints[0].id, "api-1");
        // node address is used when the service has none
        assert_eq!(api.endpoints[0].addr, "192.168.0.1");
        assert_eq!(api.endpoints[0].tags, vec!["dc=dc1", "v1", "zone=a"]);
        assert_eq!(api.endpoints[1].address(), "10.0.0.2:8080");
    }

    #[tokio::test]
    async fn test_build_sorts_clusters_by_name() {
        let registry = registry().await;
        let builder = ClusterBuilder::new(Arc::new(registry), "dc1");

        let passing = vec![
            HealthCheck::service("n3", "db", "db-1", "passing"),
            HealthCheck::service("n1", "api", "api-3", "passing"),
        ];
        let clusters = builder.build(&passing).await.unwrap();

        let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "db"]);
    }

    #[tokio::test]
    async fn test_env_tag_appended_after_sort() {
        let registry = registry().await;
        let builder = ClusterBuilder::new(Arc::new(registry), "dc1")
            .with_env_tag(Some("env=prod".to_string()));

        let passing = vec![HealthCheck::service("n2", "api", "api-2", "passing")];
        let clusters = builder.build(&passing).await.unwrap();

        assert_eq!(clusters[0].endpoints[0].tags, vec!["dc=dc1", "v1", "env=prod"]);
    }

    #[tokio::test]
    async fn test_empty_name_yields_empty_cluster() {
        let registry = registry().await;
        let builder = ClusterBuilder::new(Arc::new(registry), "dc1");

        let cluster = builder.service_cluster("", &HashSet::from(["api-1"])).await.unwrap();
        assert!(cluster.is_empty());

        let cluster = builder.service_cluster("api", &HashSet::new()).await.unwrap();
        assert_eq!(cluster.name, "api");
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_error_is_returned() {
        let registry = registry().await;
        registry.fail_catalog(true).await;
        let builder = ClusterBuilder::new(Arc::new(registry.clone()), "dc1");

        let passing = vec![
            HealthCheck::service("n1", "api", "api-1", "passing"),
            HealthCheck::service("n3", "db", "db-1", "passing"),
        ];
        assert!(builder.build(&passing).await.is_err());

        registry.fail_catalog(false).await;
        assert_eq!(builder.build(&passing).await.unwrap().len(), 2);
    }
}
