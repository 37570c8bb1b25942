//! Registry records and the topology model built from them

use serde::{Deserialize, Deserializer, Serialize};

/// Check ID of the agent liveness (gossip) check.
pub const SERF_HEALTH_CHECK: &str = "serfHealth";

/// Check ID present while a node is in maintenance mode.
pub const NODE_MAINTENANCE_CHECK: &str = "_node_maintenance";

/// Prefix of the per-instance maintenance check ID.
pub const SERVICE_MAINTENANCE_PREFIX: &str = "_service_maintenance:";

pub const STATUS_PASSING: &str = "passing";
pub const STATUS_WARNING: &str = "warning";
pub const STATUS_CRITICAL: &str = "critical";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One health check result as reported by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub node: String,
    #[serde(rename = "CheckID", default)]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_tags: Vec<String>,
    /// Check output, diagnostic only
    #[serde(default)]
    pub output: String,
}

impl HealthCheck {
    /// Check record for a service instance.
    pub fn service(
        node: impl Into<String>,
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        let service_id = service_id.into();
        Self {
            node: node.into(),
            check_id: format!("service:{}", service_id),
            name: "Service check".to_string(),
            status: status.into(),
            service_id,
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Node-level check record (liveness, maintenance).
    pub fn node(node: impl Into<String>, check_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            check_id: check_id.into(),
            name: "Node check".to_string(),
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.service_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// One registered instance as listed by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogService {
    #[serde(default)]
    pub node: String,
    /// Node address
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub service_address: String,
    #[serde(default)]
    pub service_port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_tags: Vec<String>,
}

impl CatalogService {
    pub fn new(
        datacenter: impl Into<String>,
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            datacenter: datacenter.into(),
            service_name: service_name.into(),
            service_id: service_id.into(),
            service_address: address.into(),
            service_port: port,
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: impl Into<String>, node_address: impl Into<String>) -> Self {
        self.node = node.into();
        self.address = node_address.into();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.service_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// One instance registered with the local agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    pub service: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
}

/// Health check definition attached to a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: String,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
}

/// Descriptor sent to the agent to register an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentServiceCheck>,
}

impl ServiceRegistration {
    /// Whether a listed agent instance describes this registration.
    ///
    /// Tags compare as sets.
    pub fn matches(&self, instance: &AgentService) -> bool {
        instance.address == self.address
            && instance.port == self.port
            && instance.service == self.name
            && tags_equal(&instance.tags, &self.tags)
    }

    pub fn to_agent_service(&self) -> AgentService {
        AgentService {
            id: self.id.clone(),
            service: self.name.clone(),
            tags: self.tags.clone(),
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// Order-independent tag comparison.
pub fn tags_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// A healthy service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub addr: String,
    pub port: u16,
    /// `dc=<datacenter>` plus instance tags, sorted
    pub tags: Vec<String>,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, addr: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            port,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// `addr:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Datacenter this endpoint was discovered in, from its `dc=` tag.
    pub fn datacenter(&self) -> Option<&str> {
        self.tags.iter().find_map(|t| t.strip_prefix("dc="))
    }
}

/// The healthy endpoints of one logical service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Append `tag` to every endpoint that does not carry it yet.
    pub fn add_env_tag(&mut self, tag: &str) {
        for endpoint in &mut self.endpoints {
            if !endpoint.tags.iter().any(|t| t == tag) {
                endpoint.tags.push(tag.to_string());
            }
        }
    }

    pub fn sort_endpoints(&mut self) {
        self.endpoints.sort_by(|a, b| a.id.cmp(&b.id));
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
