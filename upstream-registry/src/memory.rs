//! In-memory registry (for testing)

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::types::{AgentService, CatalogService, HealthCheck, ServiceRegistration};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

#[derive(Default)]
struct State {
    health: HashMap<String, Vec<HealthCheck>>,
    catalog: HashMap<String, Vec<CatalogService>>,
    agent: BTreeMap<String, AgentService>,
    kv: HashMap<String, (String, u64)>,
    registrations: Vec<ServiceRegistration>,
    deregister_calls: usize,
    health_queries: usize,
    unavailable: bool,
    fail_writes: bool,
    fail_catalog: bool,
}

/// In-memory registry with blocking-query semantics (for testing/development)
///
/// Every mutation advances a single registry index, like a Consul raft
/// index. Health queries with a `min_index` block until the index moves
/// past it or the wait time elapses.
#[derive(Clone)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<State>>,
    index: Arc<watch::Sender<u64>>,
    datacenter: String,
    wait_time: Duration,
}

impl InMemoryRegistry {
    /// Create new in-memory registry whose local datacenter is `dc1`
    pub fn new() -> Self {
        let (index, _) = watch::channel(1);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            index: Arc::new(index),
            datacenter: "dc1".to_string(),
            wait_time: Duration::from_secs(5),
        }
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = datacenter.into();
        self
    }

    /// Upper bound a blocking query waits without a change
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Current registry index
    pub fn index(&self) -> u64 {
        *self.index.borrow()
    }

    fn bump(&self) -> u64 {
        self.index.send_modify(|index| *index += 1);
        self.index()
    }

    fn resolve_dc<'a>(&'a self, datacenter: &'a str) -> &'a str {
        if datacenter.is_empty() {
            &self.datacenter
        } else {
            datacenter
        }
    }

    /// Replace every health check of a datacenter
    pub async fn set_health(&self, datacenter: &str, checks: Vec<HealthCheck>) {
        let mut state = self.state.write().await;
        state.health.insert(datacenter.to_string(), checks);
        self.bump();
    }

    /// Replace the catalog of a datacenter
    pub async fn set_catalog(&self, datacenter: &str, services: Vec<CatalogService>) {
        let mut state = self.state.write().await;
        state.catalog.insert(datacenter.to_string(), services);
        self.bump();
    }

    /// Advance the index without changing any data
    pub async fn touch(&self) {
        let _state = self.state.write().await;
        self.bump();
    }

    /// Make every read fail as if the agent were unreachable
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Make register/deregister calls fail
    pub async fn fail_writes(&self, fail: bool) {
        self.state.write().await.fail_writes = fail;
    }

    /// Make catalog queries fail while health queries keep working
    pub async fn fail_catalog(&self, fail: bool) {
        self.state.write().await.fail_catalog = fail;
    }

    /// Add an instance to the agent listing without counting a register call
    pub async fn add_instance(&self, instance: AgentService) {
        let mut state = self.state.write().await;
        state.agent.insert(instance.id.clone(), instance);
        self.bump();
    }

    /// Drop an instance from the agent listing, as the agent's reaper would
    pub async fn remove_instance(&self, service_id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.agent.remove(service_id).is_some();
        self.bump();
        removed
    }

    pub async fn instances(&self) -> Vec<AgentService> {
        self.state.read().await.agent.values().cloned().collect()
    }

    /// Every successful register call, in order
    pub async fn registrations(&self) -> Vec<ServiceRegistration> {
        self.state.read().await.registrations.clone()
    }

    pub async fn register_calls(&self) -> usize {
        self.state.read().await.registrations.len()
    }

    pub async fn deregister_calls(&self) -> usize {
        self.state.read().await.deregister_calls
    }

    /// Health queries started so far, blocking or not
    pub async fn health_queries(&self) -> usize {
        self.state.read().await.health_queries
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn fetch_health(
        &self,
        service: &str,
        datacenter: &str,
        min_index: u64,
    ) -> Result<(Vec<HealthCheck>, u64)> {
        {
            let mut state = self.state.write().await;
            state.health_queries += 1;
            if state.unavailable {
                return Err(RegistryError::Unavailable("health query".to_string()));
            }
        }

        if min_index > 0 {
            let mut rx = self.index.subscribe();
            let deadline = tokio::time::sleep(self.wait_time);
            tokio::pin!(deadline);
            while *rx.borrow_and_update() <= min_index {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut deadline => break,
                }
            }
        }

        let state = self.state.read().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("health query".to_string()));
        }
        let index = self.index();

        let all = state
            .health
            .get(self.resolve_dc(datacenter))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let nodes: HashSet<&str> = all
            .iter()
            .filter(|c| c.service_name == service)
            .map(|c| c.node.as_str())
            .collect();
        let checks = all
            .iter()
            .filter(|c| {
                c.service_name == service
                    || (c.service_id.is_empty() && nodes.contains(c.node.as_str()))
            })
            .cloned()
            .collect();

        Ok((checks, index))
    }

    async fn fetch_catalog(&self, service: &str, datacenter: &str) -> Result<Vec<CatalogService>> {
        let state = self.state.read().await;
        if state.unavailable || state.fail_catalog {
            return Err(RegistryError::Unavailable("catalog query".to_string()));
        }

        Ok(state
            .catalog
            .get(self.resolve_dc(datacenter))
            .map(|services| {
                services
                    .iter()
                    .filter(|s| s.service_name == service)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_instances(&self) -> Result<Vec<AgentService>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("agent services".to_string()));
        }
        Ok(state.agent.values().cloned().collect())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let mut state = self.state.write().await;
        if state.unavailable || state.fail_writes {
            return Err(RegistryError::RegistrationFailed(registration.id.clone()));
        }
        state.registrations.push(registration.clone());
        state
            .agent
            .insert(registration.id.clone(), registration.to_agent_service());
        self.bump();
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.deregister_calls += 1;
        if state.unavailable || state.fail_writes {
            return Err(RegistryError::DeregistrationFailed(service_id.to_string()));
        }
        state
            .agent
            .remove(service_id)
            .ok_or_else(|| RegistryError::DeregistrationFailed(format!("unknown service {}", service_id)))?;
        self.bump();
        Ok(())
    }

    async fn read_kv(&self, key: &str, _wait_index: u64) -> Result<(String, u64)> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("kv read".to_string()));
        }
        match state.kv.get(key.trim_start_matches('/')) {
            Some((value, modify_index)) => Ok((value.trim().to_string(), *modify_index)),
            None => Ok((String::new(), self.index())),
        }
    }

    async fn write_kv(&self, key: &str, value: &str, cas_index: u64) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("kv write".to_string()));
        }
        let key = key.trim_start_matches('/').to_string();
        let current = state.kv.get(&key).map(|(_, modify_index)| *modify_index);
        let accepted = match current {
            None => cas_index == 0,
            Some(modify_index) => cas_index == modify_index,
        };
        if accepted {
            let modify_index = self.bump();
            state.kv.insert(key, (value.to_string(), modify_index));
        }
        Ok(accepted)
    }

    async fn datacenter(&self) -> Result<String> {
        if self.state.read().await.unavailable {
            return Err(RegistryError::Unavailable("agent self".to_string()));
        }
        Ok(self.datacenter.clone())
    }
}
