//! Local service registration and its supervisor

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::types::{AgentService, AgentServiceCheck, ServiceRegistration};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span, debug, info, info_span, warn};
use upstream_config::{CheckTarget, RegisterConfig};

/// Build the descriptor registered for `config` with `tags`.
///
/// The id is `<name>-<addr>:<port>`, so restarts of the same instance map
/// to the same registry entry.
pub fn service_registration(config: &RegisterConfig, tags: Vec<String>) -> Result<ServiceRegistration> {
    let mut check = AgentServiceCheck {
        interval: format!("{}ms", config.check_interval_ms),
        timeout: format!("{}ms", config.check_timeout_ms),
        deregister_critical_service_after: format!("{}s", config.deregister_critical_after_secs),
        tcp: None,
        http: None,
    };
    match config.check_target()? {
        CheckTarget::Http(url) => check.http = Some(url),
        CheckTarget::Tcp(addr) => check.tcp = Some(addr),
    }

    Ok(ServiceRegistration {
        id: format!(
            "{}-{}:{}",
            config.service_name, config.service_addr, config.service_port
        ),
        name: config.service_name.clone(),
        address: config.service_addr.clone(),
        port: config.service_port,
        tags,
        check: Some(check),
    })
}

/// Handle to a running registration.
///
/// Dropping the handle deregisters the instance as well, without waiting.
pub struct Registration {
    name: String,
    service_id: watch::Receiver<Option<String>>,
    tags: mpsc::Sender<Vec<String>>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the registry entry currently held, if any.
    pub fn service_id(&self) -> Option<String> {
        self.service_id.borrow().clone()
    }

    /// Replace the advertised tags and register again right away.
    pub async fn override_tags(&self, tags: Vec<String>) -> Result<()> {
        self.tags
            .send(tags)
            .await
            .map_err(|_| RegistryError::SupervisorStopped(self.name.clone()))
    }

    /// Deregister and wait for the supervisor to finish.
    ///
    /// Returns immediately if the supervisor is already gone.
    pub async fn deregister(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop.send(ack_tx).await.is_err() {
            return;
        }
        // A supervisor that exits without acking drops the sender.
        let _ = ack_rx.await;
    }
}

struct RegistrationState {
    service_id: Option<String>,
    needs_register: bool,
    published: watch::Sender<Option<String>>,
}

impl RegistrationState {
    fn hold(&mut self, service_id: String) {
        self.service_id = Some(service_id.clone());
        self.needs_register = false;
        self.published.send_replace(Some(service_id));
    }

    fn release(&mut self) {
        self.service_id = None;
        self.published.send_replace(None);
    }
}

const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(1);

/// Keeps one instance registered until told to deregister.
pub struct RegistrationSupervisor {
    client: Arc<dyn RegistryClient>,
    registration: ServiceRegistration,
    liveness_interval: Duration,
    span: Span,
}

impl RegistrationSupervisor {
    /// `liveness_interval` is raised to at least 1ms.
    pub fn new(
        client: Arc<dyn RegistryClient>,
        registration: ServiceRegistration,
        liveness_interval: Duration,
    ) -> Self {
        Self {
            client,
            registration,
            liveness_interval: liveness_interval.max(MIN_LIVENESS_INTERVAL),
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Spawn the supervisor and return once the first registration attempt
    /// has completed, successful or not.
    pub async fn start(self) -> Registration {
        let (tags_tx, tags_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (id_tx, id_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let name = self.registration.name.clone();
        let span = info_span!(parent: &self.span, "register", service = %name);
        let state = RegistrationState {
            service_id: None,
            needs_register: false,
            published: id_tx,
        };
        tokio::spawn(self.run(state, tags_rx, stop_rx, ready_tx).instrument(span));

        let _ = ready_rx.await;
        Registration {
            name,
            service_id: id_rx,
            tags: tags_tx,
            stop: stop_tx,
        }
    }

    async fn run(
        mut self,
        mut state: RegistrationState,
        mut tags_rx: mpsc::Receiver<Vec<String>>,
        mut stop_rx: mpsc::Receiver<oneshot::Sender<()>>,
        ready: oneshot::Sender<()>,
    ) {
        self.establish(&mut state).await;
        let _ = ready.send(());

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.liveness_interval,
            self.liveness_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                request = stop_rx.recv() => {
                    self.deregister(&mut state).await;
                    if let Some(ack) = request {
                        let _ = ack.send(());
                    }
                    break;
                }
                Some(tags) = tags_rx.recv() => {
                    info!(id = %self.registration.id, tags = ?tags, "overriding service tags");
                    self.registration.tags = tags;
                    self.register(&mut state).await;
                }
                _ = ticker.tick() => self.verify(&mut state).await,
            }
        }
    }

    /// Adopt a matching agent entry or register a new one.
    ///
    /// An adopted entry keeps its id for every later register and
    /// deregister call, so the agent never ends up with two entries.
    async fn establish(&mut self, state: &mut RegistrationState) {
        match self.client.list_instances().await {
            Ok(instances) => {
                if let Some(id) = find_existing(&self.registration, &instances) {
                    info!(id = %id, "adopting existing service registration");
                    self.registration.id = id.clone();
                    state.hold(id);
                    return;
                }
            }
            Err(e) => warn!(error = %e, "error listing agent services"),
        }
        self.register(state).await;
    }

    async fn register(&self, state: &mut RegistrationState) {
        match self.client.register(&self.registration).await {
            Ok(()) => {
                info!(
                    id = %self.registration.id,
                    address = %self.registration.address,
                    port = self.registration.port,
                    tags = ?self.registration.tags,
                    "registered service"
                );
                state.hold(self.registration.id.clone());
            }
            Err(e) => {
                warn!(id = %self.registration.id, error = %e, "error registering service, will retry");
                state.needs_register = true;
            }
        }
    }

    async fn verify(&mut self, state: &mut RegistrationState) {
        let Some(id) = state.service_id.clone() else {
            self.establish(state).await;
            return;
        };
        if state.needs_register {
            self.register(state).await;
            return;
        }

        match self.client.list_instances().await {
            Ok(instances) if instances.iter().any(|i| i.id == id) => {
                debug!(id = %id, "service registration present");
            }
            Ok(_) => {
                warn!(id = %id, "service registration lost, registering again");
                self.register(state).await;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "cannot verify service registration");
            }
        }
    }

    async fn deregister(&self, state: &mut RegistrationState) {
        let Some(id) = state.service_id.clone() else {
            info!("no registration held, nothing to deregister");
            return;
        };
        match self.client.deregister(&id).await {
            Ok(()) => info!(id = %id, "deregistered service"),
            Err(e) => warn!(id = %id, error = %e, "error deregistering service"),
        }
        state.release();
    }
}

/// Id of an agent entry describing `registration`, preferring its own id.
fn find_existing(registration: &ServiceRegistration, instances: &[AgentService]) -> Option<String> {
    let mut matching = instances.iter().filter(|i| registration.matches(i));
    let first = matching.next()?;
    if first.id == registration.id {
        return Some(first.id.clone());
    }
    let exact = matching.find(|i| i.id == registration.id);
    Some(exact.unwrap_or(first).id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use tokio::time::{sleep, timeout};

    const INTERVAL: Duration = Duration::from_millis(50);

    fn config() -> RegisterConfig {
        RegisterConfig::new("api", "10.0.0.1", 8080).with_tag("v1")
    }

    async fn start(registry: &InMemoryRegistry) -> Registration {
        let registration = service_registration(&config(), vec!["v1".to_string()]).unwrap();
        RegistrationSupervisor::new(Arc::new(registry.clone()), registration, INTERVAL)
            .start()
            .await
    }

    async fn wait_for_registers(registry: &InMemoryRegistry, count: usize) {
        timeout(Duration::from_secs(2), async {
            while registry.register_calls().await < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("register calls not reached");
    }

    async fn wait_for_deregisters(registry: &InMemoryRegistry, count: usize) {
        timeout(Duration::from_secs(2), async {
            while registry.deregister_calls().await < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("deregister calls not reached");
    }

    #[test]
    fn test_service_registration_descriptor() {
        let registration = service_registration(&config(), config().tags).unwrap();

        assert_eq!(registration.id, "api-10.0.0.1:8080");
        assert_eq!(registration.tags, vec!["v1"]);
        let check = registration.check.unwrap();
        assert_eq!(check.interval, "1000ms");
        assert_eq!(check.timeout, "3000ms");
        assert_eq!(check.deregister_critical_service_after, "60s");
        assert_eq!(check.tcp.as_deref(), Some("10.0.0.1:8080"));
        assert!(check.http.is_none());
    }

    #[test]
    fn test_service_registration_http_check() {
        let cfg = config().with_check_dsn("http://10.0.0.1:8081/health");
        let check = service_registration(&cfg, vec![]).unwrap().check.unwrap();
        assert_eq!(check.http.as_deref(), Some("http://10.0.0.1:8081/health"));
        assert!(check.tcp.is_none());

        let cfg = config().with_check_dsn("ftp://10.0.0.1");
        assert!(matches!(
            service_registration(&cfg, vec![]),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn test_find_existing_prefers_own_id() {
        let registration = service_registration(&config(), vec!["v1".to_string()]).unwrap();
        let mut other = registration.to_agent_service();
        other.id = "api-legacy".to_string();
        let own = registration.to_agent_service();

        let found = find_existing(&registration, &[other.clone(), own]);
        assert_eq!(found.as_deref(), Some("api-10.0.0.1:8080"));
        assert_eq!(find_existing(&registration, &[other]).as_deref(), Some("api-legacy"));
        assert_eq!(find_existing(&registration, &[]), None);
    }

    #[tokio::test]
    async fn test_adopts_existing_registration() {
        let registry = InMemoryRegistry::new();
        registry
            .add_instance(AgentService {
                id: "api-legacy".to_string(),
                service: "api".to_string(),
                tags: vec!["v1".to_string()],
                address: "10.0.0.1".to_string(),
                port: 8080,
            })
            .await;

        let registration = start(&registry).await;
        assert_eq!(registration.service_id().as_deref(), Some("api-legacy"));
        assert_eq!(registry.register_calls().await, 0);
    }

    #[tokio::test]
    async fn test_adopted_registration_is_reused_and_removed() {
        let registry = InMemoryRegistry::new();
        registry
            .add_instance(AgentService {
                id: "api-legacy".to_string(),
                service: "api".to_string(),
                tags: vec!["v1".to_string()],
                address: "10.0.0.1".to_string(),
                port: 8080,
            })
            .await;

        let registration = start(&registry).await;
        registration.override_tags(vec!["v2".to_string()]).await.unwrap();
        wait_for_registers(&registry, 1).await;

        let instances = registry.instances().await;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "api-legacy");
        assert_eq!(instances[0].tags, vec!["v2"]);
        assert_eq!(registration.service_id().as_deref(), Some("api-legacy"));

        timeout(Duration::from_secs(2), registration.deregister())
            .await
            .expect("deregister hung");
        assert!(registry.instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_liveness_interval_is_clamped() {
        let registry = InMemoryRegistry::new();
        let registration = service_registration(&config(), vec!["v1".to_string()]).unwrap();
        let supervisor =
            RegistrationSupervisor::new(Arc::new(registry.clone()), registration, Duration::ZERO);
        assert_eq!(supervisor.liveness_interval, Duration::from_millis(1));

        let registration = supervisor.start().await;
        assert_eq!(registration.service_id().as_deref(), Some("api-10.0.0.1:8080"));
        timeout(Duration::from_secs(2), registration.deregister())
            .await
            .expect("deregister hung");
    }

    #[tokio::test]
    async fn test_registers_when_no_match() {
        let registry = InMemoryRegistry::new();
        registry
            .add_instance(AgentService {
                id: "api-other".to_string(),
                service: "api".to_string(),
                tags: vec!["v0".to_string()],
                address: "10.0.0.1".to_string(),
                port: 8080,
            })
            .await;

        let registration = start(&registry).await;
        assert_eq!(registry.register_calls().await, 1);
        assert_eq!(registration.service_id().as_deref(), Some("api-10.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_tag_override_registers_once() {
        let registry = InMemoryRegistry::new();
        let registration = start(&registry).await;
        assert_eq!(registry.register_calls().await, 1);

        registration.override_tags(vec!["v2".to_string()]).await.unwrap();
        wait_for_registers(&registry, 2).await;

        let registrations = registry.registrations().await;
        assert_eq!(registrations[1].tags, vec!["v2"]);
        sleep(INTERVAL * 3).await;
        assert_eq!(registry.register_calls().await, 2);
    }

    #[tokio::test]
    async fn test_lost_registration_is_restored() {
        let registry = InMemoryRegistry::new();
        let _registration = start(&registry).await;

        assert!(registry.remove_instance("api-10.0.0.1:8080").await);
        wait_for_registers(&registry, 2).await;
        assert_eq!(registry.instances().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_registration_is_retried() {
        let registry = InMemoryRegistry::new();
        registry.fail_writes(true).await;

        let registration = start(&registry).await;
        assert_eq!(registration.service_id(), None);

        registry.fail_writes(false).await;
        wait_for_registers(&registry, 1).await;
        assert_eq!(registration.service_id().as_deref(), Some("api-10.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_listing_error_does_not_reregister() {
        let registry = InMemoryRegistry::new();
        let _registration = start(&registry).await;

        registry.set_unavailable(true).await;
        sleep(INTERVAL * 3).await;
        registry.set_unavailable(false).await;
        sleep(INTERVAL * 2).await;

        assert_eq!(registry.register_calls().await, 1);
    }

    #[tokio::test]
    async fn test_deregister_handshake() {
        let registry = InMemoryRegistry::new();
        let registration = start(&registry).await;

        timeout(Duration::from_secs(2), registration.deregister())
            .await
            .expect("deregister hung");
        assert_eq!(registry.deregister_calls().await, 1);
        assert!(registry.instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_completes_when_call_fails() {
        let registry = InMemoryRegistry::new();
        let registration = start(&registry).await;
        registry.fail_writes(true).await;

        timeout(Duration::from_secs(2), registration.deregister())
            .await
            .expect("deregister hung");
        assert_eq!(registry.deregister_calls().await, 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_deregisters() {
        let registry = InMemoryRegistry::new();
        let registration = start(&registry).await;

        drop(registration);
        wait_for_deregisters(&registry, 1).await;
        assert!(registry.instances().await.is_empty());
    }
}
