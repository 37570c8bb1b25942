// Typed settings for the registry connection, local registration and watches

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Registry (Consul agent) connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agent address, `host:port` or a full URL
    pub addr: String,
    /// `http` or `https`, ignored when `addr` already carries a scheme
    pub scheme: String,
    /// ACL token sent with every request
    pub token: Option<String>,
    /// Upper bound the agent holds a blocking query open
    pub wait_time_secs: u64,
    /// Deployment environment, advertised as an `env=<value>` endpoint tag
    pub environment: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            token: None,
            wait_time_secs: 60,
            environment: None,
        }
    }
}

impl ConsulConfig {
    /// Base URL of the agent HTTP API, without a trailing slash.
    pub fn base_url(&self) -> String {
        let addr = self.addr.trim().trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("{}://{}", self.scheme, addr)
        }
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    /// Tag appended to every discovered endpoint, if an environment is set.
    pub fn env_tag(&self) -> Option<String> {
        self.environment
            .as_deref()
            .map(str::trim)
            .filter(|env| !env.is_empty())
            .map(|env| format!("env={}", env))
    }
}

impl Validate for ConsulConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.addr, "consul.addr")?;
        ConfigValidator::one_of(&self.scheme.as_str(), &["http", "https"], "consul.scheme")?;
        ConfigValidator::in_range(self.wait_time_secs, 1, 600, "consul.wait_time_secs")
    }
}

/// How the registry should health-check the local instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    /// HTTP GET against the full URL
    Http(String),
    /// TCP connect to `host:port`
    Tcp(String),
}

/// Local service registration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub service_name: String,
    pub service_addr: String,
    pub service_port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_deregister_critical_after_secs")]
    pub deregister_critical_after_secs: u64,
    /// `http://...` or `tcp://host:port`; defaults to a TCP check on the service address
    #[serde(default)]
    pub check_dsn: Option<String>,
    /// How often the registration is verified against the agent
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
}

fn default_check_interval_ms() -> u64 {
    1_000
}

fn default_check_timeout_ms() -> u64 {
    3_000
}

fn default_deregister_critical_after_secs() -> u64 {
    60
}

fn default_liveness_interval_ms() -> u64 {
    10_000
}

impl RegisterConfig {
    pub fn new(service_name: impl Into<String>, service_addr: impl Into<String>, service_port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            service_addr: service_addr.into(),
            service_port,
            tags: Vec::new(),
            check_interval_ms: default_check_interval_ms(),
            check_timeout_ms: default_check_timeout_ms(),
            deregister_critical_after_secs: default_deregister_critical_after_secs(),
            check_dsn: None,
            liveness_interval_ms: default_liveness_interval_ms(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the health check DSN
    pub fn with_check_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.check_dsn = Some(dsn.into());
        self
    }

    /// Set the registration verification interval
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Resolve the health-check target from the check DSN.
    pub fn check_target(&self) -> Result<CheckTarget> {
        let default = CheckTarget::Tcp(format!("{}:{}", self.service_addr, self.service_port));
        let Some(dsn) = self.check_dsn.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(default);
        };

        let invalid = |reason: String| ConfigError::InvalidCheckDsn {
            dsn: dsn.to_string(),
            reason,
        };
        let url = Url::parse(dsn).map_err(|e| invalid(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => Ok(CheckTarget::Http(dsn.to_string())),
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| invalid("missing host".to_string()))?;
                Ok(CheckTarget::Tcp(match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }))
            }
            other => Err(invalid(format!("unsupported scheme {}", other))),
        }
    }
}

impl Validate for RegisterConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.service_name, "register.service_name")?;
        ConfigValidator::not_empty(&self.service_addr, "register.service_addr")?;
        ConfigValidator::is_port(self.service_port, "register.service_port")?;
        ConfigValidator::in_range(self.check_interval_ms, 1, u64::MAX, "register.check_interval_ms")?;
        ConfigValidator::in_range(self.check_timeout_ms, 1, u64::MAX, "register.check_timeout_ms")?;
        ConfigValidator::in_range(self.liveness_interval_ms, 1, u64::MAX, "register.liveness_interval_ms")?;
        self.check_target().map(|_| ())
    }
}

/// One watched service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub service: String,
    /// Check statuses that count as passing
    #[serde(default = "default_status")]
    pub status: Vec<String>,
    /// Comma-delimited datacenters; empty means the agent's own
    #[serde(default)]
    pub datacenters: String,
    /// Pause after a failed blocking query
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_status() -> Vec<String> {
    vec!["passing".to_string()]
}

fn default_retry_backoff_ms() -> u64 {
    1_000
}

impl WatchConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: default_status(),
            datacenters: String::new(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }

    pub fn with_datacenters(mut self, datacenters: impl Into<String>) -> Self {
        self.datacenters = datacenters.into();
        self
    }

    pub fn with_status(mut self, status: Vec<String>) -> Self {
        self.status = status;
        self
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn datacenter_list(&self) -> Vec<String> {
        split_datacenters(&self.datacenters)
    }
}

impl Validate for WatchConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.service, "watch.service")?;
        if self.status.is_empty() {
            return Err(ConfigError::ValidationError(
                "watch.status needs at least one status".to_string(),
            ));
        }
        ConfigValidator::in_range(self.retry_backoff_ms, 1, u64::MAX, "watch.retry_backoff_ms")
    }
}

/// Split a comma-delimited datacenter list.
///
/// Entries are trimmed and blanks dropped. An empty result becomes a single
/// empty name, which the registry reads as "the agent's datacenter".
pub fn split_datacenters(datacenters: &str) -> Vec<String> {
    let list: Vec<String> = datacenters
        .split(',')
        .map(str::trim)
        .filter(|dc| !dc.is_empty())
        .map(str::to_string)
        .collect();

    if list.is_empty() {
        vec![String::new()]
    } else {
        list
    }
}

/// Complete backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub consul: ConsulConfig,
    pub register: Option<RegisterConfig>,
    pub watch: Vec<WatchConfig>,
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> Result<()> {
        self.consul.validate()?;
        if let Some(register) = &self.register {
            register.validate()?;
        }
        for watch in &self.watch {
            watch.validate()?;
        }
        Ok(())
    }
}
