//! Consul HTTP API client

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::types::{AgentService, CatalogService, HealthCheck, ServiceRegistration};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use upstream_config::{ConfigError, ConsulConfig};
use url::Url;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul agent client
pub struct ConsulClient {
    base_url: Url,
    client: reqwest::Client,
    token: Option<String>,
    wait_time: Duration,
}

#[derive(Deserialize)]
struct ServiceEntry {
    #[serde(rename = "Checks", default)]
    checks: Vec<HealthCheck>,
}

#[derive(Deserialize)]
struct KvPair {
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl ConsulClient {
    /// Create new Consul client
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use upstream_registry::ConsulClient;
    ///
    /// let consul = ConsulClient::new(&ConsulConfig::default())?;
    /// ```
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url())?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::ValidationError(format!(
                "consul.addr {} is not a base URL",
                config.addr
            ))
            .into());
        }

        let wait_time = config.wait_time();
        // The agent adds up to wait/16 of jitter to blocking queries.
        let client = reqwest::Client::builder()
            .timeout(wait_time + wait_time / 16 + Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url,
            client,
            token: config.token.clone().filter(|t| !t.is_empty()),
            wait_time,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn expect_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Registry index of a response, from the `X-Consul-Index` header.
fn response_index(response: &Response) -> Result<u64> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| RegistryError::Inconsistent(format!("missing or invalid {} header", INDEX_HEADER)))
}

fn dc_query(datacenter: &str) -> Vec<(&'static str, String)> {
    let mut query = vec![("consistent", String::new())];
    if !datacenter.is_empty() {
        query.push(("dc", datacenter.to_string()));
    }
    query
}

#[async_trait]
impl RegistryClient for ConsulClient {
    async fn fetch_health(
        &self,
        service: &str,
        datacenter: &str,
        min_index: u64,
    ) -> Result<(Vec<HealthCheck>, u64)> {
        let url = self.endpoint(&["v1", "health", "service", service]);
        let mut query = dc_query(datacenter);
        if min_index > 0 {
            query.push(("index", min_index.to_string()));
            query.push(("wait", format!("{}s", self.wait_time.as_secs())));
        }

        let response = self.request(Method::GET, url).query(&query).send().await?;
        let response = Self::expect_success(response).await?;
        let index = response_index(&response)?;
        let entries: Vec<ServiceEntry> = response.json().await?;

        let checks: Vec<HealthCheck> = entries.into_iter().flat_map(|e| e.checks).collect();
        debug!(service, datacenter, index, checks = checks.len(), "fetched health");
        Ok((checks, index))
    }

    async fn fetch_catalog(&self, service: &str, datacenter: &str) -> Result<Vec<CatalogService>> {
        let url = self.endpoint(&["v1", "catalog", "service", service]);
        let response = self
            .request(Method::GET, url)
            .query(&dc_query(datacenter))
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        Ok(response.json().await?)
    }

    async fn list_instances(&self) -> Result<Vec<AgentService>> {
        let url = self.endpoint(&["v1", "agent", "services"]);
        let response = self.request(Method::GET, url).send().await?;
        let response = Self::expect_success(response).await?;

        let services: HashMap<String, AgentService> = response.json().await?;
        Ok(services.into_values().collect())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "register"]);
        let response = self
            .request(Method::PUT, url)
            .json(registration)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(RegistryError::RegistrationFailed(error))
        }
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id]);
        let response = self.request(Method::PUT, url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(RegistryError::DeregistrationFailed(error))
        }
    }

    async fn read_kv(&self, key: &str, wait_index: u64) -> Result<(String, u64)> {
        let segments: Vec<&str> = key.trim_start_matches('/').split('/').collect();
        let mut path = vec!["v1", "kv"];
        path.extend(segments);

        let mut query = vec![("consistent", String::new())];
        if wait_index > 0 {
            query.push(("index", wait_index.to_string()));
        }

        let response = self
            .request(Method::GET, self.endpoint(&path))
            .query(&query)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let index = response_index(&response).unwrap_or(0);
            return Ok((String::new(), index));
        }

        let response = Self::expect_success(response).await?;
        let index = response_index(&response)?;
        let pairs: Vec<KvPair> = response.json().await?;

        let value = match pairs.into_iter().next().and_then(|p| p.value) {
            Some(encoded) => String::from_utf8_lossy(&STANDARD.decode(encoded)?)
                .trim()
                .to_string(),
            None => String::new(),
        };
        Ok((value, index))
    }

    async fn write_kv(&self, key: &str, value: &str, cas_index: u64) -> Result<bool> {
        let segments: Vec<&str> = key.trim_start_matches('/').split('/').collect();
        let mut path = vec!["v1", "kv"];
        path.extend(segments);

        let response = self
            .request(Method::PUT, self.endpoint(&path))
            .query(&[("cas", cas_index.to_string())])
            .body(value.to_string())
            .send()
            .await?;
        let response = Self::expect_success(response).await?;

        let body = response.text().await?;
        Ok(body.trim() == "true")
    }

    async fn datacenter(&self) -> Result<String> {
        let url = self.endpoint(&["v1", "agent", "self"]);
        let response = self.request(Method::GET, url).send().await?;
        let response = Self::expect_success(response).await?;

        let agent: serde_json::Value = response.json().await?;
        let config = agent
            .get("Config")
            .ok_or_else(|| RegistryError::Inconsistent("self.Config not found".to_string()))?;
        config
            .get("Datacenter")
            .and_then(|dc| dc.as_str())
            .map(str::to_string)
            .ok_or_else(|| RegistryError::Inconsistent("self.Datacenter not found".to_string()))
    }
}
