// Environment variable loading

use crate::{ConfigError, Result, UpstreamConfig};
use std::env;

/// Default prefix for every variable the backend reads.
pub const DEFAULT_PREFIX: &str = "UPSTREAM";

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Full variable name for `key` under this loader's prefix
    pub fn var_name(&self, key: &str) -> String {
        if let Some(ref prefix) = self.prefix {
            format!("{}_{}", prefix, key.to_uppercase())
        } else {
            key.to_uppercase()
        }
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.var_name(key)).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Load an optional variable, treating empty values as unset
    pub fn load_opt(&self, key: &str) -> Option<String> {
        self.load_var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Override registry connection settings from the environment.
    ///
    /// Recognised keys (with the default prefix): `UPSTREAM_CONSUL_ADDR`,
    /// `UPSTREAM_CONSUL_SCHEME`, `UPSTREAM_CONSUL_TOKEN`,
    /// `UPSTREAM_CONSUL_WAIT_SECS` and `UPSTREAM_ENV`.
    pub fn apply(&self, config: &mut UpstreamConfig) -> Result<()> {
        if let Some(addr) = self.load_opt("CONSUL_ADDR") {
            config.consul.addr = addr;
        }
        if let Some(scheme) = self.load_opt("CONSUL_SCHEME") {
            config.consul.scheme = scheme;
        }
        if let Some(token) = self.load_opt("CONSUL_TOKEN") {
            config.consul.token = Some(token);
        }
        if let Some(wait) = self.load_opt("CONSUL_WAIT_SECS") {
            config.consul.wait_time_secs = wait.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!(
                    "{} must be a number of seconds",
                    self.var_name("CONSUL_WAIT_SECS")
                ))
            })?;
        }
        if let Some(environment) = self.load_opt("ENV") {
            config.consul.environment = Some(environment);
        }
        Ok(())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }
}
