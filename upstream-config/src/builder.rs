// ConfigBuilder - layered configuration loading

use crate::{ConfigLoader, EnvLoader, Result, UpstreamConfig, Validate};
use std::path::PathBuf;

/// Builds an [`UpstreamConfig`] from files, `.env` and the environment.
///
/// Layers apply in order: files, then environment overrides, then
/// validation of the merged result.
pub struct ConfigBuilder {
    prefix: Option<String>,
    load_env: bool,
    load_dotenv: bool,
    dotenv_path: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            prefix: Some(crate::env::DEFAULT_PREFIX.to_string()),
            load_env: false,
            load_dotenv: false,
            dotenv_path: None,
            config_file: None,
        }
    }

    /// Set environment variable prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Enable overrides from environment variables
    pub fn load_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Enable loading from .env file before reading the environment
    pub fn load_dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.load_dotenv = true;
        self.load_env = true;
        self.dotenv_path = path;
        self
    }

    /// Configuration file to load (format from its extension)
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<UpstreamConfig> {
        if self.load_dotenv {
            match &self.dotenv_path {
                Some(path) => {
                    dotenvy::from_path(path)
                        .map_err(|e| crate::ConfigError::LoadError(e.to_string()))?;
                }
                None => {
                    dotenvy::dotenv().ok();
                }
            }
        }

        let mut config = match &self.config_file {
            Some(path) => ConfigLoader::auto(path)?.load_file(path)?,
            None => UpstreamConfig::default(),
        };

        if self.load_env {
            EnvLoader::new(self.prefix).apply(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
