// Configuration file loaders

use crate::{ConfigError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    /// Load and deserialize configuration from file
    pub fn load_file<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> Result<T> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::LoadError(format!("Failed to read file: {}", e)))?;

        self.parse(&content)
    }

    /// Deserialize configuration from string
    pub fn parse<T: DeserializeOwned>(&self, content: &str) -> Result<T> {
        match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e))),
            FileFormat::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UpstreamConfig;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let json = r#"{"consul": {"addr": "10.0.0.1:8500"}}"#;

        let config: UpstreamConfig = loader.parse(json).unwrap();
        assert_eq!(config.consul.addr, "10.0.0.1:8500");
        assert_eq!(config.consul.scheme, "http");
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            [consul]
            addr = "consul.service:8500"
            token = "secret"

            [[watch]]
            service = "api"
            datacenters = "dc1,dc2"
        "#;

        let config: UpstreamConfig = loader.parse(toml).unwrap();
        assert_eq!(config.consul.token.as_deref(), Some("secret"));
        assert_eq!(config.watch.len(), 1);
        assert_eq!(config.watch[0].status, vec!["passing".to_string()]);
    }

    #[test]
    fn test_parse_error() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let result: Result<UpstreamConfig> = loader.parse("{not json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);

        assert!(ConfigLoader::auto("upstream.toml").is_ok());
        assert!(ConfigLoader::auto("upstream").is_err());
    }
}
