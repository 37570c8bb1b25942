// Configuration for the upstream discovery backend

pub mod builder;
pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use builder::ConfigBuilder;
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    CheckTarget, ConsulConfig, RegisterConfig, UpstreamConfig, WatchConfig, split_datacenters,
};
pub use validation::{ConfigValidator, Validate};
