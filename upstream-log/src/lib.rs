//! Upstream Logging
//!
//! Builds the process-wide `tracing` subscriber for the discovery backend
//! from `UPSTREAM_*` environment variables.
//!
//! # Usage
//!
//! ```rust
//! use upstream_log::{LogConfig, info};
//!
//! let config = LogConfig::from_env();
//! upstream_log::init(&config);
//!
//! info!(port = 8500, "connecting to registry");
//! ```
//!
//! # Environment Variables
//!
//! - `UPSTREAM_DEBUG=1` - Enable debug logging
//! - `UPSTREAM_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `UPSTREAM_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `UPSTREAM_LOG_COLOR=1|0` - Enable/disable colors
//! - `UPSTREAM_LOG_MODULE=1|0` - Include the target module in each line
//!
//! `RUST_LOG` takes precedence over `UPSTREAM_LOG_LEVEL` when set.

use std::env;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub use tracing::{debug, error, info, trace, warn};

/// Timestamp layout used by every output format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by [`EnvFilter`].
    pub fn as_filter(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Full single-line format with level colors
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include the event target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Pretty,
            color: false,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("UPSTREAM_DEBUG").unwrap_or(false);

        let level = lookup("UPSTREAM_LOG_LEVEL")
            .and_then(|s| Level::from_str(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("UPSTREAM_LOG_FORMAT")
            .and_then(|s| Format::from_str(&s))
            .unwrap_or(Format::Pretty);

        let color = flag("UPSTREAM_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        let module_path = flag("UPSTREAM_LOG_MODULE").unwrap_or(true);

        Self {
            level,
            format,
            color: color && format != Format::Json,
            module_path,
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, in which case
/// the existing one is left untouched.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));
    let timer = ChronoLocal::new(TIMESTAMP_FORMAT.to_string());
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        Format::Pretty => registry
            .with(
                fmt::layer()
                    .with_timer(timer)
                    .with_ansi(config.color)
                    .with_target(config.module_path)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        Format::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(timer)
                    .with_ansi(config.color)
                    .with_target(config.module_path)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        #[cfg(feature = "json")]
        Format::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_timer(timer)
                    .with_target(config.module_path)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        #[cfg(not(feature = "json"))]
        Format::Json => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_timer(timer)
                    .with_ansi(false)
                    .with_target(config.module_path)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.is_ok()
}

// ============================================================================
// Tests
// ============================================================================
