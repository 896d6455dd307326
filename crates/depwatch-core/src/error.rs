//! Registration-time error types.

use std::time::Duration;

use thiserror::Error;

use crate::types::DependencyType;

/// Result type alias for configuration and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while building or validating dependencies.
///
/// These are hard configuration errors surfaced synchronously before any
/// check loop starts. They are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing instance name")]
    MissingName,

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid label name: {0:?}")]
    InvalidLabel(String),

    #[error("reserved label: {0:?}")]
    ReservedLabel(String),

    #[error("unknown dependency type {0:?}")]
    UnknownType(String),

    #[error("missing critical for dependency {0:?}")]
    MissingCritical(String),

    #[error("dependency {0:?} has no endpoints")]
    NoEndpoints(String),

    #[error("missing host for dependency {dependency:?} endpoint {index}")]
    MissingHost { dependency: String, index: usize },

    #[error("invalid port {0:?}: must be a number in 1-65535")]
    InvalidPort(String),

    #[error("{field} {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("timeout {timeout:?} must be less than interval {interval:?}")]
    TimeoutNotBelowInterval { timeout: Duration, interval: Duration },

    #[error("no probe registered for type {dep_type}")]
    NoProbe { dep_type: DependencyType },

    #[error("conflicting auth methods: {0}")]
    ConflictingAuth(&'static str),

    #[error("missing url or host/port parameters")]
    MissingSource,

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("dependency {name:?}: {source}")]
    Dependency {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

impl ConfigError {
    /// Attach the dependency name to an error raised while processing it.
    pub fn for_dependency(self, name: &str) -> Self {
        match self {
            already @ ConfigError::Dependency { .. } => already,
            other => ConfigError::Dependency {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }
}
