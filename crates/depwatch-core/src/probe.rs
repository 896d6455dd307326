//! Probe capability: the narrow seam between the scheduler and protocol checks.
//!
//! A probe performs one health check against one endpoint before a deadline.
//! Factories live in an explicit [`ProbeRegistry`] value; nothing is global.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::classify::StatusCategory;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{DependencyType, Endpoint};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a single probe call.
pub type ProbeOutcome = Result<(), ProbeError>;

/// Why a probe failed.
///
/// Probes either tag a failure explicitly with [`ProbeError::Classified`] or
/// return the underlying cause and let the classifier inspect it.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A failure the probe has already classified.
    #[error("{message}")]
    Classified {
        category: StatusCategory,
        detail: String,
        message: String,
    },

    #[error("timeout")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("unhealthy: {0}")]
    Unhealthy(String),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("dns lookup failed for {host}: {message}")]
    Dns { host: String, message: String },

    #[error("tls error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("probe panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProbeError {
    pub fn classified(
        category: StatusCategory,
        detail: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ProbeError::Classified {
            category,
            detail: detail.into(),
            message: message.into(),
        }
    }
}

/// A protocol-specific health check.
pub trait Probe: Send + Sync {
    /// Check `endpoint`, giving up at `deadline`.
    fn check<'a>(&'a self, endpoint: &'a Endpoint, deadline: Instant) -> BoxFuture<'a, ProbeOutcome>;

    fn dependency_type(&self) -> DependencyType;
}

// ── Probe settings ────────────────────────────────────────────────

/// Basic auth credentials for HTTP probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Protocol options handed to a probe factory.
///
/// Each probe reads the fields it understands and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// HTTP request path; the probe default is `/health`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,
    /// Use TLS for HTTP. Unset means "decide from the URL scheme".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_tls: Option<bool>,
    pub http_tls_skip_verify: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_bearer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_basic_auth: Option<BasicAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_db: Option<u32>,
}

impl ProbeSettings {
    /// At most one of bearer token, basic auth, or an `Authorization` header.
    pub fn validate_http_auth(&self) -> ConfigResult<()> {
        let header = self
            .http_headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("authorization"));
        let methods = [
            self.http_bearer_token.is_some(),
            self.http_basic_auth.is_some(),
            header,
        ];
        if methods.iter().filter(|set| **set).count() > 1 {
            return Err(ConfigError::ConflictingAuth(
                "only one of bearer token, basic auth, or Authorization header may be set",
            ));
        }
        Ok(())
    }
}

// ── Registry ──────────────────────────────────────────────────────

/// Builds a probe for one dependency from its settings.
pub type ProbeFactory = Arc<dyn Fn(&ProbeSettings) -> Arc<dyn Probe> + Send + Sync>;

/// Maps dependency types to probe factories.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    factories: HashMap<DependencyType, ProbeFactory>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `dep_type`.
    pub fn register<F>(&mut self, dep_type: DependencyType, factory: F)
    where
        F: Fn(&ProbeSettings) -> Arc<dyn Probe> + Send + Sync + 'static,
    {
        self.factories.insert(dep_type, Arc::new(factory));
    }

    pub fn with_factory<F>(mut self, dep_type: DependencyType, factory: F) -> Self
    where
        F: Fn(&ProbeSettings) -> Arc<dyn Probe> + Send + Sync + 'static,
    {
        self.register(dep_type, factory);
        self
    }

    pub fn supports(&self, dep_type: DependencyType) -> bool {
        self.factories.contains_key(&dep_type)
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<DependencyType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        types
    }

    /// Build a probe, failing when no factory is registered for the type.
    pub fn create(
        &self,
        dep_type: DependencyType,
        settings: &ProbeSettings,
    ) -> ConfigResult<Arc<dyn Probe>> {
        let factory = self
            .factories
            .get(&dep_type)
            .ok_or(ConfigError::NoProbe { dep_type })?;
        Ok(factory(settings))
    }
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("types", &self.types())
            .finish()
    }
}
