//! Registration facade.
//!
//! ```text
//! DepWatch::builder("orders-api")
//!   ├── .interval() / .timeout() …        global check overrides
//!   ├── .probe_registry(registry)         type → probe factory
//!   ├── .dependency(DependencySpec)       one per dependency
//!   └── .build()
//!         resolve endpoints → env fallbacks → labels → probe → validate
//!         → MetricsExporter (custom label schema) → Scheduler
//! ```
//!
//! Environment fallbacks (`<DEP>` is the upper snake case dependency name):
//!
//! - `DEPWATCH_NAME` supplies the instance name.
//! - `DEPWATCH_<DEP>_CRITICAL=yes|no|true|false` supplies criticality.
//! - `DEPWATCH_<DEP>_LABEL_<KEY>=value` adds a label unless already set.
//!
//! Values set in code always win.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use depwatch_core::parser::scheme_defaults;
use depwatch_core::types::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_INITIAL_DELAY, DEFAULT_INTERVAL, DEFAULT_SUCCESS_THRESHOLD,
    DEFAULT_TIMEOUT, validate_labels, validate_name,
};
use depwatch_core::{
    BasicAuth, CheckConfig, CheckDefaults, ConfigError, ConfigResult, Dependency, DependencyConfig,
    DependencyType, DepwatchConfig, Endpoint, Probe, ProbeRegistry, ProbeSettings, endpoint_key,
    parse_connection_string, parse_duration, parse_jdbc, parse_params, parse_url,
};
use depwatch_metrics::{MetricsExporter, MetricsResult};

use crate::error::{BuildResult, SchedulerError, SchedulerResult};
use crate::scheduler::Scheduler;
use crate::status::EndpointStatus;

pub const ENV_PREFIX: &str = "DEPWATCH_";

// ── Dependency spec ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum EndpointSource {
    Url(String),
    Jdbc(String),
    ConnectionString(String),
    Params { host: String, port: String },
    Endpoints(Vec<Endpoint>),
}

impl EndpointSource {
    fn endpoints(&self, dep_type: DependencyType) -> ConfigResult<Vec<Endpoint>> {
        let endpoints = match self {
            EndpointSource::Url(raw) => parse_url(raw)?.iter().map(|c| c.endpoint()).collect(),
            EndpointSource::Jdbc(raw) => parse_jdbc(raw)?.iter().map(|c| c.endpoint()).collect(),
            EndpointSource::ConnectionString(raw) => {
                let (host, port) = parse_connection_string(raw)?;
                let port = port.or_else(|| default_port(dep_type)).ok_or_else(|| {
                    ConfigError::InvalidConnectionString("missing port".to_string())
                })?;
                vec![Endpoint::new(host, port)]
            }
            EndpointSource::Params { host, port } => vec![parse_params(host, port)?],
            EndpointSource::Endpoints(endpoints) => endpoints.clone(),
        };
        Ok(endpoints)
    }

    fn is_https(&self) -> bool {
        matches!(self, EndpointSource::Url(raw) if raw.to_ascii_lowercase().starts_with("https://"))
    }
}

/// Default port for a dependency type, when it has one.
fn default_port(dep_type: DependencyType) -> Option<u16> {
    scheme_defaults(dep_type.as_str()).map(|(port, _)| port)
}

/// Check timing where every field may be left to a fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CheckOverrides {
    interval: Option<Duration>,
    timeout: Option<Duration>,
    initial_delay: Option<Duration>,
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
}

impl CheckOverrides {
    fn parse(defaults: &CheckDefaults) -> ConfigResult<Self> {
        let duration = |value: &Option<String>| value.as_deref().map(parse_duration).transpose();
        Ok(Self {
            interval: duration(&defaults.interval)?,
            timeout: duration(&defaults.timeout)?,
            initial_delay: duration(&defaults.initial_delay)?,
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
        })
    }

    /// Fields set here win over `fallback`.
    fn or(self, fallback: Self) -> Self {
        Self {
            interval: self.interval.or(fallback.interval),
            timeout: self.timeout.or(fallback.timeout),
            initial_delay: self.initial_delay.or(fallback.initial_delay),
            failure_threshold: self.failure_threshold.or(fallback.failure_threshold),
            success_threshold: self.success_threshold.or(fallback.success_threshold),
        }
    }

    fn into_config(self, initial_delay: Duration) -> CheckConfig {
        CheckConfig {
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            initial_delay: self.initial_delay.unwrap_or(initial_delay),
            failure_threshold: self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            success_threshold: self.success_threshold.unwrap_or(DEFAULT_SUCCESS_THRESHOLD),
        }
    }
}

/// Declarative description of one dependency, resolved by
/// [`DepWatchBuilder::build`].
#[derive(Clone)]
pub struct DependencySpec {
    name: String,
    dep_type: DependencyType,
    source: Option<EndpointSource>,
    critical: Option<bool>,
    labels: BTreeMap<String, String>,
    check: CheckOverrides,
    settings: ProbeSettings,
    probe: Option<Arc<dyn Probe>>,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, dep_type: DependencyType) -> Self {
        Self {
            name: name.into(),
            dep_type,
            source: None,
            critical: None,
            labels: BTreeMap::new(),
            check: CheckOverrides::default(),
            settings: ProbeSettings::default(),
            probe: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dep_type(&self) -> DependencyType {
        self.dep_type
    }

    /// Endpoints from a URL; comma-separated hosts yield several.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.source = Some(EndpointSource::Url(url.into()));
        self
    }

    pub fn jdbc(mut self, url: impl Into<String>) -> Self {
        self.source = Some(EndpointSource::Jdbc(url.into()));
        self
    }

    /// A `Key=Value;` connection string. A missing port falls back to the
    /// type's default port.
    pub fn connection_string(mut self, raw: impl Into<String>) -> Self {
        self.source = Some(EndpointSource::ConnectionString(raw.into()));
        self
    }

    pub fn params(mut self, host: impl Into<String>, port: impl Into<String>) -> Self {
        self.source = Some(EndpointSource::Params {
            host: host.into(),
            port: port.into(),
        });
        self
    }

    /// Add an explicit endpoint. Replaces any URL or params source.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        match &mut self.source {
            Some(EndpointSource::Endpoints(endpoints)) => endpoints.push(endpoint),
            _ => self.source = Some(EndpointSource::Endpoints(vec![endpoint])),
        }
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }

    /// Label applied to every endpoint of this dependency.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.check.interval = Some(interval);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.check.timeout = Some(timeout);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.check.initial_delay = Some(delay);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.check.failure_threshold = Some(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.check.success_threshold = Some(threshold);
        self
    }

    /// Replace all protocol settings at once.
    pub fn settings(mut self, settings: ProbeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn http_path(mut self, path: impl Into<String>) -> Self {
        self.settings.http_path = Some(path.into());
        self
    }

    pub fn http_tls(mut self, enabled: bool) -> Self {
        self.settings.http_tls = Some(enabled);
        self
    }

    pub fn http_tls_skip_verify(mut self, skip: bool) -> Self {
        self.settings.http_tls_skip_verify = skip;
        self
    }

    pub fn http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn http_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.settings.http_bearer_token = Some(token.into());
        self
    }

    pub fn http_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.http_basic_auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn redis_password(mut self, password: impl Into<String>) -> Self {
        self.settings.redis_password = Some(password.into());
        self
    }

    pub fn redis_db(mut self, db: u32) -> Self {
        self.settings.redis_db = Some(db);
        self
    }

    /// Use this probe instead of one from the registry.
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Translate a `[[dependency]]` table.
    ///
    /// Source precedence: `url`, `jdbc`, `connection_string`, `host`/`port`.
    pub fn from_config(config: &DependencyConfig) -> ConfigResult<Self> {
        let source = if let Some(url) = &config.url {
            Some(EndpointSource::Url(url.clone()))
        } else if let Some(jdbc) = &config.jdbc {
            Some(EndpointSource::Jdbc(jdbc.clone()))
        } else if let Some(raw) = &config.connection_string {
            Some(EndpointSource::ConnectionString(raw.clone()))
        } else if let Some(host) = &config.host {
            let port = config
                .port
                .or_else(|| default_port(config.dep_type))
                .ok_or_else(|| ConfigError::InvalidPort(String::new()))?;
            Some(EndpointSource::Params {
                host: host.clone(),
                port: port.to_string(),
            })
        } else {
            None
        };

        Ok(Self {
            name: config.name.clone(),
            dep_type: config.dep_type,
            source,
            critical: config.critical,
            labels: config.labels.clone(),
            check: CheckOverrides::parse(&config.check)?,
            settings: config.probe.clone(),
            probe: None,
        })
    }
}

impl std::fmt::Debug for DependencySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencySpec")
            .field("name", &self.name)
            .field("dep_type", &self.dep_type)
            .field("source", &self.source)
            .field("critical", &self.critical)
            .field("labels", &self.labels)
            .field("custom_probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}

// ── Builder ───────────────────────────────────────────────────────

/// Collects dependencies and global options, then builds a [`DepWatch`].
pub struct DepWatchBuilder {
    name: Option<String>,
    check: CheckOverrides,
    registry: ProbeRegistry,
    metrics_registry: Option<prometheus::Registry>,
    /// Environment snapshot; `None` reads the process environment.
    env: Option<HashMap<String, String>>,
    dependencies: Vec<DependencySpec>,
}

impl DepWatchBuilder {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            check: CheckOverrides::default(),
            registry: ProbeRegistry::new(),
            metrics_registry: None,
            env: None,
            dependencies: Vec::new(),
        }
    }

    /// Builder seeded from a parsed `depwatch.toml`.
    pub fn from_config(config: &DepwatchConfig) -> ConfigResult<Self> {
        let mut builder = Self::new(config.name.clone());
        if let Some(defaults) = &config.defaults {
            builder.check = CheckOverrides::parse(defaults)?;
        }
        for dependency in &config.dependencies {
            let spec = DependencySpec::from_config(dependency)
                .map_err(|e| e.for_dependency(&dependency.name))?;
            builder.dependencies.push(spec);
        }
        Ok(builder)
    }

    /// Default interval for every dependency.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.check.interval = Some(interval);
        self
    }

    /// Default probe timeout for every dependency.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.check.timeout = Some(timeout);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.check.initial_delay = Some(delay);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.check.failure_threshold = Some(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.check.success_threshold = Some(threshold);
        self
    }

    pub fn probe_registry(mut self, registry: ProbeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register the metric families on a caller-owned registry.
    pub fn metrics_registry(mut self, registry: prometheus::Registry) -> Self {
        self.metrics_registry = Some(registry);
        self
    }

    /// Read fallbacks from these variables instead of the process environment.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn dependency(mut self, spec: DependencySpec) -> Self {
        self.dependencies.push(spec);
        self
    }

    pub fn build(self) -> BuildResult<DepWatch> {
        let name = match self.name.clone().filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => self
                .lookup(&format!("{ENV_PREFIX}NAME"))
                .ok_or(ConfigError::MissingName)?,
        };
        validate_name(&name)?;

        let mut resolved = Vec::with_capacity(self.dependencies.len());
        for spec in &self.dependencies {
            let dependency = self
                .resolve(spec)
                .map_err(|e| e.for_dependency(&spec.name))?;
            resolved.push(dependency);
        }

        let label_keys: Vec<String> = resolved
            .iter()
            .flat_map(|(dep, _)| dep.endpoints.iter())
            .flat_map(|ep| ep.labels.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let metrics = match self.metrics_registry {
            Some(registry) => MetricsExporter::with_registry(&name, &label_keys, registry)?,
            None => MetricsExporter::new(&name, &label_keys)?,
        };

        let dynamic_defaults = self.check.into_config(DEFAULT_INITIAL_DELAY);
        dynamic_defaults.validate()?;
        let scheduler = Scheduler::new(Arc::new(metrics), dynamic_defaults);

        let mut probes = HashMap::new();
        for (dependency, probe) in resolved {
            debug!(
                dependency = %dependency.name,
                dep_type = %dependency.dep_type,
                endpoints = dependency.endpoints.len(),
                "dependency registered"
            );
            probes.insert(dependency.name.clone(), probe.clone());
            scheduler.register(dependency, probe)?;
        }
        info!(name = %name, dependencies = probes.len(), "depwatch built");

        Ok(DepWatch {
            name,
            scheduler,
            registry: self.registry,
            probes: Mutex::new(probes),
        })
    }

    /// Turn a spec into a validated dependency and its probe.
    fn resolve(&self, spec: &DependencySpec) -> ConfigResult<(Dependency, Arc<dyn Probe>)> {
        validate_name(&spec.name)?;
        let source = spec.source.as_ref().ok_or(ConfigError::MissingSource)?;
        let mut endpoints = source.endpoints(spec.dep_type)?;

        let critical = spec
            .critical
            .or_else(|| self.env_critical(&spec.name))
            .ok_or_else(|| ConfigError::MissingCritical(spec.name.clone()))?;

        validate_labels(&spec.labels)?;
        let mut labels = spec.labels.clone();
        for (key, value) in self.env_labels(&spec.name) {
            labels.entry(key).or_insert(value);
        }
        for endpoint in &mut endpoints {
            endpoint.labels.extend(labels.clone());
        }

        let mut settings = spec.settings.clone();
        if spec.dep_type == DependencyType::Http && settings.http_tls.is_none() && source.is_https() {
            settings.http_tls = Some(true);
        }
        settings.validate_http_auth()?;

        let probe = match &spec.probe {
            Some(probe) => probe.clone(),
            None => self.registry.create(spec.dep_type, &settings)?,
        };

        let dependency = Dependency {
            name: spec.name.clone(),
            dep_type: spec.dep_type,
            critical: Some(critical),
            endpoints,
            config: spec.check.or(self.check).into_config(Duration::ZERO),
        };
        dependency.validate()?;
        Ok((dependency, probe))
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let value = match &self.env {
            Some(env) => env.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.filter(|v| !v.is_empty())
    }

    fn env_critical(&self, dependency: &str) -> Option<bool> {
        let key = format!("{ENV_PREFIX}{}_CRITICAL", env_name(dependency));
        match self.lookup(&key)?.to_ascii_lowercase().as_str() {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        }
    }

    fn env_labels(&self, dependency: &str) -> Vec<(String, String)> {
        let prefix = format!("{ENV_PREFIX}{}_LABEL_", env_name(dependency));
        let vars: Vec<(String, String)> = match &self.env {
            Some(env) => env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        };
        vars.into_iter()
            .filter_map(|(key, value)| {
                let label = key.strip_prefix(&prefix)?;
                (!label.is_empty()).then(|| (label.to_ascii_lowercase(), value))
            })
            .collect()
    }
}

impl std::fmt::Debug for DepWatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepWatchBuilder")
            .field("name", &self.name)
            .field("check", &self.check)
            .field("registry", &self.registry)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// `payments-api` → `PAYMENTS_API`.
fn env_name(dependency: &str) -> String {
    dependency.to_ascii_uppercase().replace('-', "_")
}

// ── DepWatch ──────────────────────────────────────────────────────

/// A built set of monitored dependencies.
pub struct DepWatch {
    name: String,
    scheduler: Scheduler,
    registry: ProbeRegistry,
    /// Probe per dependency name, reused by `update_endpoint`.
    probes: Mutex<HashMap<String, Arc<dyn Probe>>>,
}

impl DepWatch {
    /// Start building. An empty name falls back to `DEPWATCH_NAME`.
    pub fn builder(name: impl Into<String>) -> DepWatchBuilder {
        DepWatchBuilder::new(Some(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<MetricsExporter> {
        self.scheduler.metrics()
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        self.scheduler.start().await
    }

    /// Start with an outer deadline that ends every check loop.
    pub async fn start_until(&self, deadline: Instant) -> SchedulerResult<()> {
        self.scheduler.start_until(deadline).await
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await
    }

    pub fn health(&self) -> HashMap<String, bool> {
        self.scheduler.health()
    }

    pub fn health_details(&self) -> HashMap<String, EndpointStatus> {
        self.scheduler.health_details()
    }

    /// False when any critical endpoint is known to be unhealthy.
    pub fn critical_healthy(&self) -> bool {
        !self
            .health_details()
            .values()
            .any(|status| status.critical && status.healthy == Some(false))
    }

    /// Add an endpoint checked by a probe from the registry.
    pub async fn add_endpoint(
        &self,
        name: &str,
        dep_type: DependencyType,
        critical: bool,
        endpoint: Endpoint,
        settings: &ProbeSettings,
    ) -> BuildResult<()> {
        settings.validate_http_auth()?;
        let probe = self.registry.create(dep_type, settings)?;
        self.add_endpoint_with_probe(name, critical, endpoint, probe)
            .await?;
        Ok(())
    }

    /// Add an endpoint checked by `probe`.
    pub async fn add_endpoint_with_probe(
        &self,
        name: &str,
        critical: bool,
        endpoint: Endpoint,
        probe: Arc<dyn Probe>,
    ) -> SchedulerResult<()> {
        self.scheduler
            .add_endpoint(name, probe.dependency_type(), critical, endpoint, probe.clone())
            .await?;
        self.lock_probes().entry(name.to_string()).or_insert(probe);
        Ok(())
    }

    pub async fn remove_endpoint(&self, name: &str, host: &str, port: u16) -> SchedulerResult<()> {
        self.scheduler.remove_endpoint(name, host, port).await
    }

    /// Move an endpoint, reusing its dependency's probe.
    pub async fn update_endpoint(
        &self,
        name: &str,
        old_host: &str,
        old_port: u16,
        endpoint: Endpoint,
    ) -> SchedulerResult<()> {
        let probe = self
            .lock_probes()
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::EndpointNotFound(endpoint_key(name, old_host, old_port)))?;
        self.scheduler
            .update_endpoint(name, old_host, old_port, endpoint, probe)
            .await
    }

    /// Prometheus text exposition of every family.
    pub fn render_metrics(&self) -> MetricsResult<String> {
        self.scheduler.metrics().render()
    }

    fn lock_probes(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Probe>>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DepWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepWatch")
            .field("name", &self.name)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
