//! Dependency data model and registration-time validation.
//!
//! A [`Dependency`] is a named, typed group of [`Endpoint`]s that share one
//! probe and one [`CheckConfig`]. Everything here is validated once at
//! registration and treated as immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// ── Dependency type ───────────────────────────────────────────────

/// The protocol family a dependency speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Http,
    Grpc,
    Tcp,
    Postgres,
    Mysql,
    Redis,
    Amqp,
    Kafka,
    Ldap,
}

impl DependencyType {
    pub const ALL: [DependencyType; 9] = [
        DependencyType::Http,
        DependencyType::Grpc,
        DependencyType::Tcp,
        DependencyType::Postgres,
        DependencyType::Mysql,
        DependencyType::Redis,
        DependencyType::Amqp,
        DependencyType::Kafka,
        DependencyType::Ldap,
    ];

    /// The label value used in metrics and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Http => "http",
            DependencyType::Grpc => "grpc",
            DependencyType::Tcp => "tcp",
            DependencyType::Postgres => "postgres",
            DependencyType::Mysql => "mysql",
            DependencyType::Redis => "redis",
            DependencyType::Amqp => "amqp",
            DependencyType::Kafka => "kafka",
            DependencyType::Ldap => "ldap",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        DependencyType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| ConfigError::UnknownType(s.to_string()))
    }
}

// ── Check config ──────────────────────────────────────────────────

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 1;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_INITIAL_DELAY: Duration = Duration::from_secs(5 * 60);
pub const MIN_THRESHOLD: u32 = 1;
pub const MAX_THRESHOLD: u32 = 10;

/// Timing and sensitivity for one dependency's checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckConfig {
    /// Period between probes.
    pub interval: Duration,
    /// Deadline for a single probe. Strictly less than `interval`.
    pub timeout: Duration,
    /// Wait before the first probe.
    pub initial_delay: Duration,
    /// Consecutive failures needed to flip healthy → unhealthy.
    pub failure_threshold: u32,
    /// Consecutive successes needed to flip unhealthy → healthy.
    pub success_threshold: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            initial_delay: DEFAULT_INITIAL_DELAY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

impl CheckConfig {
    /// Check that every field is within its allowed range.
    pub fn validate(&self) -> ConfigResult<()> {
        check_duration("interval", self.interval, MIN_INTERVAL, MAX_INTERVAL)?;
        check_duration("timeout", self.timeout, MIN_TIMEOUT, MAX_TIMEOUT)?;
        if self.timeout >= self.interval {
            return Err(ConfigError::TimeoutNotBelowInterval {
                timeout: self.timeout,
                interval: self.interval,
            });
        }
        check_duration(
            "initial_delay",
            self.initial_delay,
            Duration::ZERO,
            MAX_INITIAL_DELAY,
        )?;
        check_threshold("failure_threshold", self.failure_threshold)?;
        check_threshold("success_threshold", self.success_threshold)?;
        Ok(())
    }
}

fn check_duration(
    field: &'static str,
    value: Duration,
    min: Duration,
    max: Duration,
) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: format!("{value:?}"),
            min: format!("{min:?}"),
            max: format!("{max:?}"),
        });
    }
    Ok(())
}

fn check_threshold(field: &'static str, value: u32) -> ConfigResult<()> {
    if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            min: MIN_THRESHOLD.to_string(),
            max: MAX_THRESHOLD.to_string(),
        });
    }
    Ok(())
}

// ── Endpoint ──────────────────────────────────────────────────────

/// One network target of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// User-defined labels, attached to every metric series of this endpoint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `host:port`, with IPv6 hosts wrapped in brackets.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Lookup key for an endpoint's state: `dependency:host:port`.
pub fn endpoint_key(dependency: &str, host: &str, port: u16) -> String {
    format!("{dependency}:{host}:{port}")
}

// ── Dependency ────────────────────────────────────────────────────

/// A monitored dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub dep_type: DependencyType,
    /// Must be explicitly set before scheduling; `None` fails validation.
    pub critical: Option<bool>,
    pub endpoints: Vec<Endpoint>,
    pub config: CheckConfig,
}

impl Dependency {
    /// Criticality, treating an unset flag as non-critical.
    ///
    /// Validation guarantees the flag is set for scheduled dependencies.
    pub fn is_critical(&self) -> bool {
        self.critical.unwrap_or(false)
    }

    /// Key of one of this dependency's endpoints.
    pub fn key(&self, endpoint: &Endpoint) -> String {
        endpoint_key(&self.name, &endpoint.host, endpoint.port)
    }

    /// Validate name, criticality, endpoints, labels, and check config.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_name(&self.name)?;
        if self.critical.is_none() {
            return Err(ConfigError::MissingCritical(self.name.clone()));
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(self.name.clone()));
        }
        for (index, ep) in self.endpoints.iter().enumerate() {
            if ep.host.is_empty() {
                return Err(ConfigError::MissingHost {
                    dependency: self.name.clone(),
                    index,
                });
            }
            if ep.port == 0 {
                return Err(ConfigError::InvalidPort("0".to_string()));
            }
            validate_labels(&ep.labels).map_err(|e| e.for_dependency(&self.name))?;
        }
        self.config
            .validate()
            .map_err(|e| e.for_dependency(&self.name))
    }
}

// ── Name and label validation ─────────────────────────────────────

const MAX_NAME_LEN: usize = 63;

/// Label names owned by the metrics schema.
pub const RESERVED_LABELS: [&str; 7] =
    ["name", "group", "dependency", "type", "host", "port", "critical"];

/// Validate a dependency or instance name: `[a-z][a-z0-9-]*`, 1–63 chars.
pub fn validate_name(name: &str) -> ConfigResult<()> {
    let invalid = |reason| ConfigError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid("length must be 1-63"));
    }
    let mut chars = name.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a lowercase letter"));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(invalid("must match [a-z][a-z0-9-]*"));
    }
    Ok(())
}

/// Validate a custom label name: `[a-zA-Z_][a-zA-Z0-9_]*`, not reserved.
pub fn validate_label_name(name: &str) -> ConfigResult<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidLabel(name.to_string()));
    }
    if RESERVED_LABELS.contains(&name) {
        return Err(ConfigError::ReservedLabel(name.to_string()));
    }
    Ok(())
}

pub fn validate_labels(labels: &BTreeMap<String, String>) -> ConfigResult<()> {
    labels.keys().try_for_each(|k| validate_label_name(k))
}

/// Render criticality as the `critical` label value.
pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dependency() -> Dependency {
        Dependency {
            name: "postgres-main".to_string(),
            dep_type: DependencyType::Postgres,
            critical: Some(true),
            endpoints: vec![Endpoint::new("pg.svc", 5432)],
            config: CheckConfig::default(),
        }
    }

    #[test]
    fn valid_dependency_passes() {
        dependency().validate().unwrap();
    }

    #[test]
    fn names_follow_pattern() {
        assert!(validate_name("redis-cache").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("a1-b2").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("1abc").is_err());
        assert!(validate_name("-abc").is_err());
        assert!(validate_name("Redis").is_err());
        assert!(validate_name("redis_cache").is_err());
        assert!(validate_name(&"a".repeat(63)).is_ok());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn label_names_reject_reserved_and_malformed() {
        assert!(validate_label_name("role").is_ok());
        assert!(validate_label_name("_shard").is_ok());
        assert!(validate_label_name("Zone_2").is_ok());

        for reserved in RESERVED_LABELS {
            assert!(matches!(
                validate_label_name(reserved),
                Err(ConfigError::ReservedLabel(_))
            ));
        }
        assert!(matches!(
            validate_label_name("2fast"),
            Err(ConfigError::InvalidLabel(_))
        ));
        assert!(validate_label_name("has-dash").is_err());
        assert!(validate_label_name("").is_err());
    }

    #[test]
    fn missing_critical_is_an_error() {
        let mut dep = dependency();
        dep.critical = None;
        assert!(matches!(dep.validate(), Err(ConfigError::MissingCritical(_))));
    }

    #[test]
    fn no_endpoints_is_an_error() {
        let mut dep = dependency();
        dep.endpoints.clear();
        assert!(matches!(dep.validate(), Err(ConfigError::NoEndpoints(_))));
    }

    #[test]
    fn bad_endpoint_label_is_an_error() {
        let mut dep = dependency();
        dep.endpoints[0] = Endpoint::new("pg.svc", 5432).with_label("host", "x");
        let err = dep.validate().unwrap_err();
        assert!(err.to_string().contains("reserved label"), "{err}");
    }

    #[test]
    fn check_config_ranges() {
        let ok = CheckConfig::default();
        assert!(ok.validate().is_ok());

        let short_interval = CheckConfig {
            interval: Duration::from_millis(500),
            timeout: Duration::from_millis(100),
            ..ok
        };
        assert!(short_interval.validate().is_err());

        let long_interval = CheckConfig {
            interval: Duration::from_secs(601),
            ..ok
        };
        assert!(long_interval.validate().is_err());

        let tiny_timeout = CheckConfig {
            timeout: Duration::from_millis(50),
            ..ok
        };
        assert!(tiny_timeout.validate().is_err());

        let zero_threshold = CheckConfig {
            failure_threshold: 0,
            ..ok
        };
        assert!(zero_threshold.validate().is_err());

        let big_threshold = CheckConfig {
            success_threshold: 11,
            ..ok
        };
        assert!(big_threshold.validate().is_err());

        let long_delay = CheckConfig {
            initial_delay: Duration::from_secs(301),
            ..ok
        };
        assert!(long_delay.validate().is_err());
    }

    #[test]
    fn timeout_must_be_below_interval() {
        let cfg = CheckConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            ..CheckConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TimeoutNotBelowInterval { .. })
        ));
    }

    #[test]
    fn dependency_type_parses_case_insensitively() {
        assert_eq!("HTTP".parse::<DependencyType>().unwrap(), DependencyType::Http);
        assert_eq!("ldap".parse::<DependencyType>().unwrap(), DependencyType::Ldap);
        assert!("mongodb".parse::<DependencyType>().is_err());
    }

    #[test]
    fn endpoint_address_brackets_ipv6() {
        assert_eq!(Endpoint::new("pg.svc", 5432).address(), "pg.svc:5432");
        assert_eq!(Endpoint::new("::1", 6379).address(), "[::1]:6379");
    }

    #[test]
    fn endpoint_key_format() {
        let dep = dependency();
        assert_eq!(dep.key(&dep.endpoints[0]), "postgres-main:pg.svc:5432");
    }
}
