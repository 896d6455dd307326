//! depwatch.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::probe::ProbeSettings;
use crate::types::DependencyType;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9464";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepwatchConfig {
    /// Instance name; falls back to `DEPWATCH_NAME`.
    pub name: Option<String>,
    pub listen: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    pub defaults: Option<CheckDefaults>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Check timing overrides. Durations are strings like `"500ms"`, `"5s"`, `"2m"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefaults {
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub initial_delay: Option<String>,
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
}

/// One `[[dependency]]` table.
///
/// Exactly one endpoint source is used, in order: `url`, `jdbc`,
/// `connection_string`, `host`/`port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub critical: Option<bool>,
    pub url: Option<String>,
    pub jdbc: Option<String>,
    pub connection_string: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub check: CheckDefaults,
    #[serde(default)]
    pub probe: ProbeSettings,
}

impl DepwatchConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn listen_addr(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    /// Scaffold a small depwatch.toml for the given instance.
    pub fn scaffold(name: &str) -> Self {
        let dependency = |name: &str, dep_type, url: &str| DependencyConfig {
            name: name.to_string(),
            dep_type,
            critical: Some(true),
            url: Some(url.to_string()),
            jdbc: None,
            connection_string: None,
            host: None,
            port: None,
            labels: BTreeMap::new(),
            check: CheckDefaults::default(),
            probe: ProbeSettings::default(),
        };

        let mut api = dependency("payments-api", DependencyType::Http, "http://payments.svc:8080");
        api.probe.http_path = Some("/healthz".to_string());
        let mut cache = dependency("session-cache", DependencyType::Redis, "redis://redis.svc:6379");
        cache.critical = Some(false);
        cache.labels.insert("role".to_string(), "cache".to_string());

        DepwatchConfig {
            name: Some(name.to_string()),
            listen: Some(DEFAULT_LISTEN.to_string()),
            log_format: LogFormat::Text,
            defaults: Some(CheckDefaults {
                interval: Some("15s".to_string()),
                timeout: Some("5s".to_string()),
                initial_delay: None,
                failure_threshold: Some(1),
                success_threshold: Some(1),
            }),
            dependencies: vec![api, cache],
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let trimmed = s.trim();
    let parsed = if let Some(secs) = trimmed.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_scaffold_round_trips() {
        let config = DepwatchConfig::scaffold("orders-api");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("orders-api"));
        assert!(toml_str.contains("payments-api"));

        let parsed = DepwatchConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.dependencies.len(), 2);
        assert_eq!(parsed.dependencies[1].labels["role"], "cache");
        assert_eq!(
            parsed.dependencies[0].probe.http_path.as_deref(),
            Some("/healthz")
        );
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[[dependency]]
name = "pg"
type = "postgres"
host = "pg.svc"
port = 5432
critical = true
timeout = "2s"
"#;
        let config = DepwatchConfig::from_toml_str(toml_str).unwrap();
        assert!(config.name.is_none());
        assert_eq!(config.listen_addr(), DEFAULT_LISTEN);
        assert_eq!(config.log_format, LogFormat::Text);

        let dep = &config.dependencies[0];
        assert_eq!(dep.dep_type, DependencyType::Postgres);
        assert_eq!(dep.check.timeout.as_deref(), Some("2s"));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let toml_str = r#"
[[dependency]]
name = "mongo"
type = "mongodb"
host = "db"
"#;
        assert!(matches!(
            DepwatchConfig::from_toml_str(toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"svc\"\nlisten = \"127.0.0.1:9000\"\nlog_format = \"json\"").unwrap();
        let config = DepwatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("svc"));
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file() {
        let err = DepwatchConfig::from_file(Path::new("/nonexistent/depwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(" 0s ").unwrap(), Duration::ZERO);
        assert!(parse_duration("fast").is_err());
        assert!(matches!(
            parse_duration(&format!("{}m", u64::MAX)),
            Err(ConfigError::InvalidDuration(_))
        ));
    }
}
