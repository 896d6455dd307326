//! depwatch-core — shared model for dependency health monitoring.
//!
//! Everything the scheduler, metrics, and probes agree on lives here:
//!
//! ```text
//! depwatch-core
//!   ├── types     Dependency, Endpoint, CheckConfig, name/label rules
//!   ├── probe     Probe trait, ProbeError, ProbeSettings, ProbeRegistry
//!   ├── classify  ProbeOutcome → CheckResult (closed StatusCategory taxonomy)
//!   ├── parser    URL / JDBC / connection-string / param parsing
//!   └── config    depwatch.toml
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod parser;
pub mod probe;
pub mod types;

pub use classify::{CheckResult, StatusCategory, classify, classify_error};
pub use config::{CheckDefaults, DependencyConfig, DepwatchConfig, LogFormat, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use parser::{ParsedConnection, parse_connection_string, parse_jdbc, parse_params, parse_url};
pub use probe::{
    BasicAuth, BoxFuture, Probe, ProbeError, ProbeFactory, ProbeOutcome, ProbeRegistry,
    ProbeSettings,
};
pub use types::{CheckConfig, Dependency, DependencyType, Endpoint, endpoint_key, yes_no};
