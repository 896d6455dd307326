//! Read-only endpoint snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depwatch_core::{Dependency, DependencyType, Endpoint, StatusCategory};

use crate::tracker::EndpointState;

/// Flattened view of one endpoint's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    /// `None` until the first check completes.
    pub healthy: Option<bool>,
    pub status: StatusCategory,
    pub detail: String,
    #[serde(rename = "latency_ms", with = "latency_ms")]
    pub latency: Duration,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub critical: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl EndpointStatus {
    pub fn from_state(dep: &Dependency, ep: &Endpoint, state: &EndpointState) -> Self {
        Self {
            healthy: state.tracker.healthy(),
            status: state.last_result.category,
            detail: state.last_result.detail.clone(),
            latency: state.last_latency,
            dep_type: dep.dep_type,
            name: dep.name.clone(),
            host: ep.host.clone(),
            port: ep.port,
            critical: dep.is_critical(),
            last_checked_at: state.last_checked_at,
            labels: ep.labels.clone(),
        }
    }

    pub fn latency_millis(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// `Duration` as fractional milliseconds.
mod latency_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(latency: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(latency.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(ms / 1000.0).map_err(D::Error::custom)
    }
}
