//! Labeled series families over a `prometheus::Registry`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tracing::debug;

use depwatch_core::types::validate_label_name;
use depwatch_core::{Dependency, Endpoint, StatusCategory, yes_no};

use crate::error::{MetricsError, MetricsResult};

pub const HEALTH_METRIC: &str = "app_dependency_health";
pub const LATENCY_METRIC: &str = "app_dependency_latency_seconds";
pub const STATUS_METRIC: &str = "app_dependency_status";
pub const STATUS_DETAIL_METRIC: &str = "app_dependency_status_detail";

/// Latency histogram buckets, in seconds.
pub const LATENCY_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Fixed label names, in series order. Custom labels follow, sorted.
pub const BASE_LABELS: [&str; 6] = ["name", "dependency", "type", "host", "port", "critical"];

/// Owns the dependency metric families and keeps their label sets consistent.
pub struct MetricsExporter {
    instance: String,
    extra_labels: Vec<String>,
    registry: Registry,
    health: GaugeVec,
    latency: HistogramVec,
    status: GaugeVec,
    status_detail: GaugeVec,
    /// Current detail per endpoint, keyed by its label values.
    details: Mutex<HashMap<Vec<String>, String>>,
}

impl MetricsExporter {
    /// Create an exporter with its own registry.
    pub fn new(instance: &str, extra_labels: &[String]) -> MetricsResult<Self> {
        Self::with_registry(instance, extra_labels, Registry::new())
    }

    /// Register the families on `registry`.
    ///
    /// Fails if the registry already holds them.
    pub fn with_registry(
        instance: &str,
        extra_labels: &[String],
        registry: Registry,
    ) -> MetricsResult<Self> {
        let mut extra: Vec<String> = extra_labels.to_vec();
        extra.sort();
        extra.dedup();
        for label in &extra {
            validate_label_name(label).map_err(MetricsError::InvalidLabel)?;
        }

        let labels: Vec<&str> = BASE_LABELS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .collect();
        let with = |last: &'static str| {
            let mut names = labels.clone();
            names.push(last);
            names
        };

        let health = GaugeVec::new(
            Opts::new(HEALTH_METRIC, "Health of a dependency endpoint: 1 = healthy, 0 = unhealthy"),
            &labels,
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(LATENCY_METRIC, "Latency of dependency health checks in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &labels,
        )?;
        let status = GaugeVec::new(
            Opts::new(STATUS_METRIC, "Category of the last check result"),
            &with("status"),
        )?;
        let status_detail = GaugeVec::new(
            Opts::new(STATUS_DETAIL_METRIC, "Detailed reason of the last check result"),
            &with("detail"),
        )?;

        registry.register(Box::new(health.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(status.clone()))?;
        registry.register(Box::new(status_detail.clone()))?;

        debug!(instance, extra_labels = ?extra, "dependency metrics registered");

        Ok(Self {
            instance: instance.to_string(),
            extra_labels: extra,
            registry,
            health,
            latency,
            status,
            status_detail,
            details: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn extra_labels(&self) -> &[String] {
        &self.extra_labels
    }

    /// Set the health gauge: 1 for healthy, 0 for unhealthy.
    pub fn set_health(&self, dep: &Dependency, ep: &Endpoint, healthy: bool) {
        let values = self.label_values(dep, ep);
        self.health
            .with_label_values(as_refs(&values).as_slice())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn observe_latency(&self, dep: &Dependency, ep: &Endpoint, latency: Duration) {
        let values = self.label_values(dep, ep);
        self.latency
            .with_label_values(as_refs(&values).as_slice())
            .observe(latency.as_secs_f64());
    }

    /// Set the status enum gauge: 1 for `category`, 0 for every other category.
    pub fn set_status(&self, dep: &Dependency, ep: &Endpoint, category: StatusCategory) {
        let mut values = self.label_values(dep, ep);
        for candidate in StatusCategory::ALL {
            values.push(candidate.as_str().to_string());
            let value = if candidate == category { 1.0 } else { 0.0 };
            self.status.with_label_values(as_refs(&values).as_slice()).set(value);
            values.pop();
        }
    }

    /// Publish the current detail, deleting the previous detail series if it changed.
    pub fn set_status_detail(&self, dep: &Dependency, ep: &Endpoint, detail: &str) {
        let mut values = self.label_values(dep, ep);
        let mut details = self.details.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = details.get(&values) {
            if previous != detail {
                values.push(previous.clone());
                let _ = self.status_detail.remove_label_values(as_refs(&values).as_slice());
                values.pop();
            }
        }
        details.insert(values.clone(), detail.to_string());

        values.push(detail.to_string());
        self.status_detail.with_label_values(as_refs(&values).as_slice()).set(1.0);
    }

    /// Remove every series of an endpoint.
    pub fn delete_metrics(&self, dep: &Dependency, ep: &Endpoint) {
        let mut values = self.label_values(dep, ep);
        let refs = as_refs(&values);
        let _ = self.health.remove_label_values(refs.as_slice());
        let _ = self.latency.remove_label_values(refs.as_slice());

        for category in StatusCategory::ALL {
            values.push(category.as_str().to_string());
            let _ = self.status.remove_label_values(as_refs(&values).as_slice());
            values.pop();
        }

        let previous = self
            .details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&values);
        if let Some(detail) = previous {
            values.push(detail);
            let _ = self.status_detail.remove_label_values(as_refs(&values).as_slice());
        }

        debug!(dependency = %dep.name, host = %ep.host, port = ep.port, "endpoint metrics deleted");
    }

    /// Render every registered family in Prometheus text format.
    pub fn render(&self) -> MetricsResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encode(e.to_string()))
    }

    /// Label values for one endpoint, in family label order.
    fn label_values(&self, dep: &Dependency, ep: &Endpoint) -> Vec<String> {
        let mut values = vec![
            self.instance.clone(),
            dep.name.clone(),
            dep.dep_type.as_str().to_string(),
            ep.host.clone(),
            ep.port.to_string(),
            yes_no(dep.is_critical()).to_string(),
        ];
        values.extend(
            self.extra_labels
                .iter()
                .map(|key| ep.labels.get(key).cloned().unwrap_or_default()),
        );
        values
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("instance", &self.instance)
            .field("extra_labels", &self.extra_labels)
            .finish_non_exhaustive()
    }
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}
