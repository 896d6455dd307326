//! depwatch-metrics — dependency health as Prometheus series.
//!
//! ```text
//! MetricsExporter
//!   ├── app_dependency_health            gauge, 1 = healthy
//!   ├── app_dependency_latency_seconds   histogram
//!   ├── app_dependency_status            one-hot gauge over status categories
//!   ├── app_dependency_status_detail     info gauge, one series per endpoint
//!   └── render() → text/plain for /metrics
//! ```
//!
//! Every family is labeled `{name, dependency, type, host, port, critical}`
//! followed by the sorted custom labels.

pub mod error;
pub mod exporter;

pub use error::{MetricsError, MetricsResult};
pub use exporter::{
    BASE_LABELS, HEALTH_METRIC, LATENCY_BUCKETS, LATENCY_METRIC, MetricsExporter, STATUS_DETAIL_METRIC,
    STATUS_METRIC,
};
