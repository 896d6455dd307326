use depwatch_core::ConfigError;
use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metric label: {0}")]
    InvalidLabel(#[source] ConfigError),

    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encode(String),
}
