//! Scheduler and registration error types.

use thiserror::Error;

use depwatch_core::ConfigError;
use depwatch_metrics::MetricsError;

/// Errors from scheduler lifecycle and dynamic endpoint operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler not started")]
    NotStarted,

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("invalid endpoint: {0}")]
    Config(#[from] ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors from building a [`DepWatch`](crate::DepWatch).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

pub type BuildResult<T> = Result<T, BuildError>;
