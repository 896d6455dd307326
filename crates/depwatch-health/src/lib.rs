//! depwatch-health — periodic dependency checks with debounced health.
//!
//! # Architecture
//!
//! ```text
//! DepWatch (registration facade)
//!   └── Scheduler
//!         ├── per-endpoint check loop
//!         │     ├── Probe::check under a deadline
//!         │     ├── classify() → CheckResult
//!         │     ├── EndpointState / HealthTracker (thresholds)
//!         │     └── MetricsExporter (health, latency, status, detail)
//!         └── health() / health_details() snapshots
//! ```
//!
//! A probe failure never escapes its loop: timeouts, panics, and errors
//! all become classified results.

pub mod depwatch;
pub mod error;
pub mod scheduler;
pub mod status;
pub mod tracker;

pub use depwatch::{DepWatch, DepWatchBuilder, DependencySpec, ENV_PREFIX};
pub use error::{BuildError, BuildResult, SchedulerError, SchedulerResult};
pub use scheduler::Scheduler;
pub use status::EndpointStatus;
pub use tracker::{EndpointState, HealthTracker, Transition};
