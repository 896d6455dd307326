//! Debounced per-endpoint health state.
//!
//! The first completed check sets health immediately. After that, health
//! only flips once the opposite outcome has been seen `threshold` times in
//! a row.

use std::time::Duration;

use chrono::{DateTime, Utc};

use depwatch_core::{CheckConfig, CheckResult};

/// What a recorded check did to the published health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First completed check: UNKNOWN → healthy/unhealthy.
    Initial(bool),
    /// HEALTHY → UNHEALTHY.
    BecameUnhealthy,
    /// UNHEALTHY → HEALTHY.
    BecameHealthy,
    Unchanged,
}

/// Tracks consecutive check outcomes for a single endpoint.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    /// `None` until the first check completes.
    healthy: Option<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures needed to flip healthy → unhealthy.
    failure_threshold: u32,
    /// Successes needed to flip unhealthy → healthy.
    success_threshold: u32,
}

impl HealthTracker {
    pub fn new(config: &CheckConfig) -> Self {
        Self::with_thresholds(config.failure_threshold, config.success_threshold)
    }

    pub fn with_thresholds(failure_threshold: u32, success_threshold: u32) -> Self {
        Self {
            healthy: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_threshold,
            success_threshold,
        }
    }

    /// Record a check outcome and report the resulting transition.
    pub fn record(&mut self, success: bool) -> Transition {
        let Some(healthy) = self.healthy else {
            self.healthy = Some(success);
            (self.consecutive_successes, self.consecutive_failures) =
                if success { (1, 0) } else { (0, 1) };
            return Transition::Initial(success);
        };

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            if !healthy && self.consecutive_successes >= self.success_threshold {
                self.healthy = Some(true);
                return Transition::BecameHealthy;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if healthy && self.consecutive_failures >= self.failure_threshold {
                self.healthy = Some(false);
                return Transition::BecameUnhealthy;
            }
        }
        Transition::Unchanged
    }

    /// Current health; `None` while UNKNOWN.
    pub fn healthy(&self) -> Option<bool> {
        self.healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }
}

/// Scheduler-owned state of one endpoint.
///
/// Written only by the endpoint's own check loop; read by snapshots.
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub tracker: HealthTracker,
    pub last_result: CheckResult,
    pub last_latency: Duration,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl EndpointState {
    pub fn new(config: &CheckConfig) -> Self {
        Self {
            tracker: HealthTracker::new(config),
            last_result: CheckResult::unknown(),
            last_latency: Duration::ZERO,
            last_checked_at: None,
        }
    }

    /// Apply a classified check outcome.
    pub fn record(
        &mut self,
        result: CheckResult,
        latency: Duration,
        checked_at: DateTime<Utc>,
    ) -> Transition {
        let transition = self.tracker.record(result.is_ok());
        self.last_result = result;
        self.last_latency = latency;
        self.last_checked_at = Some(checked_at);
        transition
    }
}
