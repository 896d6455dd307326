//! Check scheduler: one background loop per endpoint.
//!
//! ```text
//! Scheduler
//!   ├── register(dependency, probe)      before start
//!   ├── start() ─┬─ loop per endpoint:
//!   │            │    initial delay → check → tick every interval → check …
//!   │            │    check = spawn probe under deadline → classify →
//!   │            │            metrics + EndpointState
//!   ├── stop()   └─ signal every loop, join them all
//!   ├── add / remove / update_endpoint   while running
//!   └── health() / health_details()      snapshots
//! ```
//!
//! Every suspension point (initial delay, tick wait, probe wait) also
//! watches the loop's stop signal and the optional outer deadline.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use depwatch_core::types::validate_labels;
use depwatch_core::{
    CheckConfig, Dependency, DependencyType, Endpoint, Probe, ProbeError, ProbeOutcome, classify,
    endpoint_key,
};
use depwatch_metrics::MetricsExporter;

use crate::error::{SchedulerError, SchedulerResult};
use crate::status::EndpointStatus;
use crate::tracker::{EndpointState, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

/// A dependency waiting for `start()`.
struct Registration {
    dependency: Arc<Dependency>,
    probe: Arc<dyn Probe>,
}

/// A running (or finished) endpoint loop.
struct EndpointSlot {
    dependency: Arc<Dependency>,
    endpoint: Endpoint,
    state: Arc<RwLock<EndpointState>>,
    /// Taken when the loop is joined.
    handle: Option<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

struct Inner {
    lifecycle: Lifecycle,
    pending: Vec<Registration>,
    /// Keyed by `dependency:host:port`.
    slots: HashMap<String, EndpointSlot>,
}

/// Runs periodic health checks for every registered endpoint.
pub struct Scheduler {
    metrics: Arc<MetricsExporter>,
    /// Check config for endpoints added while running.
    defaults: CheckConfig,
    inner: Mutex<Inner>,
    /// Loops taken out of `slots` that are still being joined.
    retiring: watch::Sender<usize>,
}

impl Scheduler {
    pub fn new(metrics: Arc<MetricsExporter>, defaults: CheckConfig) -> Self {
        Self {
            metrics,
            defaults,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Idle,
                pending: Vec::new(),
                slots: HashMap::new(),
            }),
            retiring: watch::channel(0).0,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsExporter> {
        &self.metrics
    }

    /// Register a validated dependency. Only allowed before `start()`.
    pub fn register(&self, dependency: Dependency, probe: Arc<dyn Probe>) -> SchedulerResult<()> {
        dependency.validate()?;
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Idle {
            return Err(SchedulerError::AlreadyStarted);
        }
        inner.pending.push(Registration {
            dependency: Arc::new(dependency),
            probe,
        });
        Ok(())
    }

    /// Spawn one check loop per registered endpoint.
    pub async fn start(&self) -> SchedulerResult<()> {
        self.start_inner(None)
    }

    /// Like [`start`](Self::start), but every loop also ends at `deadline`
    /// and no probe deadline extends past it.
    pub async fn start_until(&self, deadline: Instant) -> SchedulerResult<()> {
        self.start_inner(Some(deadline))
    }

    fn start_inner(&self, outer: Option<Instant>) -> SchedulerResult<()> {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Idle {
            return Err(SchedulerError::AlreadyStarted);
        }
        inner.lifecycle = Lifecycle::Running;

        // An endpoint listed twice gets one loop; the later listing wins.
        let mut unique: HashMap<String, (Arc<Dependency>, Endpoint, Arc<dyn Probe>)> = HashMap::new();
        for reg in std::mem::take(&mut inner.pending) {
            for ep in &reg.dependency.endpoints {
                unique.insert(
                    reg.dependency.key(ep),
                    (reg.dependency.clone(), ep.clone(), reg.probe.clone()),
                );
            }
        }

        let endpoints = unique.len();
        for (key, (dependency, endpoint, probe)) in unique {
            let slot = self.spawn_loop(dependency, endpoint, probe, outer);
            inner.slots.insert(key, slot);
        }

        info!(endpoints, "dependency checks started");
        Ok(())
    }

    /// Signal every loop to stop and wait until all have exited.
    ///
    /// No-op before `start()` and on repeated calls.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::Running {
                return;
            }
            inner.lifecycle = Lifecycle::Stopped;
            inner
                .slots
                .values_mut()
                .filter_map(|slot| {
                    let _ = slot.stop_tx.send(true);
                    slot.handle.take()
                })
                .collect()
        };

        for handle in handles {
            join_loop(handle).await;
        }
        let mut retiring = self.retiring.subscribe();
        let _ = retiring.wait_for(|count| *count == 0).await;
        info!("dependency checks stopped");
    }

    /// Add an endpoint while running. Idempotent for an existing key.
    pub async fn add_endpoint(
        &self,
        name: &str,
        dep_type: DependencyType,
        critical: bool,
        endpoint: Endpoint,
        probe: Arc<dyn Probe>,
    ) -> SchedulerResult<()> {
        let dependency = self.dynamic_dependency(name, dep_type, critical, &endpoint)?;
        let key = dependency.key(&endpoint);

        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Running {
            return Err(SchedulerError::NotStarted);
        }
        if inner.slots.contains_key(&key) {
            return Ok(());
        }
        let slot = self.spawn_loop(Arc::new(dependency), endpoint, probe, None);
        inner.slots.insert(key.clone(), slot);
        info!(endpoint = %key, "dynamic endpoint added");
        Ok(())
    }

    /// Stop an endpoint's loop and delete its state and metrics. Idempotent.
    pub async fn remove_endpoint(&self, name: &str, host: &str, port: u16) -> SchedulerResult<()> {
        let key = endpoint_key(name, host, port);
        let (slot, _retiring) = {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::Running {
                return Err(SchedulerError::NotStarted);
            }
            (inner.slots.remove(&key), Retiring::new(&self.retiring))
        };
        let Some(slot) = slot else {
            return Ok(());
        };

        self.retire(slot, true).await;
        info!(endpoint = %key, "dynamic endpoint removed");
        Ok(())
    }

    /// Replace an endpoint with a new one, keeping the dependency's metadata.
    pub async fn update_endpoint(
        &self,
        name: &str,
        old_host: &str,
        old_port: u16,
        endpoint: Endpoint,
        probe: Arc<dyn Probe>,
    ) -> SchedulerResult<()> {
        validate_labels(&endpoint.labels)?;
        let old_key = endpoint_key(name, old_host, old_port);

        let (retired, new_key, _retiring) = {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::Running {
                return Err(SchedulerError::NotStarted);
            }
            let old = inner
                .slots
                .remove(&old_key)
                .ok_or_else(|| SchedulerError::EndpointNotFound(old_key.clone()))?;

            let mut dependency = (*old.dependency).clone();
            dependency.endpoints = vec![endpoint.clone()];
            let dependency = Arc::new(dependency);
            let new_key = dependency.key(&endpoint);

            let slot = self.spawn_loop(dependency.clone(), endpoint.clone(), probe, None);
            let replaced = inner.slots.insert(new_key.clone(), slot);
            let retired: Vec<_> = std::iter::once(old)
                .chain(replaced)
                .map(|old| {
                    // The new loop may already publish under an identical label set.
                    let shared = same_series(&old.dependency, &old.endpoint, &dependency, &endpoint);
                    (old, !shared)
                })
                .collect();
            (retired, new_key, Retiring::new(&self.retiring))
        };

        for (old, delete_series) in retired {
            self.retire(old, delete_series).await;
        }
        info!(from = %old_key, to = %new_key, "dynamic endpoint updated");
        Ok(())
    }

    /// Health of every endpoint with at least one completed check.
    pub fn health(&self) -> HashMap<String, bool> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter_map(|(key, slot)| {
                let healthy = read_state(&slot.state).tracker.healthy()?;
                Some((key.clone(), healthy))
            })
            .collect()
    }

    /// Detailed status of every endpoint, including those still UNKNOWN.
    pub fn health_details(&self) -> HashMap<String, EndpointStatus> {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .map(|(key, slot)| {
                let state = read_state(&slot.state);
                let status = EndpointStatus::from_state(&slot.dependency, &slot.endpoint, &state);
                (key.clone(), status)
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dynamic_dependency(
        &self,
        name: &str,
        dep_type: DependencyType,
        critical: bool,
        endpoint: &Endpoint,
    ) -> SchedulerResult<Dependency> {
        let dependency = Dependency {
            name: name.to_string(),
            dep_type,
            critical: Some(critical),
            endpoints: vec![endpoint.clone()],
            config: self.defaults,
        };
        dependency.validate()?;
        Ok(dependency)
    }

    fn spawn_loop(
        &self,
        dependency: Arc<Dependency>,
        endpoint: Endpoint,
        probe: Arc<dyn Probe>,
        outer: Option<Instant>,
    ) -> EndpointSlot {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(EndpointState::new(&dependency.config)));

        let check_loop = CheckLoop {
            dependency: dependency.clone(),
            endpoint: endpoint.clone(),
            probe,
            state: state.clone(),
            metrics: self.metrics.clone(),
            outer,
        };
        let handle = tokio::spawn(check_loop.run(stop_rx));

        EndpointSlot {
            dependency,
            endpoint,
            state,
            handle: Some(handle),
            stop_tx,
        }
    }

    /// Stop a removed slot's loop, wait for it, then optionally drop its series.
    async fn retire(&self, mut slot: EndpointSlot, delete_series: bool) {
        let _ = slot.stop_tx.send(true);
        if let Some(handle) = slot.handle.take() {
            join_loop(handle).await;
        }
        if delete_series {
            self.metrics.delete_metrics(&slot.dependency, &slot.endpoint);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Scheduler")
            .field("lifecycle", &inner.lifecycle)
            .field("endpoints", &inner.slots.len())
            .finish_non_exhaustive()
    }
}

/// Counts one in-flight retirement until dropped. `stop()` waits for zero.
struct Retiring<'a>(&'a watch::Sender<usize>);

impl<'a> Retiring<'a> {
    fn new(count: &'a watch::Sender<usize>) -> Self {
        count.send_modify(|n| *n += 1);
        Self(count)
    }
}

impl Drop for Retiring<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

fn same_series(a: &Dependency, a_ep: &Endpoint, b: &Dependency, b_ep: &Endpoint) -> bool {
    a.name == b.name
        && a.dep_type == b.dep_type
        && a.is_critical() == b.is_critical()
        && a_ep == b_ep
}

async fn join_loop(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(error = %e, "check loop terminated abnormally");
    }
}

fn read_state(state: &RwLock<EndpointState>) -> std::sync::RwLockReadGuard<'_, EndpointState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

// ── Check loop ────────────────────────────────────────────────────

/// Everything one endpoint's loop needs. Owned by the spawned task.
struct CheckLoop {
    dependency: Arc<Dependency>,
    endpoint: Endpoint,
    probe: Arc<dyn Probe>,
    state: Arc<RwLock<EndpointState>>,
    metrics: Arc<MetricsExporter>,
    outer: Option<Instant>,
}

impl CheckLoop {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let config = self.dependency.config;
        debug!(
            dependency = %self.dependency.name,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            "check loop starting"
        );

        if !config.initial_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(config.initial_delay) => {}
                _ = cancelled(&mut stop, self.outer) => return,
            }
        }

        if self.execute_check(&mut stop).await.is_break() {
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.execute_check(&mut stop).await.is_break() {
                        break;
                    }
                }
                _ = cancelled(&mut stop, self.outer) => break,
            }
        }

        debug!(
            dependency = %self.dependency.name,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            "check loop exiting"
        );
    }

    /// Run one probe and record it. Breaks when cancellation wins.
    async fn execute_check(&self, stop: &mut watch::Receiver<bool>) -> ControlFlow<()> {
        if is_cancelled(stop, self.outer) {
            return ControlFlow::Break(());
        }

        let timeout = self.dependency.config.timeout;
        let started = Instant::now();
        let deadline = match self.outer {
            Some(outer) => (started + timeout).min(outer),
            None => started + timeout,
        };

        let probe = self.probe.clone();
        let endpoint = self.endpoint.clone();
        let mut task = tokio::spawn(async move { probe.check(&endpoint, deadline).await });

        // Cancellation is polled first: under an outer deadline the probe
        // deadline and the cancellation fire at the same instant.
        let outcome: ProbeOutcome = tokio::select! {
            biased;
            _ = cancelled(stop, self.outer) => {
                task.abort();
                return ControlFlow::Break(());
            }
            joined = tokio::time::timeout_at(deadline, &mut task) => match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Err(self.probe_fault(e)),
                Err(_) => {
                    task.abort();
                    if is_cancelled(stop, self.outer) {
                        return ControlFlow::Break(());
                    }
                    Err(ProbeError::DeadlineExceeded(timeout))
                }
            },
        };
        let latency = started.elapsed().max(Duration::from_nanos(1));

        self.record(outcome, latency);
        ControlFlow::Continue(())
    }

    fn probe_fault(&self, e: JoinError) -> ProbeError {
        let message = if e.is_panic() {
            let payload = e.into_panic();
            payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string())
        } else {
            e.to_string()
        };
        error!(
            dependency = %self.dependency.name,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            panic = %message,
            "probe panicked"
        );
        ProbeError::Panicked(message)
    }

    fn record(&self, outcome: ProbeOutcome, latency: Duration) {
        let dep = &self.dependency;
        let ep = &self.endpoint;
        let result = classify(&outcome);

        self.metrics.observe_latency(dep, ep, latency);
        self.metrics.set_status(dep, ep, result.category);
        self.metrics.set_status_detail(dep, ep, &result.detail);

        let (transition, healthy, failures) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let transition = state.record(result, latency, Utc::now());
            (
                transition,
                state.tracker.healthy().unwrap_or(false),
                state.tracker.consecutive_failures(),
            )
        };
        self.metrics.set_health(dep, ep, healthy);

        if let Err(e) = &outcome {
            warn!(
                dependency = %dep.name,
                dep_type = %dep.dep_type,
                host = %ep.host,
                port = ep.port,
                error = %e,
                "check failed"
            );
        } else {
            debug!(
                dependency = %dep.name,
                host = %ep.host,
                port = ep.port,
                latency_ms = latency.as_secs_f64() * 1000.0,
                "check ok"
            );
        }

        match transition {
            Transition::BecameUnhealthy => error!(
                dependency = %dep.name,
                dep_type = %dep.dep_type,
                host = %ep.host,
                port = ep.port,
                consecutive_failures = failures,
                "dependency unhealthy"
            ),
            Transition::BecameHealthy => info!(
                dependency = %dep.name,
                dep_type = %dep.dep_type,
                host = %ep.host,
                port = ep.port,
                "dependency recovered"
            ),
            Transition::Initial(_) | Transition::Unchanged => {}
        }
    }
}

fn is_cancelled(stop: &watch::Receiver<bool>, outer: Option<Instant>) -> bool {
    *stop.borrow() || outer.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Resolves once the loop is told to stop, its slot is dropped, or the
/// outer deadline passes.
async fn cancelled(stop: &mut watch::Receiver<bool>, outer: Option<Instant>) {
    let deadline = async {
        match outer {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => {}
        _ = deadline => {}
    }
}
