//! The service registry: named controllers and the dependents index.
//!
//! Controllers are looked up by name; dependents are indexed by the name of
//! the dependency they wait for, so a (re)registration wakes them. Transition
//! steps run on the registry's background worker.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keel_core::ServiceName;
use tracing::{debug, warn};

use super::builder::ServiceBuilder;
use super::controller::{ControllerHandle, Dependency, Mode, Service, ServiceController, State};
use super::error::ServiceError;
use super::tracker::{InFlightGuard, InFlightTracker};
use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::config::KernelConfig;

// ---------------------------------------------------------------------------
// Transition executor
// ---------------------------------------------------------------------------

/// One queued re-evaluation of a controller.
pub(crate) struct ScheduledStep {
    controller: Arc<ServiceController>,
    _guard: InFlightGuard,
}

/// Runs controller steps one at a time.
struct StepRunner;

#[async_trait]
impl BackgroundRunnable for StepRunner {
    type Task = ScheduledStep;

    async fn run(&mut self, task: ScheduledStep) {
        task.controller.step();
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry of named, inter-dependent services.
///
/// Controllers are looked up by name; the dependents index maps a dependency
/// name to the names of the services that depend on it, so a re-registered
/// dependency wakes up dependents installed against its predecessor.
///
/// Constructed explicitly with [`ServiceRegistry::new`] and shared as an
/// `Arc`. Must be created inside a tokio runtime.
pub struct ServiceRegistry {
    controllers: DashMap<ServiceName, Arc<ServiceController>>,
    dependents: DashMap<ServiceName, Vec<ServiceName>>,
    executor: BackgroundWorker<StepRunner>,
    tracker: InFlightTracker,
    config: KernelConfig,
    me: Weak<ServiceRegistry>,
}

impl ServiceRegistry {
    /// Creates an empty registry and starts its transition executor.
    #[must_use]
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            controllers: DashMap::new(),
            dependents: DashMap::new(),
            executor: BackgroundWorker::start(StepRunner),
            tracker: InFlightTracker::default(),
            config,
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Starts building a service installation.
    pub fn add_service(&self, name: ServiceName, service: Arc<dyn Service>) -> ServiceBuilder<'_> {
        ServiceBuilder::new(self, name, service)
    }

    /// Installs a service with plain (non-injected) dependencies.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::install`].
    pub fn register(
        &self,
        name: ServiceName,
        service: Arc<dyn Service>,
        dependencies: &[ServiceName],
        mode: Mode,
    ) -> Result<ControllerHandle, ServiceError> {
        let dependencies = dependencies
            .iter()
            .map(|dep| Dependency {
                name: dep.clone(),
                injector: None,
            })
            .collect();
        self.install(name, service, dependencies, mode)
    }

    /// Installs a controller and schedules its first step.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] when a controller with the same name
    /// exists and is not REMOVED, and [`ServiceError::MissingDependency`] when a
    /// dependency is not registered (or is the service itself).
    pub(crate) fn install(
        &self,
        name: ServiceName,
        service: Arc<dyn Service>,
        dependencies: Vec<Dependency>,
        mode: Mode,
    ) -> Result<ControllerHandle, ServiceError> {
        if let Some(missing) = dependencies
            .iter()
            .find(|dep| dep.name == name || !self.controllers.contains_key(&dep.name))
        {
            return Err(ServiceError::MissingDependency {
                name,
                dependency: missing.name.clone(),
            });
        }

        let controller = Arc::new(ServiceController::new(
            name.clone(),
            service,
            dependencies,
            mode,
            self.me.clone(),
        ));

        loop {
            match self.controllers.entry(name.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&controller));
                    break;
                }
                Entry::Occupied(occupied) => {
                    let existing = Arc::clone(occupied.get());
                    drop(occupied);
                    // Never lock a controller while holding a shard guard.
                    if existing.state() != State::Removed {
                        return Err(ServiceError::Duplicate { name });
                    }
                    self.controllers
                        .remove_if(&name, |_, current| Arc::ptr_eq(current, &existing));
                }
            }
        }

        for dependency in controller.dependency_names() {
            let mut entry = self.dependents.entry(dependency.clone()).or_default();
            if !entry.contains(&name) {
                entry.push(name.clone());
            }
        }

        debug!(service = %name, ?mode, "service installed");
        self.schedule(Arc::clone(&controller));
        self.schedule_dependents(&name);
        Ok(ControllerHandle::new(controller))
    }

    /// Looks up an installed service.
    #[must_use]
    pub fn get(&self, name: &ServiceName) -> Option<ControllerHandle> {
        self.controller(name).map(ControllerHandle::new)
    }

    /// Names of all installed services, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<_> = self.controllers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Waits until no step is queued and no lifecycle hook is running.
    /// Returns `false` on timeout.
    pub async fn await_stability(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout).await
    }

    /// Sets every service to `Remove` and waits for the container to settle
    /// within the configured stability timeout.
    pub async fn shutdown(&self) -> bool {
        let controllers: Vec<_> = self.controllers.iter().map(|e| Arc::clone(e.value())).collect();
        for controller in controllers {
            ControllerHandle::new(controller).set_mode(Mode::Remove);
        }
        let settled = self.await_stability(self.config.stability_timeout).await;
        if !settled {
            warn!(remaining = self.controllers.len(), "service container did not settle");
        }
        settled
    }

    // -- crate-internal -----------------------------------------------------

    pub(crate) fn controller(&self, name: &ServiceName) -> Option<Arc<ServiceController>> {
        self.controllers.get(name).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    pub(crate) fn schedule(&self, controller: Arc<ServiceController>) {
        let step = ScheduledStep {
            controller,
            _guard: self.tracker.guard(),
        };
        if let Err(err) = self.executor.submit(step) {
            warn!(error = %err, "dropping service step");
        }
    }

    pub(crate) fn schedule_dependents(&self, name: &ServiceName) {
        let names = self
            .dependents
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for dependent in names {
            if let Some(controller) = self.controller(&dependent) {
                self.schedule(controller);
            }
        }
    }

    /// Drops a REMOVED controller, unless its name was already reused.
    pub(crate) fn unregister(&self, controller: &Arc<ServiceController>) {
        let removed = self
            .controllers
            .remove_if(controller.name(), |_, current| Arc::ptr_eq(current, controller))
            .is_some();
        if !removed {
            return;
        }
        for dependency in controller.dependency_names() {
            if let Some(mut entry) = self.dependents.get_mut(dependency) {
                entry.retain(|n| n != controller.name());
            }
            self.dependents.remove_if(dependency, |_, names| names.is_empty());
        }
        debug!(service = %controller.name(), "service unregistered");
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.controllers.len())
            .field("in_flight", &self.tracker.count())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::service::controller::{ServiceValue, StartContext};
    use crate::service::listener::{ListenerControl, ServiceEvent};

    const SETTLE: Duration = Duration::from_secs(5);

    /// Test service that records lifecycle calls into a shared log.
    struct TestService {
        label: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
        starts: AtomicU32,
    }

    impl TestService {
        fn new(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                label,
                fail: false,
                log: log.clone(),
                starts: AtomicU32::new(0),
            })
        }

        fn failing(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                label,
                fail: true,
                log: log.clone(),
                starts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Service for TestService {
        async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.log.lock().push(format!("start:{}", self.label));
            if self.fail {
                anyhow::bail!("{} refuses to start", self.label);
            }
            Ok(Arc::new(self.label.to_string()))
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop:{}", self.label));
            Ok(())
        }
    }

    struct PanickingService;

    #[async_trait]
    impl Service for PanickingService {
        async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
            panic!("boom");
        }
    }

    fn name(s: &str) -> ServiceName {
        s.parse().unwrap()
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
    }

    #[tokio::test]
    async fn dependency_chain_starts_in_order() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry
            .register(name("a"), TestService::new("a", &log), &[], Mode::Active)
            .unwrap();
        let b = registry
            .register(name("b"), TestService::new("b", &log), &[name("a")], Mode::Active)
            .unwrap();
        let c = registry
            .register(name("c"), TestService::new("c", &log), &[name("b")], Mode::Active)
            .unwrap();

        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(a.state(), State::Up);
        assert_eq!(b.state(), State::Up);
        assert_eq!(c.state(), State::Up);
        assert_eq!(*log.lock(), vec!["start:a", "start:b", "start:c"]);
        assert_eq!(c.value_as::<String>().unwrap().as_str(), "c");
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_until_removed() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = registry
            .register(name("dup"), TestService::new("first", &log), &[], Mode::Active)
            .unwrap();
        let err = registry
            .register(name("dup"), TestService::new("second", &log), &[], Mode::Active)
            .unwrap_err();
        assert_eq!(err, ServiceError::Duplicate { name: name("dup") });

        first.set_mode(Mode::Remove);
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(first.state(), State::Removed);
        assert!(registry.get(&name("dup")).is_none());

        let second = registry
            .register(name("dup"), TestService::new("second", &log), &[], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(second.state(), State::Up);
    }

    #[tokio::test]
    async fn missing_dependency_is_rejected() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let err = registry
            .register(name("x"), TestService::new("x", &log), &[name("ghost")], Mode::Active)
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingDependency { .. }));
        assert!(registry.get(&name("x")).is_none());
    }

    #[tokio::test]
    async fn remove_waits_for_dependents_to_stop() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let base = registry
            .register(name("base"), TestService::new("base", &log), &[], Mode::Active)
            .unwrap();
        let top = registry
            .register(name("top"), TestService::new("top", &log), &[name("base")], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);

        let order = Arc::new(Mutex::new(Vec::new()));
        for handle in [&base, &top] {
            let sink = order.clone();
            handle.add_listener(Arc::new(move |service: &ServiceName, event: &ServiceEvent| {
                if matches!(event, ServiceEvent::Stopped | ServiceEvent::Removed) {
                    sink.lock().push(format!("{service}:{}", event.label()));
                }
                ListenerControl::Retain
            }));
        }

        base.set_mode(Mode::Remove);
        assert!(registry.await_stability(SETTLE).await);

        assert_eq!(base.state(), State::Removed);
        assert_eq!(top.state(), State::Down);
        let order = order.lock().clone();
        assert!(position(&order, "top:stopped") < position(&order, "base:removed"));
        let log = log.lock().clone();
        assert!(position(&log, "stop:top") < position(&log, "stop:base"));
    }

    #[tokio::test]
    async fn dependent_restarts_when_dependency_is_reinstalled() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let base = registry
            .register(name("base"), TestService::new("base", &log), &[], Mode::Active)
            .unwrap();
        let top = registry
            .register(name("top"), TestService::new("top", &log), &[name("base")], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);

        base.set_mode(Mode::Remove);
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(top.state(), State::Down);

        registry
            .register(name("base"), TestService::new("base2", &log), &[], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(top.state(), State::Up);
    }

    #[tokio::test]
    async fn start_failure_marks_dependents_and_retry_recovers() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(Vec::new()));

        let broken = registry
            .register(name("broken"), TestService::failing("broken", &log), &[], Mode::Active)
            .unwrap();
        let dependent = registry
            .register(name("dependent"), TestService::new("dependent", &log), &[name("broken")], Mode::Active)
            .unwrap();
        let sink = events.clone();
        dependent.add_listener(Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
            sink.lock().push(event.label());
            ListenerControl::Retain
        }));

        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(broken.state(), State::StartFailed);
        assert!(broken.failure().unwrap().to_string().contains("refuses to start"));
        assert_eq!(dependent.state(), State::Down);
        assert!(events.lock().contains(&"dependency-failed"));

        assert!(broken.retry());
        assert!(registry.await_stability(SETTLE).await);
        // Still failing, but the dependent saw the failure clear and return.
        assert_eq!(broken.state(), State::StartFailed);
        assert!(events.lock().contains(&"dependency-failure-cleared"));
        assert!(!dependent.retry());
    }

    #[tokio::test]
    async fn panicking_start_hook_is_a_start_failure() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let handle = registry
            .register(name("panics"), Arc::new(PanickingService), &[], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(handle.state(), State::StartFailed);
        assert!(handle.failure().unwrap().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn never_mode_stops_and_clears_failure() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let up = registry
            .register(name("up"), TestService::new("up", &log), &[], Mode::Active)
            .unwrap();
        let failed = registry
            .register(name("failed"), TestService::failing("failed", &log), &[], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);

        up.set_mode(Mode::Never);
        failed.set_mode(Mode::Never);
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(up.state(), State::Down);
        assert_eq!(failed.state(), State::Down);
        assert!(failed.failure().is_none());

        up.set_mode(Mode::Active);
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(up.state(), State::Up);
    }

    #[tokio::test]
    async fn remove_mode_is_irreversible() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = registry
            .register(name("gone"), TestService::new("gone", &log), &[], Mode::Never)
            .unwrap();
        handle.set_mode(Mode::Remove);
        handle.set_mode(Mode::Active);
        assert_eq!(handle.mode(), Mode::Remove);
        assert!(registry.await_stability(SETTLE).await);
        assert_eq!(handle.state(), State::Removed);
    }

    #[tokio::test]
    async fn listener_added_late_sees_current_state() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = registry
            .register(name("late"), TestService::new("late", &log), &[], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        handle.add_listener(Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
            if let ServiceEvent::Added { state, value } = event {
                *sink.lock() = Some((*state, value.is_some()));
            }
            ListenerControl::Detach
        }));
        assert_eq!(*seen.lock(), Some((State::Up, true)));
    }

    #[tokio::test]
    async fn shutdown_removes_everything() {
        let registry = ServiceRegistry::new(KernelConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(name("a"), TestService::new("a", &log), &[], Mode::Active)
            .unwrap();
        registry
            .register(name("b"), TestService::new("b", &log), &[name("a")], Mode::Active)
            .unwrap();
        assert!(registry.await_stability(SETTLE).await);

        assert!(registry.shutdown().await);
        assert!(registry.service_names().is_empty());
        let log = log.lock().clone();
        assert!(position(&log, "stop:b") < position(&log, "stop:a"));
    }

    // ------------------------------------------------------------------
    // Random dependency graphs
    // ------------------------------------------------------------------

    struct GraphNode {
        fail: bool,
    }

    #[async_trait]
    impl Service for GraphNode {
        async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
            tokio::task::yield_now().await;
            if self.fail {
                anyhow::bail!("refuses to start");
            }
            Ok(Arc::new(()))
        }
    }

    fn node(i: usize) -> ServiceName {
        name(&format!("graph.n{i}"))
    }

    /// `(fails, dependency indices)` per node; dependencies always point at
    /// earlier nodes, so the graph is acyclic.
    fn graph() -> impl proptest::strategy::Strategy<Value = Vec<(bool, Vec<usize>)>> {
        use proptest::prelude::*;
        (1_usize..10).prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    let earlier: Vec<usize> = (0..i).collect();
                    (proptest::bool::weighted(0.2), proptest::sample::subsequence(earlier, 0..=i))
                })
                .collect::<Vec<_>>()
        })
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

        #[test]
        fn acyclic_graphs_settle_in_dependency_order(nodes in graph()) {
            let (log, states) = block_on(async {
                let registry = ServiceRegistry::new(KernelConfig::default());
                let log = Arc::new(Mutex::new(Vec::new()));
                let mut handles = Vec::with_capacity(nodes.len());
                for (i, (fail, deps)) in nodes.iter().enumerate() {
                    let deps: Vec<ServiceName> = deps.iter().map(|d| node(*d)).collect();
                    let handle = registry
                        .register(node(i), Arc::new(GraphNode { fail: *fail }), &deps, Mode::Never)
                        .unwrap();
                    let sink = log.clone();
                    handle.add_listener(Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
                        match event {
                            ServiceEvent::Starting => sink.lock().push((i, "starting")),
                            ServiceEvent::Started { .. } => sink.lock().push((i, "started")),
                            _ => {}
                        }
                        ListenerControl::Retain
                    }));
                    handles.push(handle);
                }
                for handle in &handles {
                    handle.set_mode(Mode::Active);
                }
                assert!(registry.await_stability(SETTLE).await);
                let states: Vec<State> = handles.iter().map(ControllerHandle::state).collect();
                let log = log.lock().clone();
                (log, states)
            });

            let mut expected = Vec::with_capacity(nodes.len());
            for (fail, deps) in &nodes {
                let deps_up = deps.iter().all(|d| expected[*d] == State::Up);
                expected.push(match (deps_up, fail) {
                    (false, _) => State::Down,
                    (true, false) => State::Up,
                    (true, true) => State::StartFailed,
                });
            }
            proptest::prop_assert_eq!(&states, &expected);

            for (at, (i, label)) in log.iter().enumerate() {
                if *label != "starting" {
                    continue;
                }
                for dep in &nodes[*i].1 {
                    let dep_started = log[..at].iter().any(|(j, l)| j == dep && *l == "started");
                    proptest::prop_assert!(dep_started, "n{} started before its dependency n{}", i, dep);
                }
            }
        }
    }
}
