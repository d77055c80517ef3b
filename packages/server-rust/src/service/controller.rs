//! Per-service lifecycle state machines.
//!
//! A [`ServiceController`] owns one service, its mode and state, the ordered
//! dependency list and the listeners. All transitions happen under the
//! controller's own lock; no controller ever holds its lock while locking
//! another one. Re-evaluation steps run one at a time on the registry's
//! transition executor, while start and stop hooks run on spawned tasks.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use keel_core::ServiceName;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::StartError;
use super::inject::Injector;
use super::listener::{ListenerId, ListenerSet, ServiceEvent, ServiceListener};
use super::registry::ServiceRegistry;

/// Value produced by a started service and handed to dependents and resolvers.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// State and Mode
// ---------------------------------------------------------------------------

/// Lifecycle state of a controller.
///
/// ```text
/// DOWN -> STARTING -> UP -> STOPPING -> DOWN
/// STARTING -> START_FAILED -> DOWN
/// DOWN / START_FAILED -> REMOVED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Down,
    Starting,
    Up,
    Stopping,
    StartFailed,
    Removed,
}

impl State {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::Up => "UP",
            Self::Stopping => "STOPPING",
            Self::StartFailed => "START_FAILED",
            Self::Removed => "REMOVED",
        }
    }

    /// Whether the service holds its dependencies in this state.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Up | Self::Stopping)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested activation policy of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Start as soon as every dependency is up.
    Active,
    /// Stay down; stop if running.
    Never,
    /// Stop and unregister. Irreversible.
    Remove,
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Context handed to a starting service.
#[derive(Clone)]
pub struct StartContext {
    name: ServiceName,
    registry: Arc<ServiceRegistry>,
}

impl StartContext {
    #[must_use]
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// The registry the service is installed in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }
}

impl fmt::Debug for StartContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartContext").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A runtime service managed by a controller.
///
/// Injected dependency values are available when `start` is called. A start
/// error or panic moves the controller to `START_FAILED`; stop errors are
/// logged and the controller still reaches `DOWN`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn start(&self, ctx: &StartContext) -> anyhow::Result<ServiceValue>;

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ServiceController
// ---------------------------------------------------------------------------

/// One edge to a dependency, optionally receiving its value.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) name: ServiceName,
    pub(crate) injector: Option<Arc<dyn Injector>>,
}

#[derive(Debug, Clone, Copy)]
struct DependencyStatus {
    available: bool,
    failed: bool,
}

/// Work to do once the controller lock is released.
#[derive(Debug, Default, Clone, Copy)]
struct Followups {
    schedule_self: bool,
    schedule_dependents: bool,
    unregister: bool,
}

enum Action {
    None,
    Start,
    Stop,
}

struct ControllerInner {
    state: State,
    mode: Mode,
    value: Option<ServiceValue>,
    failure: Option<StartError>,
    /// A dependency is START_FAILED, directly or transitively.
    dependency_failed: bool,
    /// UP but waiting for running dependents to stop.
    stop_requested: bool,
    running_dependents: usize,
    acquired: Vec<Arc<ServiceController>>,
    listeners: ListenerSet,
}

impl ControllerInner {
    fn is_available(&self) -> bool {
        self.state == State::Up && !self.stop_requested && self.mode == Mode::Active
    }
}

pub(crate) struct ServiceController {
    name: ServiceName,
    service: Arc<dyn Service>,
    dependencies: Vec<Dependency>,
    registry: Weak<ServiceRegistry>,
    inner: Mutex<ControllerInner>,
}

impl ServiceController {
    pub(crate) fn new(
        name: ServiceName,
        service: Arc<dyn Service>,
        dependencies: Vec<Dependency>,
        mode: Mode,
        registry: Weak<ServiceRegistry>,
    ) -> Self {
        Self {
            name,
            service,
            dependencies,
            registry,
            inner: Mutex::new(ControllerInner {
                state: State::Down,
                mode,
                value: None,
                failure: None,
                dependency_failed: false,
                stop_requested: false,
                running_dependents: 0,
                acquired: Vec::new(),
                listeners: ListenerSet::default(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &ServiceName {
        &self.name
    }

    pub(crate) fn dependency_names(&self) -> impl Iterator<Item = &ServiceName> {
        self.dependencies.iter().map(|d| &d.name)
    }

    pub(crate) fn state(&self) -> State {
        self.inner.lock().state
    }

    // -- transitions (caller holds the lock) --------------------------------

    fn transition(&self, inner: &mut ControllerInner, state: State, event: &ServiceEvent) {
        debug!(service = %self.name, from = %inner.state, to = %state, "service transition");
        metrics::counter!("keel_service_transitions_total", "state" => state.as_str()).increment(1);
        inner.state = state;
        inner.listeners.dispatch(&self.name, event);
    }

    fn mark_removed(&self, inner: &mut ControllerInner, followups: &mut Followups) {
        self.transition(inner, State::Removed, &ServiceEvent::Removed);
        followups.unregister = true;
        followups.schedule_dependents = true;
    }

    // -- dependency bookkeeping ---------------------------------------------

    fn dependency_status(&self, registry: &ServiceRegistry) -> DependencyStatus {
        let mut status = DependencyStatus {
            available: true,
            failed: false,
        };
        for dependency in &self.dependencies {
            let Some(controller) = registry.controller(&dependency.name) else {
                status.available = false;
                continue;
            };
            let inner = controller.inner.lock();
            if !inner.is_available() {
                status.available = false;
            }
            if inner.state == State::StartFailed
                || (inner.state == State::Down && inner.dependency_failed)
            {
                status.failed = true;
            }
        }
        status
    }

    /// Registers one more running dependent, only while available.
    fn try_acquire(&self) -> Option<ServiceValue> {
        let mut inner = self.inner.lock();
        if !inner.is_available() {
            return None;
        }
        let value = inner.value.clone()?;
        inner.running_dependents += 1;
        Some(value)
    }

    fn release(self: &Arc<Self>) {
        let idle = {
            let mut inner = self.inner.lock();
            inner.running_dependents = inner.running_dependents.saturating_sub(1);
            inner.running_dependents == 0
        };
        if idle {
            self.apply(Followups {
                schedule_self: true,
                ..Followups::default()
            });
        }
    }

    fn release_all(acquired: Vec<Arc<ServiceController>>) {
        for controller in acquired {
            controller.release();
        }
    }

    fn uninject_all(&self) {
        for injector in self.dependencies.iter().filter_map(|d| d.injector.as_ref()) {
            injector.uninject();
        }
    }

    fn apply(self: &Arc<Self>, followups: Followups) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if followups.unregister {
            registry.unregister(self);
        }
        if followups.schedule_self {
            registry.schedule(Arc::clone(self));
        }
        if followups.schedule_dependents {
            registry.schedule_dependents(&self.name);
        }
    }

    // -- the state machine --------------------------------------------------

    /// Re-evaluates the controller against its mode and dependencies.
    /// Runs on the transition executor only.
    pub(crate) fn step(self: &Arc<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let status = self.dependency_status(&registry);
        let mut followups = Followups::default();

        let action = {
            let mut inner = self.inner.lock();
            match inner.state {
                State::Removed | State::Starting | State::Stopping => Action::None,
                State::Down => {
                    if status.failed != inner.dependency_failed {
                        inner.dependency_failed = status.failed;
                        let event = if status.failed {
                            ServiceEvent::DependencyFailed
                        } else {
                            ServiceEvent::DependencyFailureCleared
                        };
                        inner.listeners.dispatch(&self.name, &event);
                        followups.schedule_dependents = true;
                    }
                    match inner.mode {
                        Mode::Remove => {
                            self.mark_removed(&mut inner, &mut followups);
                            Action::None
                        }
                        Mode::Active if status.available => Action::Start,
                        _ => Action::None,
                    }
                }
                State::StartFailed => {
                    match inner.mode {
                        Mode::Remove => self.mark_removed(&mut inner, &mut followups),
                        Mode::Never => {
                            inner.failure = None;
                            self.transition(&mut inner, State::Down, &ServiceEvent::FailureCleared);
                            followups.schedule_self = true;
                            followups.schedule_dependents = true;
                        }
                        Mode::Active => {}
                    }
                    Action::None
                }
                State::Up => {
                    let must_stop = inner.mode != Mode::Active || !status.available;
                    if must_stop {
                        if !inner.stop_requested {
                            inner.stop_requested = true;
                            followups.schedule_dependents = true;
                        }
                        if inner.running_dependents == 0 {
                            inner.stop_requested = false;
                            self.transition(&mut inner, State::Stopping, &ServiceEvent::Stopping);
                            Action::Stop
                        } else {
                            Action::None
                        }
                    } else {
                        if inner.stop_requested {
                            inner.stop_requested = false;
                            followups.schedule_dependents = true;
                        }
                        Action::None
                    }
                }
            }
        };

        self.apply(followups);
        match action {
            Action::None => {}
            Action::Start => self.begin_start(&registry),
            Action::Stop => self.begin_stop(&registry),
        }
    }

    fn begin_start(self: &Arc<Self>, registry: &Arc<ServiceRegistry>) {
        let mut acquired = Vec::with_capacity(self.dependencies.len());
        let mut values = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            let Some((controller, value)) = registry
                .controller(&dependency.name)
                .and_then(|c| c.try_acquire().map(|v| (c, v)))
            else {
                break;
            };
            acquired.push(controller);
            values.push(value);
        }

        let retry = |acquired: Vec<Arc<ServiceController>>| {
            Self::release_all(acquired);
            self.apply(Followups {
                schedule_self: true,
                ..Followups::default()
            });
        };

        if acquired.len() != self.dependencies.len() {
            retry(acquired);
            return;
        }

        {
            let mut inner = self.inner.lock();
            if inner.state != State::Down || inner.mode != Mode::Active {
                drop(inner);
                retry(acquired);
                return;
            }
            inner.acquired = acquired;
            self.transition(&mut inner, State::Starting, &ServiceEvent::Starting);
        }

        let guard = registry.tracker().guard();
        let ctx = StartContext {
            name: self.name.clone(),
            registry: Arc::clone(registry),
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = this.run_start(values, ctx).await;
            this.complete_start(outcome);
        });
    }

    async fn run_start(
        &self,
        values: Vec<ServiceValue>,
        ctx: StartContext,
    ) -> Result<ServiceValue, StartError> {
        for (dependency, value) in self.dependencies.iter().zip(values) {
            if let Some(injector) = &dependency.injector {
                injector.inject(value).map_err(|err| {
                    StartError::new(
                        self.name.clone(),
                        err.context(format!("injecting value of {}", dependency.name)),
                    )
                })?;
            }
        }

        let service = Arc::clone(&self.service);
        match tokio::spawn(async move { service.start(&ctx).await }).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StartError::new(self.name.clone(), err)),
            Err(join) => Err(StartError::new(
                self.name.clone(),
                anyhow::anyhow!("start hook panicked: {}", panic_message(join)),
            )),
        }
    }

    fn complete_start(self: &Arc<Self>, outcome: Result<ServiceValue, StartError>) {
        match outcome {
            Ok(value) => {
                let mut inner = self.inner.lock();
                inner.value = Some(Arc::clone(&value));
                self.transition(&mut inner, State::Up, &ServiceEvent::Started { value });
            }
            Err(cause) => {
                warn!(service = %self.name, error = %cause.cause, "service failed to start");
                self.uninject_all();
                let acquired = {
                    let mut inner = self.inner.lock();
                    inner.failure = Some(cause.clone());
                    self.transition(&mut inner, State::StartFailed, &ServiceEvent::Failed { cause });
                    std::mem::take(&mut inner.acquired)
                };
                Self::release_all(acquired);
            }
        }
        self.apply(Followups {
            schedule_self: true,
            schedule_dependents: true,
            unregister: false,
        });
    }

    fn begin_stop(self: &Arc<Self>, registry: &Arc<ServiceRegistry>) {
        let guard = registry.tracker().guard();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            let service = Arc::clone(&this.service);
            match tokio::spawn(async move { service.stop().await }).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(service = %this.name, error = %err, "service stop failed"),
                Err(join) => warn!(
                    service = %this.name,
                    panic = %panic_message(join),
                    "service stop hook panicked"
                ),
            }
            this.uninject_all();
            let acquired = {
                let mut inner = this.inner.lock();
                inner.value = None;
                this.transition(&mut inner, State::Down, &ServiceEvent::Stopped);
                std::mem::take(&mut inner.acquired)
            };
            Self::release_all(acquired);
            this.apply(Followups {
                schedule_self: true,
                schedule_dependents: true,
                unregister: false,
            });
        });
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ---------------------------------------------------------------------------
// ControllerHandle
// ---------------------------------------------------------------------------

/// Public handle to an installed service.
#[derive(Clone)]
pub struct ControllerHandle {
    controller: Arc<ServiceController>,
}

impl ControllerHandle {
    pub(crate) fn new(controller: Arc<ServiceController>) -> Self {
        Self { controller }
    }

    #[must_use]
    pub fn name(&self) -> &ServiceName {
        &self.controller.name
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.controller.state()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.controller.inner.lock().mode
    }

    /// The service value while UP.
    #[must_use]
    pub fn value(&self) -> Option<ServiceValue> {
        self.controller.inner.lock().value.clone()
    }

    /// The service value downcast to `T`, if UP and of that type.
    #[must_use]
    pub fn value_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value().and_then(|v| v.downcast::<T>().ok())
    }

    /// The recorded start failure while START_FAILED.
    #[must_use]
    pub fn failure(&self) -> Option<StartError> {
        self.controller.inner.lock().failure.clone()
    }

    /// Changes the mode. Idempotent; once `Remove` is set it cannot be undone.
    pub fn set_mode(&self, mode: Mode) {
        let changed = {
            let mut inner = self.controller.inner.lock();
            if inner.mode == mode || inner.mode == Mode::Remove || inner.state == State::Removed {
                false
            } else {
                debug!(service = %self.controller.name, from = ?inner.mode, to = ?mode, "mode change");
                inner.mode = mode;
                true
            }
        };
        if changed {
            self.controller.apply(Followups {
                schedule_self: true,
                ..Followups::default()
            });
        }
    }

    /// Attaches a listener; it immediately receives `Added` with the current
    /// state, then every later transition.
    pub fn add_listener(&self, listener: Arc<dyn ServiceListener>) -> ListenerId {
        let mut inner = self.controller.inner.lock();
        let added = ServiceEvent::Added {
            state: inner.state,
            value: if inner.state == State::Up {
                inner.value.clone()
            } else {
                None
            },
        };
        inner.listeners.add(&self.controller.name, listener, &added)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.controller.inner.lock().listeners.remove(id)
    }

    /// Moves a START_FAILED controller back to DOWN so it is started again.
    /// Returns `false` in any other state.
    pub fn retry(&self) -> bool {
        {
            let mut inner = self.controller.inner.lock();
            if inner.state != State::StartFailed {
                return false;
            }
            inner.failure = None;
            self.controller
                .transition(&mut inner, State::Down, &ServiceEvent::FailureCleared);
        }
        self.controller.apply(Followups {
            schedule_self: true,
            schedule_dependents: true,
            unregister: false,
        });
        true
    }
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.controller.inner.lock();
        f.debug_struct("ControllerHandle")
            .field("name", &self.controller.name)
            .field("state", &inner.state)
            .field("mode", &inner.mode)
            .finish()
    }
}
