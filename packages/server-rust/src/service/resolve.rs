//! Waiting for a service value.
//!
//! A one-shot listener forwards the first settling event of a controller
//! (UP, START_FAILED or REMOVED) to the waiting caller. The async flavour
//! races that against a [`CancellationToken`] and the configured timeout; the
//! blocking flavour is for threads outside the runtime.

use std::any::Any;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use keel_core::ServiceName;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::controller::{ControllerHandle, ServiceValue, State};
use super::error::{ResolveError, StartError};
use super::listener::{ListenerControl, ServiceEvent, ServiceListener};
use super::registry::ServiceRegistry;

const BLOCKING_POLL: Duration = Duration::from_millis(20);

/// How a watched controller settled.
enum Settled {
    Up(ServiceValue),
    Failed(Option<StartError>),
    Removed,
}

fn settled(event: &ServiceEvent) -> Option<Settled> {
    match event {
        ServiceEvent::Added { state: State::Up, value: Some(value) }
        | ServiceEvent::Started { value } => Some(Settled::Up(Arc::clone(value))),
        ServiceEvent::Added { state: State::StartFailed, .. } => Some(Settled::Failed(None)),
        ServiceEvent::Failed { cause } => Some(Settled::Failed(Some(cause.clone()))),
        ServiceEvent::Added { state: State::Removed, .. } | ServiceEvent::Removed => {
            Some(Settled::Removed)
        }
        _ => None,
    }
}

/// Detaching listener that hands the first settling event to `deliver`.
fn one_shot<F>(deliver: F) -> Arc<dyn ServiceListener>
where
    F: FnOnce(Settled) + Send + 'static,
{
    let slot = Mutex::new(Some(deliver));
    Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
        let Some(outcome) = settled(event) else {
            return ListenerControl::Retain;
        };
        if let Some(deliver) = slot.lock().take() {
            deliver(outcome);
        }
        ListenerControl::Detach
    })
}

/// Detaching listener that runs `deliver` once the controller is REMOVED.
pub(crate) fn on_removal<F>(deliver: F) -> Arc<dyn ServiceListener>
where
    F: FnOnce() + Send + 'static,
{
    let slot = Mutex::new(Some(deliver));
    Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
        let removed = matches!(
            event,
            ServiceEvent::Removed | ServiceEvent::Added { state: State::Removed, .. }
        );
        if !removed {
            return ListenerControl::Retain;
        }
        if let Some(deliver) = slot.lock().take() {
            deliver();
        }
        ListenerControl::Detach
    })
}

fn into_value(handle: &ControllerHandle, outcome: Settled) -> Result<ServiceValue, ResolveError> {
    let name = handle.name().clone();
    match outcome {
        Settled::Up(value) => Ok(value),
        Settled::Failed(cause) => {
            // `Added` carries no cause; read it now that the lock is released.
            match cause.or_else(|| handle.failure()) {
                Some(cause) => Err(ResolveError::StartFailed { name, cause }),
                None => Err(ResolveError::StartFailed {
                    cause: StartError::new(name.clone(), anyhow::anyhow!("start failed")),
                    name,
                }),
            }
        }
        Settled::Removed => Err(ResolveError::Removed { name }),
    }
}

fn downcast<T: Any + Send + Sync>(name: &ServiceName, value: ServiceValue) -> Result<Arc<T>, ResolveError> {
    value
        .downcast::<T>()
        .map_err(|_| ResolveError::WrongType { name: name.clone() })
}

async fn expiry(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

impl ControllerHandle {
    /// Waits until this service is UP and returns its value.
    ///
    /// # Errors
    ///
    /// `StartFailed` or `Removed` when the service settles that way,
    /// `Cancelled` when `cancel` fires and `Timeout` once `timeout` elapses.
    pub async fn await_up(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ServiceValue, ResolveError> {
        let (tx, rx) = oneshot::channel();
        let id = self.add_listener(one_shot(move |outcome| {
            let _ = tx.send(outcome);
        }));
        let result = tokio::select! {
            outcome = rx => match outcome {
                Ok(outcome) => into_value(self, outcome),
                Err(_) => Err(ResolveError::Cancelled { name: self.name().clone() }),
            },
            () = cancel.cancelled() => Err(ResolveError::Cancelled { name: self.name().clone() }),
            () = expiry(timeout) => Err(ResolveError::Timeout { name: self.name().clone() }),
        };
        self.remove_listener(id);
        result
    }

    /// Waits until this service is REMOVED. Does not request removal.
    ///
    /// # Errors
    ///
    /// `Cancelled` when `cancel` fires and `Timeout` once `timeout` elapses.
    pub async fn await_removal(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<(), ResolveError> {
        let (tx, rx) = oneshot::channel();
        let id = self.add_listener(on_removal(move || {
            let _ = tx.send(());
        }));
        let result = tokio::select! {
            done = rx => done.map_err(|_| ResolveError::Cancelled { name: self.name().clone() }),
            () = cancel.cancelled() => Err(ResolveError::Cancelled { name: self.name().clone() }),
            () = expiry(timeout) => Err(ResolveError::Timeout { name: self.name().clone() }),
        };
        self.remove_listener(id);
        result
    }
}

impl ServiceRegistry {
    /// Waits until the named service is UP and returns its value as `T`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the name is not installed, `StartFailed` or `Removed`
    /// when the service settles that way, `Cancelled` when `cancel` fires,
    /// `Timeout` after [`crate::KernelConfig::resolve_timeout`], and
    /// `WrongType` when the value is not a `T`.
    pub async fn await_value<T: Any + Send + Sync>(
        &self,
        name: &ServiceName,
        cancel: &CancellationToken,
    ) -> Result<Arc<T>, ResolveError> {
        let handle = self
            .get(name)
            .ok_or_else(|| ResolveError::NotFound { name: name.clone() })?;
        let value = handle.await_up(cancel, self.config().resolve_timeout).await?;
        downcast(name, value)
    }

    /// Blocking variant of [`ServiceRegistry::await_value`] for threads that
    /// are not driven by the runtime. Must not be called on a runtime worker.
    ///
    /// # Errors
    ///
    /// As for [`ServiceRegistry::await_value`].
    pub fn await_value_blocking<T: Any + Send + Sync>(
        &self,
        name: &ServiceName,
        cancel: &CancellationToken,
    ) -> Result<Arc<T>, ResolveError> {
        let handle = self
            .get(name)
            .ok_or_else(|| ResolveError::NotFound { name: name.clone() })?;

        let (tx, rx) = mpsc::channel();
        let id = handle.add_listener(one_shot(move |outcome| {
            let _ = tx.send(outcome);
        }));

        let deadline = self.config().resolve_timeout.map(|limit| Instant::now() + limit);
        let result = loop {
            if cancel.is_cancelled() {
                break Err(ResolveError::Cancelled { name: name.clone() });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Err(ResolveError::Timeout { name: name.clone() });
            }
            match rx.recv_timeout(BLOCKING_POLL) {
                Ok(outcome) => break into_value(&handle, outcome).and_then(|v| downcast(name, v)),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break Err(ResolveError::Cancelled { name: name.clone() })
                }
            }
        };
        handle.remove_listener(id);
        result
    }
}
