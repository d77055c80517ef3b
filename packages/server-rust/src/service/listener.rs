//! State-change notifications for service controllers.
//!
//! Every transition of a controller is delivered, in order, to each of its
//! listeners as one [`ServiceEvent`]. Delivery happens synchronously while the
//! controller's own lock is held, so a listener must not call back into the
//! controller it is attached to; it returns [`ListenerControl::Detach`]
//! instead of removing itself.

use std::fmt;
use std::sync::Arc;

use keel_core::ServiceName;

use super::controller::{ServiceValue, State};
use super::error::StartError;

/// A transition (or the synthetic registration event) of one controller.
#[derive(Clone)]
pub enum ServiceEvent {
    /// Sent once to a newly added listener with the state at that instant.
    Added {
        state: State,
        value: Option<ServiceValue>,
    },
    Starting,
    Started { value: ServiceValue },
    Failed { cause: StartError },
    /// A dependency is START_FAILED (directly or transitively).
    DependencyFailed,
    DependencyFailureCleared,
    /// A START_FAILED controller was moved back to DOWN by `retry`.
    FailureCleared,
    Stopping,
    Stopped,
    Removed,
}

impl ServiceEvent {
    /// Short lowercase label, used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Starting => "starting",
            Self::Started { .. } => "started",
            Self::Failed { .. } => "failed",
            Self::DependencyFailed => "dependency-failed",
            Self::DependencyFailureCleared => "dependency-failure-cleared",
            Self::FailureCleared => "failure-cleared",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Debug for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { state, value } => f
                .debug_struct("Added")
                .field("state", state)
                .field("has_value", &value.is_some())
                .finish(),
            Self::Failed { cause } => f.debug_struct("Failed").field("cause", cause).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// What a listener wants after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerControl {
    Retain,
    Detach,
}

/// Receiver of controller events.
///
/// Implemented for any `Fn(&ServiceName, &ServiceEvent) -> ListenerControl`.
pub trait ServiceListener: Send + Sync {
    fn handle(&self, name: &ServiceName, event: &ServiceEvent) -> ListenerControl;
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceName, &ServiceEvent) -> ListenerControl + Send + Sync,
{
    fn handle(&self, name: &ServiceName, event: &ServiceEvent) -> ListenerControl {
        self(name, event)
    }
}

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Listener list owned by one controller.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn ServiceListener>)>,
}

impl ListenerSet {
    /// Delivers the synthetic `Added` event; the listener is kept only if it
    /// asks to be retained.
    pub(crate) fn add(
        &mut self,
        name: &ServiceName,
        listener: Arc<dyn ServiceListener>,
        added: &ServiceEvent,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        if listener.handle(name, added) == ListenerControl::Retain {
            self.entries.push((id, listener));
        }
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        before != self.entries.len()
    }

    /// Delivers `event` to every listener in registration order, dropping
    /// those that detach.
    pub(crate) fn dispatch(&mut self, name: &ServiceName, event: &ServiceEvent) {
        self.entries
            .retain(|(_, listener)| listener.handle(name, event) == ListenerControl::Retain);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn name() -> ServiceName {
        "test.service".parse().unwrap()
    }

    fn recorder(log: Arc<Mutex<Vec<&'static str>>>, detach_on: &'static str) -> Arc<dyn ServiceListener> {
        Arc::new(move |_: &ServiceName, event: &ServiceEvent| {
            log.lock().push(event.label());
            if event.label() == detach_on {
                ListenerControl::Detach
            } else {
                ListenerControl::Retain
            }
        })
    }

    #[test]
    fn added_event_is_delivered_on_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        set.add(
            &name(),
            recorder(log.clone(), "never"),
            &ServiceEvent::Added {
                state: State::Down,
                value: None,
            },
        );
        assert_eq!(*log.lock(), vec!["added"]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn detaching_on_added_does_not_retain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        set.add(
            &name(),
            recorder(log, "added"),
            &ServiceEvent::Added {
                state: State::Removed,
                value: None,
            },
        );
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn dispatch_preserves_order_and_drops_detached() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        let added = ServiceEvent::Added {
            state: State::Down,
            value: None,
        };
        set.add(&name(), recorder(log.clone(), "starting"), &added);
        set.dispatch(&name(), &ServiceEvent::Starting);
        set.dispatch(&name(), &ServiceEvent::Stopping);
        assert_eq!(*log.lock(), vec!["added", "starting"]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn remove_by_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        let added = ServiceEvent::Added {
            state: State::Down,
            value: None,
        };
        let id = set.add(&name(), recorder(log, "never"), &added);
        assert!(set.remove(id));
        assert!(!set.remove(id));
    }
}
