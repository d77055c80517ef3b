//! Service container.
//!
//! This module implements the dependency-ordered service lifecycle:
//!
//! 1. **Registry** (`registry`): named controllers, the dependents index and
//!    the transition executor
//! 2. **Controllers** (`controller`): per-service state machines
//! 3. **Listeners** (`listener`): ordered, synchronous transition events
//! 4. **Injection** (`inject`): dependency values handed to starting services
//! 5. **Resolution** (`resolve`): waiting for a service value, async or blocking
//! 6. **Background worker** (`worker`): the single-task step queue

pub mod builder;
pub mod controller;
pub mod error;
pub mod inject;
pub mod listener;
pub mod registry;
pub mod resolve;
mod tracker;
pub mod value;
pub mod worker;

// Re-export key types for convenient access.
pub use builder::ServiceBuilder;
pub use controller::{ControllerHandle, Mode, Service, ServiceValue, StartContext, State};
pub use error::{ResolveError, ServiceError, StartError};
pub use inject::{InjectedValue, Injector};
pub use listener::{ListenerControl, ListenerId, ServiceEvent, ServiceListener};
pub use registry::ServiceRegistry;
pub use value::ValueService;
pub use worker::{BackgroundRunnable, BackgroundWorker};
