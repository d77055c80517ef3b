//! Transactional management model.
//!
//! Operations are dispatched through a registry of handlers shaped like the
//! model tree ([`ModelNodeRegistration`]) and executed one at a time by the
//! [`ModelController`]. Every mutating operation reports the operation that
//! undoes it; `composite` uses those to roll back a failed batch.

pub mod error;
pub mod executor;
pub mod global;
pub mod handler;
pub mod persister;
pub mod registration;
pub mod resource;
pub mod result;

pub use error::{OperationFailure, RegistrationError};
pub use executor::ModelController;
pub use handler::{OperationContext, OperationHandler};
pub use persister::{
    ConfigurationPersister, InMemoryConfigurationPersister, NullConfigurationPersister,
};
pub use registration::{
    DescriptionProvider, ModelNodeRegistration, OperationDescriptionProvider, OperationEntry,
};
pub use resource::{ModelAddOperationHandler, ModelRemoveOperationHandler};
pub use result::{CollectingResultHandler, OperationOutcome, ResultHandler};
