//! Error types for the service container.

use std::sync::Arc;

use keel_core::ServiceName;

/// Errors reported synchronously to a caller registering or looking up services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service {name} is already registered")]
    Duplicate { name: ServiceName },
    #[error("service {name} depends on {dependency}, which is not registered")]
    MissingDependency {
        name: ServiceName,
        dependency: ServiceName,
    },
    #[error("service {name} not found")]
    NotFound { name: ServiceName },
}

/// Failure cause recorded when a start hook errors or panics.
///
/// Cheap to clone so it can be handed to every listener.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to start service {name}: {cause}")]
pub struct StartError {
    pub name: ServiceName,
    pub cause: Arc<anyhow::Error>,
}

impl StartError {
    #[must_use]
    pub fn new(name: ServiceName, cause: anyhow::Error) -> Self {
        Self {
            name,
            cause: Arc::new(cause),
        }
    }
}

/// Errors seen by a caller waiting for a service value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("could not resolve service {name}: not found")]
    NotFound { name: ServiceName },
    #[error("could not resolve service {name}: service was removed")]
    Removed { name: ServiceName },
    #[error("could not resolve service {name}: start failed: {cause}")]
    StartFailed { name: ServiceName, cause: StartError },
    #[error("interrupted while resolving service {name}")]
    Cancelled { name: ServiceName },
    #[error("timed out resolving service {name}")]
    Timeout { name: ServiceName },
    #[error("service {name} has a value of an unexpected type")]
    WrongType { name: ServiceName },
}

impl ResolveError {
    /// Name of the service the failed resolution was for.
    #[must_use]
    pub fn name(&self) -> &ServiceName {
        match self {
            Self::NotFound { name }
            | Self::Removed { name }
            | Self::StartFailed { name, .. }
            | Self::Cancelled { name }
            | Self::Timeout { name }
            | Self::WrongType { name } => name,
        }
    }
}
