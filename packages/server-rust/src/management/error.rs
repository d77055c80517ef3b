//! Errors for model operations and handler registration.

use keel_core::{ModelError, ModelNode, PathAddress, PathElement, ServiceName};

/// Why an operation did not complete.
///
/// Every failure can be rendered as a structured failure description with
/// [`OperationFailure::failure_description`].
#[derive(Debug, thiserror::Error)]
pub enum OperationFailure {
    #[error("no handler registered for operation {operation} at address {address}")]
    NoHandler {
        operation: String,
        address: PathAddress,
    },
    #[error("invalid request for {operation}: {}", errors.join("; "))]
    Validation {
        operation: String,
        errors: Vec<String>,
    },
    #[error("resource {address} does not exist")]
    MissingResource { address: PathAddress },
    #[error("resource {address} already exists")]
    DuplicateResource { address: PathAddress },
    #[error("resource {address} has children {children:?} and cannot be removed")]
    HasChildren {
        address: PathAddress,
        children: Vec<String>,
    },
    #[error("service {name} failed: {reason}")]
    ServiceFailure { name: ServiceName, reason: String },
    #[error("step {step} failed: {cause}")]
    Composite {
        step: usize,
        cause: Box<OperationFailure>,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl OperationFailure {
    /// Convenience constructor for a single validation error.
    #[must_use]
    pub fn invalid(operation: &str, error: impl Into<String>) -> Self {
        Self::Validation {
            operation: operation.to_string(),
            errors: vec![error.into()],
        }
    }

    /// Structured form of the failure, as delivered to result handlers.
    ///
    /// Composite failures nest the failing step's description under
    /// `failed-step` and `cause`; everything else is a plain string.
    #[must_use]
    pub fn failure_description(&self) -> ModelNode {
        match self {
            Self::Composite { step, cause } => ModelNode::new_object()
                .with("failed-step", i64::try_from(*step).unwrap_or(i64::MAX))
                .with("cause", cause.failure_description()),
            other => ModelNode::from(other.to_string()),
        }
    }

    /// The innermost failure, unwrapping composite steps.
    #[must_use]
    pub fn root_cause(&self) -> &OperationFailure {
        match self {
            Self::Composite { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Conflicting registrations in the handler tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("a sub-model for {element} is already registered")]
    DuplicateChild { element: PathElement },
    #[error("operation {name} is already registered at {element}")]
    DuplicateOperation { name: String, element: String },
}
