use crate::types::ModelType;

/// Errors raised while reading or shaping model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("no such element: {key}")]
    NoSuchElement { key: String },
    #[error("expected an OBJECT but found {found}")]
    NotAnObject { found: ModelType },
    #[error("expected a LIST but found {found}")]
    NotAList { found: ModelType },
    #[error("invalid address: {input}")]
    InvalidAddress { input: String },
    #[error("invalid service name: {input}")]
    InvalidServiceName { input: String },
    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },
}
