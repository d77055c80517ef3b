//! Operation results and result callbacks.

use keel_core::{ModelNode, Operation};

use super::error::OperationFailure;

/// Successful outcome of an operation: its result and, for mutations, the
/// operation that undoes it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationOutcome {
    pub result: ModelNode,
    pub compensating: Option<Operation>,
}

impl OperationOutcome {
    /// Outcome of a read-only operation.
    #[must_use]
    pub fn read(result: ModelNode) -> Self {
        Self {
            result,
            compensating: None,
        }
    }

    /// Outcome of a mutation with no result value.
    #[must_use]
    pub fn mutated(compensating: Operation) -> Self {
        Self {
            result: ModelNode::Undefined,
            compensating: Some(compensating),
        }
    }

    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.compensating.is_some()
    }
}

/// Callback interface for operation results.
///
/// Exactly one of `handle_result_complete`, `handle_failed` or
/// `handle_cancellation` is called per operation, after any fragments.
pub trait ResultHandler: Send {
    /// A piece of the result, at `location` within the result tree.
    fn handle_result_fragment(&mut self, location: &[String], fragment: &ModelNode);

    fn handle_result_complete(&mut self, compensating: Option<&Operation>);

    fn handle_failed(&mut self, failure_description: &ModelNode);

    fn handle_cancellation(&mut self) {}
}

/// Delivers an execution result to `handler`.
pub(crate) fn deliver(
    handler: &mut dyn ResultHandler,
    result: &Result<OperationOutcome, OperationFailure>,
) {
    match result {
        Ok(outcome) => {
            if outcome.result.is_defined() {
                handler.handle_result_fragment(&[], &outcome.result);
            }
            handler.handle_result_complete(outcome.compensating.as_ref());
        }
        Err(OperationFailure::Cancelled) => handler.handle_cancellation(),
        Err(failure) => handler.handle_failed(&failure.failure_description()),
    }
}

/// Result handler that keeps everything it receives.
#[derive(Debug, Default, Clone)]
pub struct CollectingResultHandler {
    pub result: ModelNode,
    pub compensating: Option<Operation>,
    pub failure: Option<ModelNode>,
    pub cancelled: bool,
    pub completed: bool,
}

impl CollectingResultHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the initial state so the handler can be reused.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl ResultHandler for CollectingResultHandler {
    fn handle_result_fragment(&mut self, location: &[String], fragment: &ModelNode) {
        if location.is_empty() {
            self.result = fragment.clone();
            return;
        }
        let mut node = &mut self.result;
        for key in location {
            // Fragments always target object paths.
            match node.get_mut(key) {
                Ok(child) => node = child,
                Err(_) => return,
            }
        }
        *node = fragment.clone();
    }

    fn handle_result_complete(&mut self, compensating: Option<&Operation>) {
        self.compensating = compensating.cloned();
        self.completed = true;
    }

    fn handle_failed(&mut self, failure_description: &ModelNode) {
        self.failure = Some(failure_description.clone());
    }

    fn handle_cancellation(&mut self) {
        self.cancelled = true;
    }
}
