//! Generic `add` and `remove` handlers for plain attribute resources.
//!
//! Subsystems with side effects beyond the model (installing services, for
//! example) wrap these and call [`ModelAddOperationHandler::apply`] /
//! [`ModelRemoveOperationHandler::apply`] for the model half.

use async_trait::async_trait;
use indexmap::IndexMap;
use keel_core::operation::names;
use keel_core::{ModelNode, Operation, OperationDescription, ResourceDescription};

use super::error::OperationFailure;
use super::handler::{OperationContext, OperationHandler};
use super::result::OperationOutcome;

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

/// Creates a resource whose attributes are the operation's parameters.
#[derive(Debug, Clone)]
pub struct ModelAddOperationHandler {
    description: OperationDescription,
}

impl ModelAddOperationHandler {
    #[must_use]
    pub fn new(description: OperationDescription) -> Self {
        Self { description }
    }

    /// Handler whose parameters are exactly the resource's attributes.
    #[must_use]
    pub fn for_resource(resource: &ResourceDescription) -> Self {
        Self::new(add_description(resource))
    }

    #[must_use]
    pub fn description(&self) -> &OperationDescription {
        &self.description
    }

    /// Validates, writes the resource and returns the `remove` that undoes it.
    ///
    /// # Errors
    ///
    /// Fails before any mutation on invalid parameters, an existing resource
    /// or a missing parent.
    pub fn apply(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        if let Err(errors) = self.description.validate(&operation.params).into_result() {
            return Err(OperationFailure::Validation {
                operation: operation.name.clone(),
                errors,
            });
        }
        if ctx.read_resource().is_defined() {
            return Err(OperationFailure::DuplicateResource {
                address: operation.address.clone(),
            });
        }
        let parent = operation.address.parent();
        if !parent.is_empty() && !ctx.model().navigate(&parent).is_defined() {
            return Err(OperationFailure::MissingResource { address: parent });
        }

        let attributes = self.description.coerce(&operation.params);
        ctx.create_resource(ModelNode::Object(attributes))?;
        Ok(OperationOutcome::mutated(Operation::new(
            names::REMOVE,
            operation.address.clone(),
        )))
    }
}

#[async_trait]
impl OperationHandler for ModelAddOperationHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        self.apply(ctx, operation)
    }
}

/// Description of the `add` operation for `resource`.
#[must_use]
pub fn add_description(resource: &ResourceDescription) -> OperationDescription {
    OperationDescription::from_attributes(
        names::ADD,
        format!("Add a new {}", resource.description.to_lowercase()),
        &resource.attributes,
    )
}

// ---------------------------------------------------------------------------
// remove
// ---------------------------------------------------------------------------

/// Removes a resource that has no children.
#[derive(Debug, Clone, Default)]
pub struct ModelRemoveOperationHandler;

impl ModelRemoveOperationHandler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Removes the resource and returns the `add` that recreates it with the
    /// exact attribute set it had.
    ///
    /// # Errors
    ///
    /// Fails before any mutation when the resource is missing or still has
    /// children.
    pub fn apply(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let resource = ctx.require_resource()?;
        let child_types = ctx
            .resource_description()
            .map(|d| d.children.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        let children: Vec<String> = child_types
            .iter()
            .filter(|t| resource.get(t).keys().next().is_some())
            .cloned()
            .collect();
        if !children.is_empty() {
            return Err(OperationFailure::HasChildren {
                address: operation.address.clone(),
                children,
            });
        }

        let attributes: IndexMap<String, ModelNode> = resource
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, v)| v.is_defined() && !child_types.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        ctx.remove_resource()?;
        let mut compensating = Operation::new(names::ADD, operation.address.clone());
        compensating.params = attributes;
        Ok(OperationOutcome::mutated(compensating))
    }
}

#[async_trait]
impl OperationHandler for ModelRemoveOperationHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        self.apply(ctx, operation)
    }
}

/// Description of the `remove` operation.
#[must_use]
pub fn remove_description(resource: &ResourceDescription) -> OperationDescription {
    OperationDescription::new(
        names::REMOVE,
        format!("Remove a {}", resource.description.to_lowercase()),
    )
}
