//! Operations every resource supports, registered `inherited` on the root.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use keel_core::operation::{names, params};
use keel_core::{AttributeDescription, ModelNode, ModelType, Operation, OperationDescription};
use tracing::warn;

use super::error::{OperationFailure, RegistrationError};
use super::handler::{OperationContext, OperationHandler};
use super::registration::ModelNodeRegistration;
use super::result::OperationOutcome;

/// Registers the global operations on `root`.
///
/// # Errors
///
/// Fails if any of them is already registered there.
pub fn register_global_operations(root: &ModelNodeRegistration) -> Result<(), RegistrationError> {
    let handlers: [(Arc<dyn OperationHandler>, OperationDescription); 8] = [
        (Arc::new(ReadResourceDescriptionHandler), read_resource_description()),
        (Arc::new(ReadResourceHandler), read_resource()),
        (Arc::new(ReadAttributeHandler), read_attribute()),
        (Arc::new(WriteAttributeHandler), write_attribute()),
        (Arc::new(UndefineAttributeHandler), undefine_attribute()),
        (Arc::new(ReadChildrenNamesHandler), read_children_names()),
        (Arc::new(ReadOperationNamesHandler), read_operation_names()),
        (Arc::new(CompositeHandler), composite()),
    ];
    for (handler, description) in handlers {
        let name = description.name.clone();
        root.register_operation_handler(&name, handler, Arc::new(description), true)?;
    }
    Ok(())
}

fn required_str<'o>(operation: &'o Operation, key: &str) -> Result<&'o str, OperationFailure> {
    operation
        .param(key)
        .as_str()
        .ok_or_else(|| OperationFailure::invalid(&operation.name, format!("'{key}' is required")))
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

fn flag(description: &str) -> AttributeDescription {
    AttributeDescription::new(ModelType::Boolean, description)
}

fn attribute_name() -> AttributeDescription {
    AttributeDescription::new(ModelType::String, "Name of the attribute").required()
}

fn read_resource_description() -> OperationDescription {
    OperationDescription::new(
        names::READ_RESOURCE_DESCRIPTION,
        "Describe the resource type at this address",
    )
    .param(params::RECURSIVE, flag("Include the descriptions of child types"))
    .param(params::OPERATIONS, flag("Include operation descriptions"))
    .param(params::INHERITED, flag("Include operations inherited from ancestors"))
}

fn read_resource() -> OperationDescription {
    OperationDescription::new(names::READ_RESOURCE, "Read the attributes and children of a resource")
        .param(params::RECURSIVE, flag("Include the contents of child resources"))
}

fn read_attribute() -> OperationDescription {
    OperationDescription::new(names::READ_ATTRIBUTE, "Read the value of an attribute")
        .param(params::NAME, attribute_name())
}

fn write_attribute() -> OperationDescription {
    OperationDescription::new(names::WRITE_ATTRIBUTE, "Write the value of an attribute")
        .param(params::NAME, attribute_name())
        .param(params::VALUE, AttributeDescription::untyped("The new value"))
}

fn undefine_attribute() -> OperationDescription {
    OperationDescription::new(names::UNDEFINE_ATTRIBUTE, "Clear the value of an attribute")
        .param(params::NAME, attribute_name())
}

fn read_children_names() -> OperationDescription {
    OperationDescription::new(names::READ_CHILDREN_NAMES, "List the names of children of one type")
        .param(
            params::CHILD_TYPE,
            AttributeDescription::new(ModelType::String, "The child type").required(),
        )
        .reply(AttributeDescription::new(ModelType::List, "Child names").value_type(ModelType::String))
}

fn read_operation_names() -> OperationDescription {
    OperationDescription::new(names::READ_OPERATION_NAMES, "List the operations available here")
        .reply(AttributeDescription::new(ModelType::List, "Operation names").value_type(ModelType::String))
}

fn composite() -> OperationDescription {
    OperationDescription::new(names::COMPOSITE, "Apply several operations as one unit")
        .param(
            params::STEPS,
            AttributeDescription::new(ModelType::List, "The operations to apply, in order")
                .required()
                .value_type(ModelType::Object),
        )
}

// ---------------------------------------------------------------------------
// Read handlers
// ---------------------------------------------------------------------------

pub struct ReadResourceDescriptionHandler;

#[async_trait]
impl OperationHandler for ReadResourceDescriptionHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let recursive = operation.flag(params::RECURSIVE, false);
        let operations = operation.flag(params::OPERATIONS, false);
        let inherited = operation.flag(params::INHERITED, true);

        let root = ctx.registration();
        let target = root
            .registration_at(ctx.address())
            .ok_or_else(|| OperationFailure::MissingResource {
                address: ctx.address().clone(),
            })?;

        let mut from_ancestors = IndexMap::new();
        if operations && inherited {
            let own = root.operations_at(ctx.address(), false);
            from_ancestors = root.operations_at(ctx.address(), true);
            from_ancestors.retain(|name, _| !own.contains_key(name));
        }
        Ok(OperationOutcome::read(target.describe(recursive, operations, &from_ancestors)))
    }
}

pub struct ReadResourceHandler;

#[async_trait]
impl OperationHandler for ReadResourceHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let mut resource = if ctx.address().is_empty() {
            ctx.model().clone()
        } else {
            ctx.require_resource()?.clone()
        };
        if !operation.flag(params::RECURSIVE, false) {
            let child_types = ctx
                .registration()
                .registration_at(ctx.address())
                .map(|r| r.child_types())
                .unwrap_or_default();
            for child_type in child_types {
                if let ModelNode::Object(children) = resource.get_mut(&child_type)? {
                    for child in children.values_mut() {
                        *child = ModelNode::Undefined;
                    }
                }
            }
            // `get_mut` defines missing child types; drop the empty ones again.
            if let ModelNode::Object(map) = &mut resource {
                map.retain(|_, v| v.is_defined());
            }
        }
        Ok(OperationOutcome::read(resource))
    }
}

pub struct ReadAttributeHandler;

#[async_trait]
impl OperationHandler for ReadAttributeHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let name = required_str(operation, params::NAME)?;
        let resource = ctx.require_resource()?;
        if let Ok(description) = ctx.resource_description() {
            if !description.attributes.contains_key(name) {
                return Err(OperationFailure::invalid(
                    &operation.name,
                    format!("unknown attribute '{name}'"),
                ));
            }
        }
        Ok(OperationOutcome::read(resource.get(name).clone()))
    }
}

pub struct ReadChildrenNamesHandler;

#[async_trait]
impl OperationHandler for ReadChildrenNamesHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let child_type = required_str(operation, params::CHILD_TYPE)?;
        let resource = if ctx.address().is_empty() {
            ctx.model()
        } else {
            ctx.require_resource()?
        };
        let names = resource
            .get(child_type)
            .keys()
            .map(ModelNode::from)
            .collect::<Vec<_>>();
        Ok(OperationOutcome::read(ModelNode::List(names)))
    }
}

pub struct ReadOperationNamesHandler;

#[async_trait]
impl OperationHandler for ReadOperationNamesHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        _operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let names = ctx
            .registration()
            .operations_at(ctx.address(), true)
            .into_keys()
            .map(ModelNode::from)
            .collect::<Vec<_>>();
        Ok(OperationOutcome::read(ModelNode::List(names)))
    }
}

// ---------------------------------------------------------------------------
// Attribute writes
// ---------------------------------------------------------------------------

pub struct WriteAttributeHandler;

#[async_trait]
impl OperationHandler for WriteAttributeHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let name = required_str(operation, params::NAME)?;
        let value = operation.param(params::VALUE);
        let description = ctx.resource_description()?;
        if let Err(errors) = description.validate_attribute(name, value).into_result() {
            return Err(OperationFailure::Validation {
                operation: operation.name.clone(),
                errors,
            });
        }
        let coerced = description
            .attributes
            .get(name)
            .map_or_else(|| value.clone(), |a| a.coerce(value));

        let resource = ctx.resource_mut()?;
        let previous = if coerced.is_defined() {
            resource.insert(name, coerced)?
        } else {
            resource.remove(name)
        };
        Ok(OperationOutcome::mutated(restore_attribute(operation, name, previous)))
    }
}

pub struct UndefineAttributeHandler;

#[async_trait]
impl OperationHandler for UndefineAttributeHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let name = required_str(operation, params::NAME)?;
        let description = ctx.resource_description()?;
        if let Some(attribute) = description.attributes.get(name) {
            if attribute.required {
                return Err(OperationFailure::invalid(
                    &operation.name,
                    format!("'{name}' is required"),
                ));
            }
        } else {
            return Err(OperationFailure::invalid(
                &operation.name,
                format!("unknown attribute '{name}'"),
            ));
        }
        let previous = ctx.resource_mut()?.remove(name);
        Ok(OperationOutcome::mutated(restore_attribute(operation, name, previous)))
    }
}

/// The operation that puts `previous` back as the value of `name`.
fn restore_attribute(operation: &Operation, name: &str, previous: Option<ModelNode>) -> Operation {
    match previous.filter(ModelNode::is_defined) {
        Some(previous) => Operation::new(names::WRITE_ATTRIBUTE, operation.address.clone())
            .with_param(params::NAME, name)
            .with_param(params::VALUE, previous),
        None => Operation::new(names::UNDEFINE_ATTRIBUTE, operation.address.clone())
            .with_param(params::NAME, name),
    }
}

// ---------------------------------------------------------------------------
// composite
// ---------------------------------------------------------------------------

/// Applies `steps` in order; a failing step rolls back the steps before it
/// in reverse order through their compensating operations.
pub struct CompositeHandler;

#[async_trait]
impl OperationHandler for CompositeHandler {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let steps = operation
            .param(params::STEPS)
            .as_list()
            .ok_or_else(|| OperationFailure::invalid(names::COMPOSITE, "'steps' must be a list"))?
            .iter()
            .map(Operation::from_model_node)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OperationFailure::invalid(names::COMPOSITE, e.to_string()))?;

        let mut results = ModelNode::new_object();
        let mut applied: Vec<Operation> = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            match ctx.execute_step(step).await {
                Ok(outcome) => {
                    results.insert(&format!("step-{}", index + 1), outcome.result)?;
                    applied.extend(outcome.compensating);
                }
                Err(cause) => {
                    rollback(ctx, &applied).await;
                    return Err(OperationFailure::Composite {
                        step: index + 1,
                        cause: Box::new(cause),
                    });
                }
            }
        }

        let compensating = (!applied.is_empty()).then(|| {
            applied.reverse();
            Operation::composite(applied)
        });
        Ok(OperationOutcome {
            result: results,
            compensating,
        })
    }
}

async fn rollback(ctx: &mut OperationContext<'_>, applied: &[Operation]) {
    for compensation in applied.iter().rev() {
        if let Err(e) = ctx.execute_step(compensation).await {
            warn!(op = %compensation, error = %e, "compensating step failed during rollback");
        }
    }
}
