//! Operation handlers and the context they run in.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{ModelNode, Operation, PathAddress, ResourceDescription};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::OperationFailure;
use super::registration::ModelNodeRegistration;
use super::result::OperationOutcome;
use crate::service::ServiceRegistry;

/// Executes one operation against the model.
///
/// Handlers validate before touching the model and return the compensating
/// operation of every mutation they apply.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// # Errors
    ///
    /// Returns the failure to report; the executor restores the model.
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure>;
}

/// Everything a handler may touch while it runs: the model root (held
/// exclusively for the whole top-level operation), the handler registry and
/// the service container.
pub struct OperationContext<'a> {
    model: &'a mut ModelNode,
    address: PathAddress,
    registration: Arc<ModelNodeRegistration>,
    services: Arc<ServiceRegistry>,
    cancel: CancellationToken,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(
        model: &'a mut ModelNode,
        registration: Arc<ModelNodeRegistration>,
        services: Arc<ServiceRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            model,
            address: PathAddress::root(),
            registration,
            services,
            cancel,
        }
    }

    /// Address of the operation being executed.
    #[must_use]
    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    #[must_use]
    pub fn registration(&self) -> &Arc<ModelNodeRegistration> {
        &self.registration
    }

    /// Token cancelled when the controller shuts down; handlers that wait on
    /// services pass it along.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    // -- model access -------------------------------------------------------

    /// The whole model.
    #[must_use]
    pub fn model(&self) -> &ModelNode {
        self.model
    }

    /// The resource at the target address, `Undefined` when absent.
    #[must_use]
    pub fn read_resource(&self) -> &ModelNode {
        self.model.navigate(&self.address)
    }

    /// The resource at the target address.
    ///
    /// # Errors
    ///
    /// Fails with `MissingResource` when nothing exists there.
    pub fn require_resource(&self) -> Result<&ModelNode, OperationFailure> {
        let node = self.read_resource();
        if node.is_defined() {
            Ok(node)
        } else {
            Err(OperationFailure::MissingResource {
                address: self.address.clone(),
            })
        }
    }

    /// Mutable access to the existing resource at the target address.
    ///
    /// # Errors
    ///
    /// Fails with `MissingResource` when nothing exists there.
    pub fn resource_mut(&mut self) -> Result<&mut ModelNode, OperationFailure> {
        self.require_resource()?;
        Ok(self.model.navigate_mut(&self.address)?)
    }

    /// Creates the resource at the target address, defining the path to it.
    ///
    /// # Errors
    ///
    /// Fails when the resource already exists or a parent is not an object.
    pub fn create_resource(&mut self, resource: ModelNode) -> Result<(), OperationFailure> {
        if self.read_resource().is_defined() {
            return Err(OperationFailure::DuplicateResource {
                address: self.address.clone(),
            });
        }
        let slot = self.model.navigate_mut(&self.address)?;
        *slot = if resource.is_defined() {
            resource
        } else {
            ModelNode::new_object()
        };
        Ok(())
    }

    /// Removes the resource at the target address and returns it.
    ///
    /// # Errors
    ///
    /// Fails with `MissingResource` when nothing exists there.
    pub fn remove_resource(&mut self) -> Result<ModelNode, OperationFailure> {
        self.model
            .remove_at(&self.address)
            .ok_or_else(|| OperationFailure::MissingResource {
                address: self.address.clone(),
            })
    }

    /// Schema of the resource type at the target address.
    ///
    /// # Errors
    ///
    /// Fails with `NoHandler` when no registration covers the address.
    pub fn resource_description(&self) -> Result<ResourceDescription, OperationFailure> {
        self.registration
            .registration_at(&self.address)
            .map(|r| r.resource_description())
            .ok_or_else(|| OperationFailure::MissingResource {
                address: self.address.clone(),
            })
    }

    // -- dispatch -----------------------------------------------------------

    /// Executes `operation` against the same model, as one step of the
    /// current top-level operation.
    ///
    /// # Errors
    ///
    /// Fails with `NoHandler` when nothing is registered for the operation,
    /// `Cancelled` when the controller is shutting down, or with whatever
    /// the handler reports.
    pub async fn execute_step(
        &mut self,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        if self.cancel.is_cancelled() {
            return Err(OperationFailure::Cancelled);
        }
        let entry = self
            .registration
            .operation_entry(&operation.address, &operation.name)
            .ok_or_else(|| OperationFailure::NoHandler {
                operation: operation.name.clone(),
                address: operation.address.clone(),
            })?;
        debug!(op = %operation.name, address = %operation.address, "dispatching");

        let mut step = OperationContext {
            model: &mut *self.model,
            address: operation.address.clone(),
            registration: Arc::clone(&self.registration),
            services: Arc::clone(&self.services),
            cancel: self.cancel.clone(),
        };
        entry.handler.execute(&mut step, operation).await
    }
}
