//! `add`/`remove` for thread factories: the model change plus the
//! `jboss.thread.factory.<name>` service.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Operation, ServiceName};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::description;
use super::factory::{service_name, ThreadFactory, ThreadFactoryService};
use crate::management::{
    ModelAddOperationHandler, ModelRemoveOperationHandler, OperationContext, OperationFailure,
    OperationHandler, OperationOutcome,
};
use crate::service::{ControllerHandle, Mode, ServiceRegistry};

fn factory_service(operation: &Operation) -> Result<(String, ServiceName), OperationFailure> {
    let name = operation
        .address
        .last()
        .map(|e| e.value.clone())
        .ok_or_else(|| OperationFailure::invalid(&operation.name, "thread factory address is empty"))?;
    let service = service_name(&name)?;
    Ok((name, service))
}

/// Adds the resource, installs the factory service and completes once the
/// service is UP. A service that fails to start undoes the model change.
pub struct ThreadFactoryAdd {
    model: ModelAddOperationHandler,
}

impl ThreadFactoryAdd {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: ModelAddOperationHandler::for_resource(&description::thread_factory()),
        }
    }
}

impl Default for ThreadFactoryAdd {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationHandler for ThreadFactoryAdd {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let (name, service) = factory_service(operation)?;
        let outcome = self.model.apply(ctx, operation)?;
        let timeout = ctx.services().config().resolve_timeout;

        // A factory of the same name that is still going away holds the name.
        if let Some(previous) = ctx.services().get(&service).filter(|h| h.mode() == Mode::Remove) {
            if let Err(e) = previous.await_removal(ctx.cancellation(), timeout).await {
                ctx.remove_resource()?;
                return Err(service_failure(service, &e));
            }
        }

        let factory = ThreadFactory::from_model(&name, ctx.read_resource());
        let installed = ctx
            .services()
            .add_service(service.clone(), Arc::new(ThreadFactoryService::new(factory)))
            .install();
        let handle = match installed {
            Ok(handle) => handle,
            Err(e) => {
                ctx.remove_resource()?;
                return Err(service_failure(service, &e));
            }
        };

        if let Err(e) = handle.await_up(ctx.cancellation(), timeout).await {
            warn!(service = %service, error = %e, "thread factory did not start, rolling back");
            handle.set_mode(Mode::Remove);
            if let Err(removal) = handle.await_removal(ctx.cancellation(), timeout).await {
                warn!(service = %service, error = %removal, "failed thread factory not yet removed");
            }
            ctx.remove_resource()?;
            return Err(service_failure(service, &e));
        }
        debug!(service = %service, "thread factory added");
        Ok(outcome)
    }
}

/// Removes the resource and its service, completing once the service is
/// REMOVED.
#[derive(Default)]
pub struct ThreadFactoryRemove {
    model: ModelRemoveOperationHandler,
}

impl ThreadFactoryRemove {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationHandler for ThreadFactoryRemove {
    async fn execute(
        &self,
        ctx: &mut OperationContext<'_>,
        operation: &Operation,
    ) -> Result<OperationOutcome, OperationFailure> {
        let (name, service) = factory_service(operation)?;
        let factory = ThreadFactory::from_model(&name, ctx.read_resource());
        let outcome = self.model.apply(ctx, operation)?;

        let Some(handle) = ctx.services().get(&service) else {
            return Ok(outcome);
        };
        handle.set_mode(Mode::Remove);
        let timeout = ctx.services().config().resolve_timeout;
        if let Err(e) = handle.await_removal(ctx.cancellation(), timeout).await {
            warn!(service = %service, error = %e, "thread factory removal interrupted");
            reinstall_after_removal(Arc::clone(ctx.services()), handle, factory);
            return Err(service_failure(service, &e));
        }
        Ok(outcome)
    }
}

/// A failed remove leaves the resource in the model, but `Remove` cannot be
/// taken back: once the old service is gone, install a replacement.
fn reinstall_after_removal(services: Arc<ServiceRegistry>, previous: ControllerHandle, factory: ThreadFactory) {
    tokio::spawn(async move {
        if previous.await_removal(&CancellationToken::new(), None).await.is_err() {
            return;
        }
        let name = previous.name().clone();
        match services
            .add_service(name.clone(), Arc::new(ThreadFactoryService::new(factory)))
            .install()
        {
            Ok(_) => info!(service = %name, "thread factory reinstalled"),
            Err(e) => warn!(service = %name, error = %e, "thread factory could not be reinstalled"),
        }
    });
}

fn service_failure(name: ServiceName, cause: &dyn std::fmt::Display) -> OperationFailure {
    OperationFailure::ServiceFailure {
        name,
        reason: cause.to_string(),
    }
}
