//! The threads subsystem: thread factories and thread pool configuration.
//!
//! Registered beneath a profile registration as `subsystem=threads`. Thread
//! factories are backed by services; pool resources are configuration only.

pub mod description;
pub mod factory;
pub mod handlers;

use std::sync::Arc;

use keel_core::operation::names;
use keel_core::{PathElement, ResourceDescription};

use crate::management::resource::{add_description, remove_description};
use crate::management::{
    ModelAddOperationHandler, ModelNodeRegistration, ModelRemoveOperationHandler, OperationHandler,
    RegistrationError,
};

pub use factory::{ThreadFactory, ThreadFactoryService};
pub use handlers::{ThreadFactoryAdd, ThreadFactoryRemove};

pub const SUBSYSTEM: &str = "subsystem";
pub const THREADS: &str = "threads";
pub const THREAD_FACTORY: &str = "thread-factory";
pub const UNBOUNDED_QUEUE_THREAD_POOL: &str = "unbounded-queue-thread-pool";
pub const BOUNDED_QUEUE_THREAD_POOL: &str = "bounded-queue-thread-pool";
pub const QUEUELESS_THREAD_POOL: &str = "queueless-thread-pool";
pub const SCHEDULED_THREAD_POOL: &str = "scheduled-thread-pool";

/// Attribute names.
pub mod attr {
    pub const NAME: &str = "name";
    pub const GROUP_NAME: &str = "group-name";
    pub const THREAD_NAME_PATTERN: &str = "thread-name-pattern";
    pub const PRIORITY: &str = "priority";
    pub const PROPERTIES: &str = "properties";
    pub const THREAD_FACTORY: &str = "thread-factory";
    pub const MAX_THREADS_COUNT: &str = "max-threads-count";
    pub const MAX_THREADS_PER_CPU: &str = "max-threads-per-cpu";
    pub const CORE_THREADS_COUNT: &str = "core-threads-count";
    pub const CORE_THREADS_PER_CPU: &str = "core-threads-per-cpu";
    pub const QUEUE_LENGTH_COUNT: &str = "queue-length-count";
    pub const QUEUE_LENGTH_PER_CPU: &str = "queue-length-per-cpu";
    pub const KEEPALIVE_TIME_DURATION: &str = "keepalive-time-duration";
    pub const KEEPALIVE_TIME_UNIT: &str = "keepalive-time-unit";
    pub const BLOCKING: &str = "blocking";
    pub const ALLOW_CORE_TIMEOUT: &str = "allow-core-timeout";
    pub const HANDOFF_EXECUTOR: &str = "handoff-executor";
}

/// Registers `subsystem=threads` and its children beneath `profile`.
///
/// # Errors
///
/// Fails when the subsystem is already registered there.
pub fn register(profile: &ModelNodeRegistration) -> Result<Arc<ModelNodeRegistration>, RegistrationError> {
    let subsystem = register_resource(
        profile,
        PathElement::new(SUBSYSTEM, THREADS),
        description::subsystem(),
        None,
    )?;

    let factory_handlers: AddRemove = (
        Arc::new(ThreadFactoryAdd::new()),
        Arc::new(ThreadFactoryRemove::new()),
    );
    register_resource(
        &subsystem,
        PathElement::wildcard(THREAD_FACTORY),
        description::thread_factory(),
        Some(factory_handlers),
    )?;

    let pools = [
        (UNBOUNDED_QUEUE_THREAD_POOL, description::unbounded_queue_thread_pool()),
        (BOUNDED_QUEUE_THREAD_POOL, description::bounded_queue_thread_pool()),
        (QUEUELESS_THREAD_POOL, description::queueless_thread_pool()),
        (SCHEDULED_THREAD_POOL, description::scheduled_thread_pool()),
    ];
    for (kind, description) in pools {
        register_resource(&subsystem, PathElement::wildcard(kind), description, None)?;
    }
    Ok(subsystem)
}

type AddRemove = (Arc<dyn OperationHandler>, Arc<dyn OperationHandler>);

/// Registers a resource type with `add`/`remove`; the plain model handlers
/// unless `handlers` overrides them.
fn register_resource(
    parent: &ModelNodeRegistration,
    element: PathElement,
    description: ResourceDescription,
    handlers: Option<AddRemove>,
) -> Result<Arc<ModelNodeRegistration>, RegistrationError> {
    let (add, remove) = handlers.unwrap_or_else(|| {
        (
            Arc::new(ModelAddOperationHandler::for_resource(&description)) as Arc<dyn OperationHandler>,
            Arc::new(ModelRemoveOperationHandler::new()) as Arc<dyn OperationHandler>,
        )
    });
    let registration = parent.register_sub_model(element, Arc::new(description.clone()))?;
    registration.register_operation_handler(names::ADD, add, Arc::new(add_description(&description)), false)?;
    registration.register_operation_handler(
        names::REMOVE,
        remove,
        Arc::new(remove_description(&description)),
        false,
    )?;
    Ok(registration)
}

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use keel_core::{ModelNode, ModelType, PathAddress};

    use super::*;

    fn registered() -> Arc<ModelNodeRegistration> {
        let root = ModelNodeRegistration::root(Arc::new(ResourceDescription::new("root")));
        let profile = root
            .register_sub_model(
                PathElement::wildcard("profile"),
                Arc::new(ResourceDescription::new("A named set of subsystem configs").child(
                    SUBSYSTEM,
                    "The subsystems that make up the profile",
                    1,
                )),
            )
            .unwrap();
        register(&profile).unwrap();
        root
    }

    fn attribute_type(description: &ModelNode, child: &str, attribute: &str) -> ModelNode {
        description
            .get_path(&["children", child, "model-description", "*", "attributes", attribute, "type"])
            .clone()
    }

    #[test]
    fn subsystem_description_lists_all_resource_types() {
        let root = registered();
        let threads = root
            .registration_at(&PathAddress::from_pairs(&[("profile", "test"), (SUBSYSTEM, THREADS)]))
            .unwrap();
        let description = threads.describe(true, false, &IndexMap::new());

        assert_eq!(attribute_type(&description, THREAD_FACTORY, attr::PRIORITY), ModelNode::Type(ModelType::Int));
        assert_eq!(attribute_type(&description, THREAD_FACTORY, attr::PROPERTIES), ModelNode::Type(ModelType::List));
        assert_eq!(
            attribute_type(&description, BOUNDED_QUEUE_THREAD_POOL, attr::QUEUE_LENGTH_PER_CPU),
            ModelNode::Type(ModelType::BigDecimal)
        );
        assert_eq!(
            attribute_type(&description, QUEUELESS_THREAD_POOL, attr::HANDOFF_EXECUTOR),
            ModelNode::Type(ModelType::String)
        );
        assert_eq!(
            attribute_type(&description, SCHEDULED_THREAD_POOL, attr::KEEPALIVE_TIME_DURATION),
            ModelNode::Type(ModelType::Long)
        );
        assert_eq!(
            attribute_type(&description, UNBOUNDED_QUEUE_THREAD_POOL, attr::MAX_THREADS_COUNT),
            ModelNode::Type(ModelType::BigDecimal)
        );
    }

    #[test]
    fn every_resource_type_has_add_and_remove() {
        let root = registered();
        for kind in [THREAD_FACTORY, UNBOUNDED_QUEUE_THREAD_POOL, SCHEDULED_THREAD_POOL] {
            let address = PathAddress::from_pairs(&[("profile", "p"), (SUBSYSTEM, THREADS), (kind, "x")]);
            assert!(root.operation_entry(&address, names::ADD).is_some(), "{kind} add");
            assert!(root.operation_entry(&address, names::REMOVE).is_some(), "{kind} remove");
        }
    }

    #[test]
    fn registering_twice_fails() {
        let root = registered();
        let profile = root
            .registration_at(&PathAddress::from_pairs(&[("profile", "p")]))
            .unwrap();
        assert!(matches!(register(&profile), Err(RegistrationError::DuplicateChild { .. })));
    }
}
