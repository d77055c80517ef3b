//! Threads subsystem driven through the model controller: operations, the
//! resulting model and the factory services behind it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::operation::names;
use keel_core::{
    ModelNode, ModelType, Operation, PathAddress, PathElement, ResourceDescription, ServiceName,
};

use super::*;
use crate::config::KernelConfig;
use crate::management::{ModelController, OperationFailure};
use crate::service::{Mode, Service, ServiceRegistry, ServiceValue, StartContext, State};

const PROFILE: &str = "test";

fn controller() -> ModelController {
    controller_with(KernelConfig::default())
}

fn controller_with(config: KernelConfig) -> ModelController {
    let services = ServiceRegistry::new(config);
    let controller = ModelController::with_root(
        services,
        Arc::new(ResourceDescription::new("root").child("profile", "Profiles", 0)),
    )
    .unwrap();
    let profile = controller
        .registration()
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
    controller.with_model(
        ModelNode::new_object().with("profile", ModelNode::new_object().with(PROFILE, ModelNode::new_object())),
    )
}

fn threads_address() -> PathAddress {
    PathAddress::from_pairs(&[("profile", PROFILE), (SUBSYSTEM, THREADS)])
}

fn factory_address(name: &str) -> PathAddress {
    threads_address().append(PathElement::new(THREAD_FACTORY, name))
}

async fn with_subsystem() -> ModelController {
    subsystem_in(controller()).await
}

async fn subsystem_in(controller: ModelController) -> ModelController {
    controller
        .execute(&Operation::new(names::ADD, threads_address()))
        .await
        .unwrap();
    controller
}

fn add_factory(name: &str) -> Operation {
    Operation::new(names::ADD, factory_address(name)).with_param(attr::NAME, name)
}

#[tokio::test]
async fn subsystem_add_creates_empty_resource() {
    let controller = with_subsystem().await;
    let model = controller.read_model().await;
    assert_eq!(model.navigate(&threads_address()), &ModelNode::new_object());
}

#[tokio::test]
async fn minimal_factory_add() {
    let controller = with_subsystem().await;
    controller.execute(&add_factory("test-factory")).await.unwrap();

    let factory = controller.read_model().await.navigate(&factory_address("test-factory")).clone();
    assert_eq!(factory.get(attr::NAME).as_str(), Some("test-factory"));
    assert!(!factory.get(attr::PRIORITY).is_defined());
}

#[tokio::test]
async fn out_of_range_priority_is_rejected() {
    let controller = with_subsystem().await;
    let before = controller.read_model().await;
    let op = add_factory("test-factory").with_param(attr::PRIORITY, 12);

    let failure = controller.execute(&op).await.unwrap_err();
    assert!(matches!(failure, OperationFailure::Validation { .. }));
    assert_eq!(controller.read_model().await, before);
    let service = factory::service_name("test-factory").unwrap();
    assert!(controller.services().get(&service).is_none());
}

#[tokio::test]
async fn full_factory_add() {
    let controller = with_subsystem().await;
    let properties = ModelNode::List(vec![
        ModelNode::new_object().with("propA", "valueA"),
        ModelNode::new_object().with("propB", "valueB"),
    ]);
    let op = add_factory("test-factory")
        .with_param(attr::GROUP_NAME, "test-group")
        .with_param(attr::THREAD_NAME_PATTERN, "%f-%g-%t")
        .with_param(attr::PRIORITY, 5)
        .with_param(attr::PROPERTIES, properties);
    controller.execute(&op).await.unwrap();

    let model = controller.read_model().await;
    let resource = model.navigate(&factory_address("test-factory"));
    assert_eq!(resource.get(attr::GROUP_NAME).as_str(), Some("test-group"));
    assert_eq!(resource.get(attr::PRIORITY), &ModelNode::Int(5));
    assert_eq!(resource.get(attr::PROPERTIES).as_list().map(<[ModelNode]>::len), Some(2));

    let handle = controller
        .services()
        .get(&factory::service_name("test-factory").unwrap())
        .unwrap();
    let factory = handle.value_as::<ThreadFactory>().unwrap();
    assert_eq!(factory.thread_name(3), "test-factory-test-group-3");
    assert_eq!(factory.properties().get("propB").map(String::as_str), Some("valueB"));
}

#[tokio::test]
async fn factory_service_follows_resource() {
    let controller = with_subsystem().await;
    let service = factory::service_name("f1").unwrap();

    controller.execute(&add_factory("f1")).await.unwrap();
    assert_eq!(controller.services().get(&service).unwrap().state(), State::Up);

    controller
        .execute(&Operation::new(names::REMOVE, factory_address("f1")))
        .await
        .unwrap();
    assert!(!controller.read_model().await.navigate(&factory_address("f1")).is_defined());
    if let Some(handle) = controller.services().get(&service) {
        assert_eq!(handle.state(), State::Removed);
    }
}

#[tokio::test]
async fn bad_pattern_rolls_back_the_add() {
    let controller = with_subsystem().await;
    let before = controller.read_model().await;
    let op = add_factory("f1").with_param(attr::THREAD_NAME_PATTERN, "%q");

    let failure = controller.execute(&op).await.unwrap_err();
    assert!(matches!(failure, OperationFailure::ServiceFailure { .. }));
    assert_eq!(controller.read_model().await, before);
}

#[tokio::test]
async fn factory_add_remove_compensations_round_trip() {
    let controller = with_subsystem().await;
    let before = controller.read_model().await;

    let add = add_factory("f1").with_param(attr::PRIORITY, 3);
    let remove = controller.execute(&add).await.unwrap().compensating.unwrap();
    let after_add = controller.read_model().await;

    let re_add = controller.execute(&remove).await.unwrap().compensating.unwrap();
    assert_eq!(controller.read_model().await, before);
    assert_eq!(re_add.param(attr::PRIORITY), &ModelNode::Int(3));

    controller.execute(&re_add).await.unwrap();
    assert_eq!(controller.read_model().await, after_add);
}

#[tokio::test]
async fn several_factories_are_listed() {
    let controller = with_subsystem().await;
    for name in ["a", "b", "c"] {
        controller.execute(&add_factory(name)).await.unwrap();
    }
    let names_op = Operation::new(names::READ_CHILDREN_NAMES, threads_address())
        .with_param(keel_core::operation::params::CHILD_TYPE, THREAD_FACTORY);
    let result = controller.execute(&names_op).await.unwrap().result;
    assert_eq!(result, ModelNode::List(vec!["a".into(), "b".into(), "c".into()]));
}

#[tokio::test]
async fn unbounded_pool_stores_decimal_sizes() {
    let controller = with_subsystem().await;
    let address = threads_address().append(PathElement::new(UNBOUNDED_QUEUE_THREAD_POOL, "pool"));
    let op = Operation::new(names::ADD, address.clone())
        .with_param(attr::NAME, "pool")
        .with_param(attr::THREAD_FACTORY, "f1")
        .with_param(attr::MAX_THREADS_COUNT, 100)
        .with_param(attr::MAX_THREADS_PER_CPU, 5)
        .with_param(attr::KEEPALIVE_TIME_DURATION, 1000_i64)
        .with_param(attr::KEEPALIVE_TIME_UNIT, "MILLISECONDS");
    controller.execute(&op).await.unwrap();

    let model = controller.read_model().await;
    let pool = model.navigate(&address);
    assert_eq!(pool.get(attr::MAX_THREADS_COUNT).model_type(), ModelType::BigDecimal);
    assert_eq!(pool.get(attr::MAX_THREADS_PER_CPU).as_i64(), Some(5));
    assert_eq!(pool.get(attr::KEEPALIVE_TIME_DURATION), &ModelNode::Long(1000));
}

#[tokio::test]
async fn subsystem_with_factories_cannot_be_removed() {
    let controller = with_subsystem().await;
    controller.execute(&add_factory("f1")).await.unwrap();
    let failure = controller
        .execute(&Operation::new(names::REMOVE, threads_address()))
        .await
        .unwrap_err();
    assert!(matches!(failure, OperationFailure::HasChildren { .. }));
}

#[tokio::test]
async fn failed_add_frees_the_name_for_the_next_add() {
    let controller = with_subsystem().await;
    let service = factory::service_name("f1").unwrap();

    let bad = add_factory("f1").with_param(attr::THREAD_NAME_PATTERN, "%q");
    controller.execute(&bad).await.unwrap_err();
    assert!(controller.services().get(&service).is_none());

    controller.execute(&add_factory("f1")).await.unwrap();
    assert_eq!(controller.services().get(&service).unwrap().state(), State::Up);
}

/// Started by a dependent of the factory; stopping it takes a while.
struct SlowStop(Duration);

#[async_trait]
impl Service for SlowStop {
    async fn start(&self, _ctx: &StartContext) -> anyhow::Result<ServiceValue> {
        Ok(Arc::new(()))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

#[tokio::test]
async fn interrupted_remove_keeps_factory_and_service() {
    let config = KernelConfig {
        resolve_timeout: Some(Duration::from_millis(100)),
        ..KernelConfig::default()
    };
    let controller = subsystem_in(controller_with(config)).await;
    let service = factory::service_name("f1").unwrap();
    controller.execute(&add_factory("f1")).await.unwrap();

    let user: ServiceName = "test.factory.user".parse().unwrap();
    controller
        .services()
        .register(
            user.clone(),
            Arc::new(SlowStop(Duration::from_millis(300))),
            &[service.clone()],
            Mode::Active,
        )
        .unwrap();
    assert!(controller.services().await_stability(Duration::from_secs(5)).await);

    let failure = controller
        .execute(&Operation::new(names::REMOVE, factory_address("f1")))
        .await
        .unwrap_err();
    assert!(matches!(failure, OperationFailure::ServiceFailure { .. }));
    assert!(controller.read_model().await.navigate(&factory_address("f1")).is_defined());

    // The old service finishes its removal, then a replacement comes up.
    let mut restored = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let up = |name: &ServiceName| controller.services().get(name).is_some_and(|h| h.state() == State::Up);
        if up(&service) && up(&user) {
            restored = true;
            break;
        }
    }
    assert!(restored, "factory service was not reinstalled");
    let handle = controller.services().get(&service).unwrap();
    assert_eq!(handle.mode(), Mode::Active);
    assert_eq!(handle.value_as::<ThreadFactory>().unwrap().name(), "f1");
}
