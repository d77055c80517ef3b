//! The model controller: single-writer executor for management operations.
//!
//! Each top-level operation holds the model lock from dispatch until its
//! result is known, including composite steps and handler waits on service
//! transitions. The model is snapshotted before dispatch and restored when
//! the operation fails, so no failed operation leaves a partial write behind.

use std::sync::Arc;
use std::time::Instant;

use keel_core::{ModelNode, Operation, ResourceDescription};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::error::{OperationFailure, RegistrationError};
use super::global::register_global_operations;
use super::handler::OperationContext;
use super::persister::{ConfigurationPersister, NullConfigurationPersister};
use super::registration::{DescriptionProvider, ModelNodeRegistration};
use super::result::{deliver, OperationOutcome, ResultHandler};
use crate::service::ServiceRegistry;

/// Executes operations against the management model.
pub struct ModelController {
    model: Mutex<ModelNode>,
    registration: Arc<ModelNodeRegistration>,
    persister: Arc<dyn ConfigurationPersister>,
    services: Arc<ServiceRegistry>,
    cancel: CancellationToken,
}

impl ModelController {
    /// Creates a controller with an empty model, the global operations
    /// registered on the root and no persistence.
    ///
    /// # Errors
    ///
    /// Fails if the root description provider registers conflicting
    /// global operations (it cannot for a fresh root).
    pub fn new(services: Arc<ServiceRegistry>) -> Result<Self, RegistrationError> {
        Self::with_root(
            services,
            Arc::new(ResourceDescription::new("The root of the management model")),
        )
    }

    /// Like [`ModelController::new`] with a custom root description.
    ///
    /// # Errors
    ///
    /// See [`ModelController::new`].
    pub fn with_root(
        services: Arc<ServiceRegistry>,
        root_description: Arc<dyn DescriptionProvider>,
    ) -> Result<Self, RegistrationError> {
        let registration = ModelNodeRegistration::root(root_description);
        register_global_operations(&registration)?;
        Ok(Self {
            model: Mutex::new(ModelNode::new_object()),
            registration,
            persister: Arc::new(NullConfigurationPersister),
            services,
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the initial model.
    #[must_use]
    pub fn with_model(mut self, model: ModelNode) -> Self {
        self.model = Mutex::new(model);
        self
    }

    #[must_use]
    pub fn with_persister(mut self, persister: Arc<dyn ConfigurationPersister>) -> Self {
        self.persister = persister;
        self
    }

    /// Root of the handler registry, for subsystems to register against.
    #[must_use]
    pub fn registration(&self) -> &Arc<ModelNodeRegistration> {
        &self.registration
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// A copy of the current model.
    pub async fn read_model(&self) -> ModelNode {
        self.model.lock().await.clone()
    }

    /// Cancels in-flight and future operations.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // -- execution ----------------------------------------------------------

    /// Executes `operation` and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure after the model has been restored to
    /// its state before the operation.
    pub async fn execute(&self, operation: &Operation) -> Result<OperationOutcome, OperationFailure> {
        let span = info_span!(
            "operation",
            op = %operation.name,
            address = %operation.address,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        async move {
            let start = Instant::now();
            let mut model = self.model.lock().await;
            let snapshot = model.clone();

            let result = {
                let mut ctx = OperationContext::new(
                    &mut model,
                    Arc::clone(&self.registration),
                    Arc::clone(&self.services),
                    self.cancel.clone(),
                );
                ctx.execute_step(operation).await
            };

            let outcome = match &result {
                Ok(outcome) => {
                    if outcome.is_mutation() && !self.persister.is_null() {
                        if let Err(e) = self.persister.store(&model).await {
                            warn!(error = %e, "failed to persist configuration");
                        }
                    }
                    "ok"
                }
                Err(OperationFailure::Cancelled) => {
                    *model = snapshot;
                    "cancelled"
                }
                Err(failure) => {
                    *model = snapshot;
                    debug!(error = %failure, "operation failed");
                    "error"
                }
            };
            drop(model);

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            metrics::counter!("keel_operations_total", "outcome" => outcome).increment(1);
            result
        }
        .instrument(span)
        .await
    }

    /// Executes `operation`, reporting through `handler`.
    pub async fn execute_with_handler(&self, operation: &Operation, handler: &mut dyn ResultHandler) {
        let result = self.execute(operation).await;
        deliver(handler, &result);
    }

    /// Executes an operation given in node form, reporting through `handler`.
    /// A node that is not a valid operation is reported as a failure.
    pub async fn execute_node(&self, node: &ModelNode, handler: &mut dyn ResultHandler) {
        match Operation::from_model_node(node) {
            Ok(operation) => self.execute_with_handler(&operation, handler).await,
            Err(e) => handler.handle_failed(&OperationFailure::from(e).failure_description()),
        }
    }
}

impl std::fmt::Debug for ModelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelController")
            .field("registration", &self.registration)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use keel_core::operation::{names, params};
    use keel_core::{AttributeDescription, ModelType, PathAddress, PathElement};

    use super::*;
    use crate::config::KernelConfig;
    use crate::management::persister::InMemoryConfigurationPersister;
    use crate::management::resource::{
        add_description, remove_description, ModelAddOperationHandler, ModelRemoveOperationHandler,
    };
    use crate::management::registration::OperationDescriptionProvider;
    use crate::management::result::CollectingResultHandler;

    fn widget() -> ResourceDescription {
        ResourceDescription::new("Widget")
            .attribute("size", AttributeDescription::new(ModelType::Int, "Size").range(1, 10))
            .attribute("label", AttributeDescription::new(ModelType::String, "Label").min_length(1))
            .child("part", "Parts of the widget", 0)
    }

    fn part() -> ResourceDescription {
        ResourceDescription::new("Part")
            .attribute("weight", AttributeDescription::new(ModelType::Long, "Weight"))
    }

    fn register(
        parent: &ModelNodeRegistration,
        element: PathElement,
        description: ResourceDescription,
    ) -> Arc<ModelNodeRegistration> {
        let registration = parent
            .register_sub_model(element, Arc::new(description.clone()))
            .unwrap();
        registration
            .register_operation_handler(
                names::ADD,
                Arc::new(ModelAddOperationHandler::for_resource(&description)),
                Arc::new(add_description(&description)),
                false,
            )
            .unwrap();
        registration
            .register_operation_handler(
                names::REMOVE,
                Arc::new(ModelRemoveOperationHandler::new()),
                Arc::new(remove_description(&description)),
                false,
            )
            .unwrap();
        registration
    }

    fn controller() -> ModelController {
        let services = ServiceRegistry::new(KernelConfig::default());
        let controller = ModelController::with_root(
            services,
            Arc::new(ResourceDescription::new("root").child("widget", "Widgets", 0)),
        )
        .unwrap();
        let widgets = register(controller.registration(), PathElement::wildcard("widget"), widget());
        register(&widgets, PathElement::wildcard("part"), part());
        controller
    }

    fn widget_at(name: &str) -> PathAddress {
        PathAddress::from_pairs(&[("widget", name)])
    }

    fn add_widget(name: &str, size: i32) -> Operation {
        Operation::new(names::ADD, widget_at(name))
            .with_param("size", size)
            .with_param("label", name)
    }

    #[tokio::test]
    async fn add_then_compensation_restores_model() {
        let controller = controller();
        let before = controller.read_model().await;
        let outcome = controller.execute(&add_widget("w1", 3)).await.unwrap();
        assert_eq!(
            controller.read_model().await.navigate(&widget_at("w1")).get("size"),
            &ModelNode::Int(3)
        );

        let undo = outcome.compensating.unwrap();
        assert_eq!(undo.name, names::REMOVE);
        controller.execute(&undo).await.unwrap();
        assert_eq!(controller.read_model().await, before);
    }

    #[tokio::test]
    async fn remove_compensation_recreates_exact_attributes() {
        let controller = controller();
        controller.execute(&add_widget("w1", 4)).await.unwrap();
        let outcome = controller
            .execute(&Operation::new(names::REMOVE, widget_at("w1")))
            .await
            .unwrap();
        let add = outcome.compensating.unwrap();
        assert_eq!(add.name, names::ADD);
        assert_eq!(add.param("size"), &ModelNode::Int(4));
        assert_eq!(add.param("label").as_str(), Some("w1"));
        assert_eq!(add.params.len(), 2);
    }

    #[tokio::test]
    async fn invalid_add_fails_without_mutation() {
        let controller = controller();
        let before = controller.read_model().await;
        let failure = controller.execute(&add_widget("w1", 12)).await.unwrap_err();
        assert!(matches!(failure, OperationFailure::Validation { .. }));
        assert!(failure.to_string().contains("greater than maximum 10"));
        assert_eq!(controller.read_model().await, before);
    }

    #[tokio::test]
    async fn unknown_operation_reports_missing_handler() {
        let controller = controller();
        let failure = controller
            .execute(&Operation::new("frobnicate", widget_at("w1")))
            .await
            .unwrap_err();
        assert_eq!(
            failure.to_string(),
            "no handler registered for operation frobnicate at address widget=w1"
        );
    }

    #[tokio::test]
    async fn remove_with_children_is_refused() {
        let controller = controller();
        controller.execute(&add_widget("w1", 1)).await.unwrap();
        let part = Operation::new(names::ADD, widget_at("w1").append(PathElement::new("part", "p")))
            .with_param("weight", 7_i64);
        controller.execute(&part).await.unwrap();
        let failure = controller
            .execute(&Operation::new(names::REMOVE, widget_at("w1")))
            .await
            .unwrap_err();
        assert!(matches!(failure, OperationFailure::HasChildren { .. }));
    }

    #[tokio::test]
    async fn add_requires_parent() {
        let controller = controller();
        let part = Operation::new(names::ADD, widget_at("nope").append(PathElement::new("part", "p")));
        assert!(matches!(
            controller.execute(&part).await,
            Err(OperationFailure::MissingResource { .. })
        ));
    }

    #[tokio::test]
    async fn write_attribute_compensation_restores_previous_value() {
        let controller = controller();
        controller.execute(&add_widget("w1", 2)).await.unwrap();
        let write = Operation::new(names::WRITE_ATTRIBUTE, widget_at("w1"))
            .with_param(params::NAME, "size")
            .with_param(params::VALUE, 9);
        let undo = controller.execute(&write).await.unwrap().compensating.unwrap();
        assert_eq!(undo.param(params::VALUE), &ModelNode::Int(2));
        controller.execute(&undo).await.unwrap();
        let read = Operation::new(names::READ_ATTRIBUTE, widget_at("w1")).with_param(params::NAME, "size");
        assert_eq!(controller.execute(&read).await.unwrap().result, ModelNode::Int(2));
    }

    #[tokio::test]
    async fn undefine_then_compensate() {
        let controller = controller();
        controller.execute(&add_widget("w1", 2)).await.unwrap();
        let undefine = Operation::new(names::UNDEFINE_ATTRIBUTE, widget_at("w1")).with_param(params::NAME, "label");
        let undo = controller.execute(&undefine).await.unwrap().compensating.unwrap();
        assert!(!controller.read_model().await.navigate(&widget_at("w1")).get("label").is_defined());
        controller.execute(&undo).await.unwrap();
        assert_eq!(
            controller.read_model().await.navigate(&widget_at("w1")).get("label").as_str(),
            Some("w1")
        );
    }

    #[tokio::test]
    async fn composite_rolls_back_applied_steps() {
        let controller = controller();
        let before = controller.read_model().await;
        let batch = Operation::composite(vec![
            add_widget("a", 1),
            add_widget("b", 2),
            add_widget("c", 99),
        ]);
        let failure = controller.execute(&batch).await.unwrap_err();
        let OperationFailure::Composite { step, .. } = &failure else {
            panic!("expected a composite failure, got {failure:?}");
        };
        assert_eq!(*step, 3);
        assert!(matches!(failure.root_cause(), OperationFailure::Validation { .. }));
        assert_eq!(controller.read_model().await, before);
    }

    #[tokio::test]
    async fn composite_compensation_undoes_in_reverse() {
        let controller = controller();
        let before = controller.read_model().await;
        let batch = Operation::composite(vec![
            add_widget("a", 1),
            Operation::new(names::WRITE_ATTRIBUTE, widget_at("a"))
                .with_param(params::NAME, "size")
                .with_param(params::VALUE, 5),
        ]);
        let outcome = controller.execute(&batch).await.unwrap();
        let undo = outcome.compensating.unwrap();
        let steps = undo.param(params::STEPS).as_list().unwrap();
        assert_eq!(steps[0].get("operation").as_str(), Some(names::WRITE_ATTRIBUTE));
        assert_eq!(steps[1].get("operation").as_str(), Some(names::REMOVE));
        controller.execute(&undo).await.unwrap();
        assert_eq!(controller.read_model().await, before);
    }

    #[tokio::test]
    async fn read_operations() {
        let controller = controller();
        controller.execute(&add_widget("w1", 1)).await.unwrap();
        controller.execute(&add_widget("w2", 1)).await.unwrap();

        let children = Operation::new(names::READ_CHILDREN_NAMES, PathAddress::root())
            .with_param(params::CHILD_TYPE, "widget");
        let names_result = controller.execute(&children).await.unwrap().result;
        assert_eq!(names_result, ModelNode::List(vec!["w1".into(), "w2".into()]));

        let shallow = controller
            .execute(&Operation::new(names::READ_RESOURCE, PathAddress::root()))
            .await
            .unwrap()
            .result;
        assert!(!shallow.get_path(&["widget", "w1"]).is_defined());
        assert_eq!(shallow.get("widget").keys().count(), 2);

        let ops = controller
            .execute(&Operation::new(names::READ_OPERATION_NAMES, widget_at("w1")))
            .await
            .unwrap()
            .result;
        let ops: Vec<&str> = ops.as_list().unwrap().iter().filter_map(ModelNode::as_str).collect();
        assert!(ops.contains(&names::ADD));
        assert!(ops.contains(&names::READ_RESOURCE_DESCRIPTION));
    }

    #[tokio::test]
    async fn description_includes_inherited_operations_on_request() {
        let controller = controller();
        let op = Operation::new(names::READ_RESOURCE_DESCRIPTION, widget_at("*"))
            .with_param(params::OPERATIONS, true);
        let description = controller.execute(&op).await.unwrap().result;
        assert!(description.get_path(&["operations", "add"]).is_defined());
        assert!(description.get_path(&["operations", "composite"]).is_defined());

        let own = op.clone().with_param(params::INHERITED, false);
        let description = controller.execute(&own).await.unwrap().result;
        assert!(!description.get_path(&["operations", "composite"]).is_defined());
    }

    #[tokio::test]
    async fn write_attribute_value_is_described_without_a_type() {
        let controller = controller();
        let op = Operation::new(names::READ_RESOURCE_DESCRIPTION, widget_at("*"))
            .with_param(params::OPERATIONS, true);
        let description = controller.execute(&op).await.unwrap().result;
        let value = description.get_path(&[
            "operations",
            names::WRITE_ATTRIBUTE,
            "request-properties",
            params::VALUE,
        ]);
        assert!(value.is_defined());
        assert!(!value.get("type").is_defined());

        let write = Operation::new(names::WRITE_ATTRIBUTE, widget_at("w1"))
            .with_param(params::NAME, "size")
            .with_param(params::VALUE, 4);
        let entry = controller
            .registration()
            .operation_entry(&write.address, names::WRITE_ATTRIBUTE)
            .unwrap();
        assert!(entry.description.operation_description().validate(&write.params).is_valid());
    }

    #[tokio::test]
    async fn persister_sees_mutations_only() {
        let persister = Arc::new(InMemoryConfigurationPersister::new());
        let controller = controller().with_persister(persister.clone());
        controller.execute(&add_widget("w1", 1)).await.unwrap();
        controller
            .execute(&Operation::new(names::READ_RESOURCE, widget_at("w1")))
            .await
            .unwrap();
        assert_eq!(persister.store_count(), 1);
        assert!(persister.latest().unwrap().navigate(&widget_at("w1")).is_defined());
    }

    #[tokio::test]
    async fn node_form_and_handlers() {
        let controller = controller();
        let mut handler = CollectingResultHandler::new();
        controller.execute_node(&add_widget("w1", 1).to_model_node(), &mut handler).await;
        assert!(handler.completed);
        assert_eq!(handler.compensating.as_ref().map(|o| o.name.as_str()), Some(names::REMOVE));

        handler.clear();
        controller.execute_node(&ModelNode::from("garbage"), &mut handler).await;
        assert!(handler.failure.is_some());
    }

    #[tokio::test]
    async fn shutdown_cancels_operations() {
        let controller = controller();
        controller.shutdown();
        let mut handler = CollectingResultHandler::new();
        controller.execute_with_handler(&add_widget("w1", 1), &mut handler).await;
        assert!(handler.cancelled);
        assert!(!controller.read_model().await.navigate(&widget_at("w1")).is_defined());
    }

    // ------------------------------------------------------------------
    // Property tests
    // ------------------------------------------------------------------

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest::proptest! {
        #[test]
        fn composite_failure_leaves_model_untouched(
            sizes in proptest::collection::vec(1_i32..=10, 1..6),
            bad_at in 0_usize..6,
        ) {
            let bad_at = bad_at % (sizes.len() + 1);
            let (before, after, step) = block_on(async {
                let controller = controller();
                controller.execute(&add_widget("existing", 1)).await.unwrap();
                let before = controller.read_model().await;

                let mut steps: Vec<Operation> = sizes
                    .iter()
                    .enumerate()
                    .map(|(i, size)| add_widget(&format!("w{i}"), *size))
                    .collect();
                steps.insert(bad_at, add_widget("bad", 11));
                let failure = controller.execute(&Operation::composite(steps)).await.unwrap_err();
                let step = match failure {
                    OperationFailure::Composite { step, .. } => step,
                    other => panic!("expected a composite failure, got {other:?}"),
                };
                (before, controller.read_model().await, step)
            });
            proptest::prop_assert_eq!(before, after);
            proptest::prop_assert_eq!(step, bad_at + 1);
        }

        #[test]
        fn compensations_applied_in_reverse_restore_model(
            sizes in proptest::collection::vec(1_i32..=10, 1..6),
            rewrites in proptest::collection::vec(1_i32..=10, 0..6),
        ) {
            let (before, after) = block_on(async {
                let controller = controller();
                let before = controller.read_model().await;
                let mut undo = Vec::new();
                for (i, size) in sizes.iter().enumerate() {
                    let outcome = controller.execute(&add_widget(&format!("w{i}"), *size)).await.unwrap();
                    undo.extend(outcome.compensating);
                }
                for (i, size) in rewrites.iter().enumerate() {
                    let write = Operation::new(names::WRITE_ATTRIBUTE, widget_at(&format!("w{}", i % sizes.len())))
                        .with_param(params::NAME, "size")
                        .with_param(params::VALUE, *size);
                    undo.extend(controller.execute(&write).await.unwrap().compensating);
                }
                for op in undo.iter().rev() {
                    controller.execute(op).await.unwrap();
                }
                (before, controller.read_model().await)
            });
            proptest::prop_assert_eq!(before, after);
        }
    }
}
