//! Registry of operation handlers and description providers, shaped like the
//! model tree.
//!
//! Each [`ModelNodeRegistration`] covers one element pattern (`profile=*`,
//! `subsystem=threads`). Handler lookup walks the address from the root,
//! trying an exact element match before the wildcard registration, and falls
//! back to the nearest handler registered `inherited` on an ancestor.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use keel_core::schema::keys;
use keel_core::{ModelNode, OperationDescription, PathAddress, PathElement, ResourceDescription};
use parking_lot::RwLock;

use super::error::RegistrationError;
use super::handler::OperationHandler;

// ---------------------------------------------------------------------------
// Description providers
// ---------------------------------------------------------------------------

/// Supplies the schema of a resource type.
pub trait DescriptionProvider: Send + Sync {
    fn resource_description(&self) -> ResourceDescription;
}

impl<F> DescriptionProvider for F
where
    F: Fn() -> ResourceDescription + Send + Sync,
{
    fn resource_description(&self) -> ResourceDescription {
        self()
    }
}

impl DescriptionProvider for ResourceDescription {
    fn resource_description(&self) -> ResourceDescription {
        self.clone()
    }
}

/// Supplies the description of an operation.
pub trait OperationDescriptionProvider: Send + Sync {
    fn operation_description(&self) -> OperationDescription;
}

impl<F> OperationDescriptionProvider for F
where
    F: Fn() -> OperationDescription + Send + Sync,
{
    fn operation_description(&self) -> OperationDescription {
        self()
    }
}

impl OperationDescriptionProvider for OperationDescription {
    fn operation_description(&self) -> OperationDescription {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// ModelNodeRegistration
// ---------------------------------------------------------------------------

/// An operation handler with its description and inheritance flag.
#[derive(Clone)]
pub struct OperationEntry {
    pub handler: Arc<dyn OperationHandler>,
    pub description: Arc<dyn OperationDescriptionProvider>,
    pub inherited: bool,
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("inherited", &self.inherited)
            .finish_non_exhaustive()
    }
}

/// One node of the registration tree.
pub struct ModelNodeRegistration {
    element: Option<PathElement>,
    description: Arc<dyn DescriptionProvider>,
    operations: RwLock<IndexMap<String, OperationEntry>>,
    children: RwLock<IndexMap<PathElement, Arc<ModelNodeRegistration>>>,
}

impl ModelNodeRegistration {
    /// Creates the root registration.
    #[must_use]
    pub fn root(description: Arc<dyn DescriptionProvider>) -> Arc<Self> {
        Arc::new(Self::new(None, description))
    }

    fn new(element: Option<PathElement>, description: Arc<dyn DescriptionProvider>) -> Self {
        Self {
            element,
            description,
            operations: RwLock::new(IndexMap::new()),
            children: RwLock::new(IndexMap::new()),
        }
    }

    /// The element pattern this registration covers; `None` for the root.
    #[must_use]
    pub fn element(&self) -> Option<&PathElement> {
        self.element.as_ref()
    }

    /// Registers a child resource type beneath this one.
    ///
    /// # Errors
    ///
    /// Fails when `element` is already registered here.
    pub fn register_sub_model(
        &self,
        element: PathElement,
        description: Arc<dyn DescriptionProvider>,
    ) -> Result<Arc<ModelNodeRegistration>, RegistrationError> {
        let mut children = self.children.write();
        if children.contains_key(&element) {
            return Err(RegistrationError::DuplicateChild { element });
        }
        let child = Arc::new(Self::new(Some(element.clone()), description));
        children.insert(element, Arc::clone(&child));
        Ok(child)
    }

    /// Registers `handler` for operation `name` on this resource type. An
    /// `inherited` handler also serves every registered descendant that
    /// does not register its own.
    ///
    /// # Errors
    ///
    /// Fails when `name` is already registered here.
    pub fn register_operation_handler(
        &self,
        name: &str,
        handler: Arc<dyn OperationHandler>,
        description: Arc<dyn OperationDescriptionProvider>,
        inherited: bool,
    ) -> Result<(), RegistrationError> {
        let mut operations = self.operations.write();
        if operations.contains_key(name) {
            return Err(RegistrationError::DuplicateOperation {
                name: name.to_string(),
                element: self.label(),
            });
        }
        operations.insert(
            name.to_string(),
            OperationEntry {
                handler,
                description,
                inherited,
            },
        );
        Ok(())
    }

    fn label(&self) -> String {
        self.element
            .as_ref()
            .map_or_else(|| "/".to_string(), ToString::to_string)
    }

    fn child(&self, element: &PathElement) -> Option<Arc<ModelNodeRegistration>> {
        self.children.read().get(element).cloned()
    }

    /// Exact match first, then the wildcard registration for the same key.
    fn candidates(&self, element: &PathElement) -> Vec<Arc<ModelNodeRegistration>> {
        let mut found = Vec::with_capacity(2);
        if !element.is_wildcard() {
            found.extend(self.child(element));
        }
        found.extend(self.child(&PathElement::wildcard(element.key.clone())));
        found
    }

    // -- lookup -------------------------------------------------------------

    /// Finds the handler for `operation` at `address`.
    #[must_use]
    pub fn operation_entry(&self, address: &PathAddress, operation: &str) -> Option<OperationEntry> {
        self.lookup(address.elements(), operation, None)
    }

    fn lookup(
        &self,
        elements: &[PathElement],
        operation: &str,
        inherited: Option<OperationEntry>,
    ) -> Option<OperationEntry> {
        let own = self.operations.read().get(operation).cloned();
        let Some((first, rest)) = elements.split_first() else {
            return own.or(inherited);
        };
        let inherited = own.filter(|e| e.inherited).or(inherited);
        self.candidates(first)
            .into_iter()
            .find_map(|child| child.lookup(rest, operation, inherited.clone()))
    }

    /// The registration that describes the resource at `address`.
    #[must_use]
    pub fn registration_at(self: &Arc<Self>, address: &PathAddress) -> Option<Arc<ModelNodeRegistration>> {
        let mut current = Arc::clone(self);
        for element in address {
            current = current.candidates(element).into_iter().next()?;
        }
        Some(current)
    }

    /// Description of this resource type.
    #[must_use]
    pub fn resource_description(&self) -> ResourceDescription {
        self.description.resource_description()
    }

    /// Child types registered directly beneath this resource type.
    #[must_use]
    pub fn child_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for element in self.children.read().keys() {
            if !types.contains(&element.key) {
                types.push(element.key.clone());
            }
        }
        types
    }

    /// Operations available at `address`: those registered on the target
    /// resource type plus (when `include_inherited`) inherited ancestors'.
    #[must_use]
    pub fn operations_at(
        &self,
        address: &PathAddress,
        include_inherited: bool,
    ) -> IndexMap<String, OperationEntry> {
        let mut collected = IndexMap::new();
        self.collect_operations(address.elements(), include_inherited, &mut collected);
        collected
    }

    fn collect_operations(
        &self,
        elements: &[PathElement],
        include_inherited: bool,
        collected: &mut IndexMap<String, OperationEntry>,
    ) -> bool {
        let operations = self.operations.read();
        let Some((first, rest)) = elements.split_first() else {
            for (name, entry) in operations.iter() {
                collected.insert(name.clone(), entry.clone());
            }
            return true;
        };
        let mut inherited = IndexMap::new();
        if include_inherited {
            for (name, entry) in operations.iter().filter(|(_, e)| e.inherited) {
                inherited.insert(name.clone(), entry.clone());
            }
        }
        drop(operations);

        for child in self.candidates(first) {
            let mut below = IndexMap::new();
            if child.collect_operations(rest, include_inherited, &mut below) {
                for (name, entry) in inherited {
                    collected.entry(name).or_insert(entry);
                }
                for (name, entry) in below {
                    collected.insert(name, entry);
                }
                return true;
            }
        }
        false
    }

    /// Node form of this resource type's description.
    ///
    /// With `recursive`, every registered child type is described under
    /// `children => <type> => model-description => <value>`. With
    /// `operations`, the operation descriptions available on each described
    /// resource type are included; `inherited_operations` carries those
    /// inherited from ancestors.
    #[must_use]
    pub fn describe(
        &self,
        recursive: bool,
        operations: bool,
        inherited_operations: &IndexMap<String, OperationEntry>,
    ) -> ModelNode {
        let mut node = self.resource_description().to_model_node();

        let own = self.operations.read().clone();
        if operations {
            let mut described = IndexMap::new();
            for (name, entry) in inherited_operations.iter().chain(own.iter()) {
                described.insert(name.clone(), entry.description.operation_description().to_model_node());
            }
            if let Ok(slot) = node.get_mut(keys::OPERATIONS) {
                *slot = ModelNode::Object(described);
            }
        }

        if recursive {
            let mut inherited = inherited_operations.clone();
            for (name, entry) in own.into_iter().filter(|(_, e)| e.inherited) {
                inherited.insert(name, entry);
            }
            let children = self.children.read().clone();
            for (element, child) in children {
                let described = child.describe(recursive, operations, &inherited);
                let slot = node
                    .get_mut(keys::CHILDREN)
                    .and_then(|c| c.get_mut(&element.key))
                    .and_then(|c| c.get_mut(keys::MODEL_DESCRIPTION))
                    .and_then(|c| c.get_mut(&element.value));
                if let Ok(slot) = slot {
                    *slot = described;
                }
            }
        }
        node
    }
}

impl fmt::Debug for ModelNodeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelNodeRegistration")
            .field("element", &self.label())
            .field("operations", &self.operations.read().keys().collect::<Vec<_>>())
            .field("children", &self.children.read().len())
            .finish()
    }
}
