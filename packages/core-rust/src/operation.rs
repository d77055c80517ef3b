//! Management operations and their node representation.

use std::fmt;

use indexmap::IndexMap;

use crate::address::PathAddress;
use crate::error::ModelError;
use crate::model::ModelNode;

/// Well-known operation names.
pub mod names {
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
    pub const COMPOSITE: &str = "composite";
    pub const READ_RESOURCE: &str = "read-resource";
    pub const READ_RESOURCE_DESCRIPTION: &str = "read-resource-description";
    pub const READ_ATTRIBUTE: &str = "read-attribute";
    pub const WRITE_ATTRIBUTE: &str = "write-attribute";
    pub const UNDEFINE_ATTRIBUTE: &str = "undefine-attribute";
    pub const READ_CHILDREN_NAMES: &str = "read-children-names";
    pub const READ_OPERATION_NAMES: &str = "read-operation-names";
}

/// Well-known parameter keys.
pub mod params {
    pub const OPERATION: &str = "operation";
    pub const ADDRESS: &str = "address";
    pub const NAME: &str = "name";
    pub const VALUE: &str = "value";
    pub const STEPS: &str = "steps";
    pub const RECURSIVE: &str = "recursive";
    pub const OPERATIONS: &str = "operations";
    pub const INHERITED: &str = "inherited";
    pub const CHILD_TYPE: &str = "child-type";
}

/// A request against one address of the model: `(address, name, params)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Operation {
    pub name: String,
    pub address: PathAddress,
    pub params: IndexMap<String, ModelNode>,
}

impl Operation {
    #[must_use]
    pub fn new(name: impl Into<String>, address: PathAddress) -> Self {
        Self {
            name: name.into(),
            address,
            params: IndexMap::new(),
        }
    }

    /// Builder-style parameter setter.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<ModelNode>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Returns the parameter, `Undefined` when absent.
    #[must_use]
    pub fn param(&self, key: &str) -> &ModelNode {
        static UNDEFINED: ModelNode = ModelNode::Undefined;
        self.params.get(key).unwrap_or(&UNDEFINED)
    }

    /// Reads a boolean flag parameter, treating absence as `default`.
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.param(key).as_bool().unwrap_or(default)
    }

    /// Builds a `composite` operation from ordered steps.
    #[must_use]
    pub fn composite(steps: Vec<Operation>) -> Self {
        let steps = steps.iter().map(Operation::to_model_node).collect::<Vec<_>>();
        Self::new(names::COMPOSITE, PathAddress::root()).with_param(params::STEPS, steps)
    }

    /// Renders the operation in its node form:
    /// `{"operation" => .., "address" => [..], ..params}`.
    #[must_use]
    pub fn to_model_node(&self) -> ModelNode {
        let mut map = IndexMap::with_capacity(self.params.len() + 2);
        map.insert(params::OPERATION.to_string(), ModelNode::from(self.name.as_str()));
        map.insert(params::ADDRESS.to_string(), ModelNode::from(&self.address));
        for (k, v) in &self.params {
            map.insert(k.clone(), v.clone());
        }
        ModelNode::Object(map)
    }

    /// Parses the node form produced by [`Operation::to_model_node`].
    ///
    /// # Errors
    ///
    /// Fails when the node is not an object, lacks an operation name, or
    /// carries a malformed address.
    pub fn from_model_node(node: &ModelNode) -> Result<Self, ModelError> {
        let map = node.as_object().ok_or_else(|| ModelError::InvalidOperation {
            reason: format!("expected an object, found {}", node.model_type()),
        })?;
        let name = map
            .get(params::OPERATION)
            .and_then(ModelNode::as_str)
            .ok_or_else(|| ModelError::InvalidOperation {
                reason: "missing operation name".to_string(),
            })?;
        let address = PathAddress::from_model_node(node.get(params::ADDRESS))?;
        let params = map
            .iter()
            .filter(|(k, _)| k.as_str() != params::OPERATION && k.as_str() != params::ADDRESS)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            name: name.to_string(),
            address,
            params,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.name)
    }
}
