//! Resource and operation descriptions, and validation against them.
//!
//! Descriptions double as schema: the same [`AttributeDescription`] that is
//! reported by `read-resource-description` is used to reject a bad value
//! before any mutation happens.

use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::model::ModelNode;
use crate::types::ModelType;

/// Keys used in the node form of descriptions.
pub mod keys {
    pub const DESCRIPTION: &str = "description";
    pub const ATTRIBUTES: &str = "attributes";
    pub const CHILDREN: &str = "children";
    pub const OPERATIONS: &str = "operations";
    pub const TYPE: &str = "type";
    pub const VALUE_TYPE: &str = "value-type";
    pub const REQUIRED: &str = "required";
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const MIN_LENGTH: &str = "min-length";
    pub const MAX_LENGTH: &str = "max-length";
    pub const MIN_OCCURS: &str = "min-occurs";
    pub const MAX_OCCURS: &str = "max-occurs";
    pub const MODEL_DESCRIPTION: &str = "model-description";
    pub const OPERATION_NAME: &str = "operation-name";
    pub const REQUEST_PROPERTIES: &str = "request-properties";
    pub const REPLY_PROPERTIES: &str = "reply-properties";
}

/// Result of validating a value against a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The value conforms to the description.
    Valid,
    /// The value violates one or more constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Converts into a `Result`, yielding the collected errors on failure.
    ///
    /// # Errors
    ///
    /// Returns the validation errors when invalid.
    pub fn into_result(self) -> Result<(), Vec<String>> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid { errors } => Err(errors),
        }
    }
}

// ---------------------------------------------------------------------------
// AttributeDescription
// ---------------------------------------------------------------------------

/// Type and constraints of one attribute or operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescription {
    /// `None` accepts a value of any type.
    pub model_type: Option<ModelType>,
    pub description: String,
    pub required: bool,
    /// Inclusive numeric bounds; ignored for non-numeric types.
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// Inclusive bounds on string length or list size.
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Element type of a `LIST`.
    pub value_type: Option<ModelType>,
}

impl AttributeDescription {
    #[must_use]
    pub fn new(model_type: ModelType, description: impl Into<String>) -> Self {
        Self::with_type(Some(model_type), description)
    }

    /// A description that accepts any value type, such as the `value`
    /// parameter of `write-attribute`.
    #[must_use]
    pub fn untyped(description: impl Into<String>) -> Self {
        Self::with_type(None, description)
    }

    fn with_type(model_type: Option<ModelType>, description: impl Into<String>) -> Self {
        Self {
            model_type,
            description: description.into(),
            required: false,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            value_type: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    #[must_use]
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    #[must_use]
    pub fn value_type(mut self, value_type: ModelType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    /// Checks `value` against type, presence and bounds.
    #[must_use]
    pub fn validate(&self, name: &str, value: &ModelNode) -> ValidationResult {
        let mut errors = Vec::new();
        self.collect_errors(name, value, &mut errors);
        ValidationResult::from_errors(errors)
    }

    fn collect_errors(&self, name: &str, value: &ModelNode, errors: &mut Vec<String>) {
        if !value.is_defined() {
            if self.required {
                errors.push(format!("'{name}' is required"));
            }
            return;
        }
        if let Some(expected) = self.model_type.filter(|t| !conforms(*t, value)) {
            errors.push(format!(
                "'{name}' must be of type {expected} but was {}",
                value.model_type()
            ));
            return;
        }

        if self.model_type.is_some_and(ModelType::is_numeric) {
            if let Some(number) = value.as_decimal() {
                if let Some(min) = self.min.filter(|m| number < Decimal::from(*m)) {
                    errors.push(format!("'{name}' value {number} is less than minimum {min}"));
                }
                if let Some(max) = self.max.filter(|m| number > Decimal::from(*m)) {
                    errors.push(format!("'{name}' value {number} is greater than maximum {max}"));
                }
            }
        }

        let length = match value {
            ModelNode::String(s) => Some(s.chars().count()),
            ModelNode::List(items) => Some(items.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(min) = self.min_length.filter(|m| length < *m) {
                errors.push(format!("'{name}' length {length} is shorter than {min}"));
            }
            if let Some(max) = self.max_length.filter(|m| length > *m) {
                errors.push(format!("'{name}' length {length} is longer than {max}"));
            }
        }

        if let (Some(element_type), ModelNode::List(items)) = (self.value_type, value) {
            for (i, item) in items.iter().enumerate() {
                if !conforms(element_type, item) {
                    errors.push(format!(
                        "'{name}' element {i} must be of type {element_type} but was {}",
                        item.model_type()
                    ));
                }
            }
        }
    }

    /// Converts a conforming value to the canonical variant of the declared
    /// type, e.g. an `Int` written to a `BIG_DECIMAL` attribute.
    ///
    /// Values that do not conform are returned unchanged; validate first.
    #[must_use]
    pub fn coerce(&self, value: &ModelNode) -> ModelNode {
        let converted = match self.model_type {
            Some(ModelType::Int) => value.as_i32().map(ModelNode::Int),
            Some(ModelType::Long) => value.as_i64().map(ModelNode::Long),
            Some(ModelType::BigInteger) => value.as_big_integer().map(ModelNode::BigInteger),
            Some(ModelType::BigDecimal) => value.as_decimal().map(ModelNode::BigDecimal),
            _ => None,
        };
        converted.unwrap_or_else(|| value.clone())
    }

    #[must_use]
    pub fn to_model_node(&self) -> ModelNode {
        let mut node = ModelNode::new_object();
        if let Some(model_type) = self.model_type {
            node = node.with(keys::TYPE, model_type);
        }
        node = node
            .with(keys::DESCRIPTION, self.description.as_str())
            .with(keys::REQUIRED, self.required);
        if let Some(value_type) = self.value_type {
            node = node.with(keys::VALUE_TYPE, value_type);
        }
        if let Some(min) = self.min {
            node = node.with(keys::MIN, min);
        }
        if let Some(max) = self.max {
            node = node.with(keys::MAX, max);
        }
        if let Some(min) = self.min_length {
            node = node.with(keys::MIN_LENGTH, i64::try_from(min).unwrap_or(i64::MAX));
        }
        if let Some(max) = self.max_length {
            node = node.with(keys::MAX_LENGTH, i64::try_from(max).unwrap_or(i64::MAX));
        }
        node
    }
}

/// Whether `value` can be represented exactly as `model_type`.
fn conforms(model_type: ModelType, value: &ModelNode) -> bool {
    match model_type {
        ModelType::String => matches!(value, ModelNode::String(_)),
        ModelType::Boolean => matches!(value, ModelNode::Boolean(_)),
        ModelType::Int => value.as_i32().is_some(),
        ModelType::Long => value.as_i64().is_some(),
        ModelType::BigInteger => value.as_big_integer().is_some(),
        ModelType::BigDecimal => value.as_decimal().is_some(),
        ModelType::List => matches!(value, ModelNode::List(_)),
        ModelType::Object => matches!(value, ModelNode::Object(_)),
        ModelType::Type => matches!(value, ModelNode::Type(_)),
        ModelType::Undefined => !value.is_defined(),
    }
}

// ---------------------------------------------------------------------------
// OperationDescription
// ---------------------------------------------------------------------------

/// Parameters and reply of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescription {
    pub name: String,
    pub description: String,
    pub request_properties: IndexMap<String, AttributeDescription>,
    pub reply: Option<AttributeDescription>,
}

impl OperationDescription {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            request_properties: IndexMap::new(),
            reply: None,
        }
    }

    /// Operation whose parameters are exactly the given attributes.
    #[must_use]
    pub fn from_attributes(
        name: impl Into<String>,
        description: impl Into<String>,
        attributes: &IndexMap<String, AttributeDescription>,
    ) -> Self {
        let mut op = Self::new(name, description);
        op.request_properties = attributes.clone();
        op
    }

    #[must_use]
    pub fn param(mut self, name: &str, attribute: AttributeDescription) -> Self {
        self.request_properties.insert(name.to_string(), attribute);
        self
    }

    #[must_use]
    pub fn reply(mut self, reply: AttributeDescription) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Validates every declared parameter and rejects undeclared ones.
    #[must_use]
    pub fn validate(&self, params: &IndexMap<String, ModelNode>) -> ValidationResult {
        static UNDEFINED: ModelNode = ModelNode::Undefined;
        let mut errors = Vec::new();
        for (name, attribute) in &self.request_properties {
            let value = params.get(name).unwrap_or(&UNDEFINED);
            attribute.collect_errors(name, value, &mut errors);
        }
        for name in params.keys() {
            if !self.request_properties.contains_key(name) {
                errors.push(format!("'{name}' is not a parameter of '{}'", self.name));
            }
        }
        ValidationResult::from_errors(errors)
    }

    /// Canonicalizes declared, defined parameters to their declared types.
    #[must_use]
    pub fn coerce(&self, params: &IndexMap<String, ModelNode>) -> IndexMap<String, ModelNode> {
        params
            .iter()
            .filter(|(_, v)| v.is_defined())
            .map(|(k, v)| {
                let coerced = self
                    .request_properties
                    .get(k)
                    .map_or_else(|| v.clone(), |a| a.coerce(v));
                (k.clone(), coerced)
            })
            .collect()
    }

    #[must_use]
    pub fn to_model_node(&self) -> ModelNode {
        let request = self
            .request_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_model_node()))
            .collect::<IndexMap<_, _>>();
        let mut node = ModelNode::new_object()
            .with(keys::OPERATION_NAME, self.name.as_str())
            .with(keys::DESCRIPTION, self.description.as_str())
            .with(keys::REQUEST_PROPERTIES, request);
        node = match &self.reply {
            Some(reply) => node.with(keys::REPLY_PROPERTIES, reply.to_model_node()),
            None => node.with(keys::REPLY_PROPERTIES, ModelNode::new_object()),
        };
        node
    }
}

// ---------------------------------------------------------------------------
// ResourceDescription
// ---------------------------------------------------------------------------

/// Description of a child type beneath a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDescription {
    pub description: String,
    pub min_occurs: u32,
    pub max_occurs: Option<u32>,
}

/// Schema of one resource: its attributes and child types.
///
/// Operations are not part of the provider's output; they are attached from
/// the handler registry when a description is read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceDescription {
    pub description: String,
    pub attributes: IndexMap<String, AttributeDescription>,
    pub children: IndexMap<String, ChildDescription>,
}

impl ResourceDescription {
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: &str, attribute: AttributeDescription) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    #[must_use]
    pub fn child(mut self, child_type: &str, description: impl Into<String>, min_occurs: u32) -> Self {
        self.children.insert(
            child_type.to_string(),
            ChildDescription {
                description: description.into(),
                min_occurs,
                max_occurs: None,
            },
        );
        self
    }

    /// Validates a single attribute write.
    #[must_use]
    pub fn validate_attribute(&self, name: &str, value: &ModelNode) -> ValidationResult {
        match self.attributes.get(name) {
            Some(attribute) => attribute.validate(name, value),
            None => ValidationResult::Invalid {
                errors: vec![format!("unknown attribute '{name}'")],
            },
        }
    }

    /// Node form without `model-description` and `operations`; callers that
    /// walk the registry fill those in.
    #[must_use]
    pub fn to_model_node(&self) -> ModelNode {
        let attributes = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_model_node()))
            .collect::<IndexMap<_, _>>();
        let children = self
            .children
            .iter()
            .map(|(k, c)| {
                let mut child = ModelNode::new_object()
                    .with(keys::DESCRIPTION, c.description.as_str())
                    .with(keys::MIN_OCCURS, i64::from(c.min_occurs));
                if let Some(max) = c.max_occurs {
                    child = child.with(keys::MAX_OCCURS, i64::from(max));
                }
                (k.clone(), child)
            })
            .collect::<IndexMap<_, _>>();
        ModelNode::new_object()
            .with(keys::DESCRIPTION, self.description.as_str())
            .with(keys::ATTRIBUTES, attributes)
            .with(keys::CHILDREN, children)
    }
}
