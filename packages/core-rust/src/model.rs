//! The management model value tree.
//!
//! A [`ModelNode`] is either a primitive (string, boolean, exact number), a
//! list, a nested object, or the explicit [`ModelNode::Undefined`] sentinel.
//! Configuration resources live in one root object addressed by
//! [`PathAddress`]: `profile=test/subsystem=threads` maps to the object path
//! `profile -> test -> subsystem -> threads`.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use num_bigint::BigInt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::address::PathAddress;
use crate::error::ModelError;
use crate::types::ModelType;

static UNDEFINED: ModelNode = ModelNode::Undefined;

/// A node of the management model.
///
/// Object keys keep their insertion order so that reads, descriptions and
/// persisted snapshots are deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ModelNode {
    /// No value. Reading a missing key or path yields this sentinel.
    #[default]
    Undefined,
    Boolean(bool),
    Int(i32),
    Long(i64),
    BigInteger(BigInt),
    /// Exact decimal, used for per-cpu scaled sizes.
    BigDecimal(Decimal),
    String(String),
    /// A type tag, only found inside resource descriptions.
    Type(ModelType),
    List(Vec<ModelNode>),
    Object(IndexMap<String, ModelNode>),
}

impl ModelNode {
    /// Creates an empty, defined object node.
    #[must_use]
    pub fn new_object() -> Self {
        Self::Object(IndexMap::new())
    }

    /// Creates an empty, defined list node.
    #[must_use]
    pub fn new_list() -> Self {
        Self::List(Vec::new())
    }

    #[must_use]
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// Returns the type of the value held by this node.
    #[must_use]
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Undefined => ModelType::Undefined,
            Self::Boolean(_) => ModelType::Boolean,
            Self::Int(_) => ModelType::Int,
            Self::Long(_) => ModelType::Long,
            Self::BigInteger(_) => ModelType::BigInteger,
            Self::BigDecimal(_) => ModelType::BigDecimal,
            Self::String(_) => ModelType::String,
            Self::Type(_) => ModelType::Type,
            Self::List(_) => ModelType::List,
            Self::Object(_) => ModelType::Object,
        }
    }

    // -----------------------------------------------------------------------
    // Object access
    // -----------------------------------------------------------------------

    /// Returns the child under `key`, or `Undefined` when this node is not an
    /// object or has no such key.
    #[must_use]
    pub fn get(&self, key: &str) -> &ModelNode {
        match self {
            Self::Object(map) => map.get(key).unwrap_or(&UNDEFINED),
            _ => &UNDEFINED,
        }
    }

    /// Walks a sequence of object keys, yielding `Undefined` at the first gap.
    #[must_use]
    pub fn get_path(&self, keys: &[&str]) -> &ModelNode {
        keys.iter().fold(self, |node, key| node.get(key))
    }

    /// Returns the child under `key`, failing when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoSuchElement`] when the key is missing.
    pub fn require(&self, key: &str) -> Result<&ModelNode, ModelError> {
        match self {
            Self::Object(map) => map.get(key).ok_or_else(|| ModelError::NoSuchElement {
                key: key.to_string(),
            }),
            other => Err(ModelError::NotAnObject {
                found: other.model_type(),
            }),
        }
    }

    /// Returns a mutable reference to the child under `key`, defining this
    /// node as an object and the child as `Undefined` when needed.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotAnObject`] when this node holds a non-object value.
    pub fn get_mut(&mut self, key: &str) -> Result<&mut ModelNode, ModelError> {
        if !self.is_defined() {
            *self = Self::new_object();
        }
        match self {
            Self::Object(map) => Ok(map.entry(key.to_string()).or_default()),
            other => Err(ModelError::NotAnObject {
                found: other.model_type(),
            }),
        }
    }

    /// Sets `key` to `value`, returning the previous value if any.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotAnObject`] when this node holds a non-object value.
    pub fn insert(
        &mut self,
        key: &str,
        value: impl Into<ModelNode>,
    ) -> Result<Option<ModelNode>, ModelError> {
        let slot = self.get_mut(key)?;
        let previous = std::mem::replace(slot, value.into());
        Ok(previous.is_defined().then_some(previous))
    }

    /// Builder-style insert for constructing literal objects.
    ///
    /// A non-object receiver is replaced by a fresh object.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<ModelNode>) -> Self {
        if !matches!(self, Self::Object(_)) {
            self = Self::new_object();
        }
        if let Self::Object(map) = &mut self {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Removes `key`, preserving the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<ModelNode> {
        match self {
            Self::Object(map) => map.shift_remove(key),
            _ => None,
        }
    }

    /// Keys of an object node; empty for every other variant.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let map = match self {
            Self::Object(map) => Some(map),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.keys().map(String::as_str))
    }

    /// Replaces the value of this node.
    pub fn set(&mut self, value: impl Into<ModelNode>) {
        *self = value.into();
    }

    /// Appends to a list node, defining it as a list first if undefined.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotAList`] when this node holds a non-list value.
    pub fn push(&mut self, value: impl Into<ModelNode>) -> Result<(), ModelError> {
        if !self.is_defined() {
            *self = Self::new_list();
        }
        match self {
            Self::List(items) => {
                items.push(value.into());
                Ok(())
            }
            other => Err(ModelError::NotAList {
                found: other.model_type(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Address navigation
    // -----------------------------------------------------------------------

    /// Reads the resource at `address`, `Undefined` if any segment is missing.
    #[must_use]
    pub fn navigate(&self, address: &PathAddress) -> &ModelNode {
        address
            .iter()
            .fold(self, |node, element| node.get(&element.key).get(&element.value))
    }

    /// Returns the resource at `address`, creating intermediate objects.
    ///
    /// # Errors
    ///
    /// Fails when a segment on the way resolves to a non-object value.
    pub fn navigate_mut(&mut self, address: &PathAddress) -> Result<&mut ModelNode, ModelError> {
        let mut node = self;
        for element in address.iter() {
            node = node.get_mut(&element.key)?.get_mut(&element.value)?;
        }
        Ok(node)
    }

    /// Removes the resource at `address` and returns it.
    ///
    /// When the removal leaves the child-type container (`thread-factory`
    /// in `thread-factory=f1`) empty, the container is removed as well, so a
    /// remove exactly undoes the matching add.
    pub fn remove_at(&mut self, address: &PathAddress) -> Option<ModelNode> {
        let (last, parent) = address.split_last()?;
        let parent_node = self.navigate_existing_mut(&parent)?;
        let container = match &mut *parent_node {
            Self::Object(map) => map.get_mut(&last.key)?,
            _ => return None,
        };
        let removed = container.remove(&last.value)?;
        if matches!(container, Self::Object(map) if map.is_empty()) {
            parent_node.remove(&last.key);
        }
        Some(removed)
    }

    fn navigate_existing_mut(&mut self, address: &PathAddress) -> Option<&mut ModelNode> {
        let mut node = self;
        for element in address.iter() {
            node = match node {
                Self::Object(map) => map.get_mut(&element.key)?,
                _ => return None,
            };
            node = match node {
                Self::Object(map) => map.get_mut(&element.value)?,
                _ => return None,
            };
        }
        Some(node)
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Exact conversion of any numeric variant to `i64`.
    ///
    /// Fractional decimals and out-of-range integers yield `None`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            Self::BigInteger(v) => i64::try_from(v).ok(),
            Self::BigDecimal(v) if v.fract().is_zero() => v.to_i64(),
            _ => None,
        }
    }

    /// Exact conversion of any numeric variant to `i32`.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Exact conversion of any numeric variant to a decimal.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(v) => Some(Decimal::from(*v)),
            Self::Long(v) => Some(Decimal::from(*v)),
            Self::BigInteger(v) => Decimal::from_str(&v.to_string()).ok(),
            Self::BigDecimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Exact conversion of any integral numeric variant to a big integer.
    #[must_use]
    pub fn as_big_integer(&self) -> Option<BigInt> {
        match self {
            Self::BigInteger(v) => Some(v.clone()),
            Self::BigDecimal(v) if v.fract().is_zero() => BigInt::from_str(&v.trunc().to_string()).ok(),
            other => other.as_i64().map(BigInt::from),
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[ModelNode]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&IndexMap<String, ModelNode>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Long(_) | Self::BigInteger(_) | Self::BigDecimal(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for ModelNode {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for ModelNode {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for ModelNode {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<BigInt> for ModelNode {
    fn from(v: BigInt) -> Self {
        Self::BigInteger(v)
    }
}

impl From<Decimal> for ModelNode {
    fn from(v: Decimal) -> Self {
        Self::BigDecimal(v)
    }
}

impl From<&str> for ModelNode {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ModelNode {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ModelType> for ModelNode {
    fn from(v: ModelType) -> Self {
        Self::Type(v)
    }
}

impl From<Vec<ModelNode>> for ModelNode {
    fn from(v: Vec<ModelNode>) -> Self {
        Self::List(v)
    }
}

impl From<IndexMap<String, ModelNode>> for ModelNode {
    fn from(v: IndexMap<String, ModelNode>) -> Self {
        Self::Object(v)
    }
}

impl From<&PathAddress> for ModelNode {
    fn from(address: &PathAddress) -> Self {
        Self::List(
            address
                .iter()
                .map(|e| ModelNode::new_object().with(&e.key, e.value.as_str()))
                .collect(),
        )
    }
}

/// Converts JSON literals; integers become `Int` when they fit, otherwise
/// `Long`, and non-integral numbers become exact decimals.
impl From<serde_json::Value> for ModelNode {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Undefined,
            Json::Bool(b) => Self::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(v) => i32::try_from(v).map_or(Self::Long(v), Self::Int),
                None => Decimal::from_str(&n.to_string())
                    .map_or_else(|_| Self::String(n.to_string()), Self::BigDecimal),
            },
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization and display
// ---------------------------------------------------------------------------

impl Serialize for ModelNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined => serializer.serialize_unit(),
            Self::Boolean(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i32(*v),
            Self::Long(v) => serializer.serialize_i64(*v),
            Self::BigInteger(v) => serializer.serialize_str(&v.to_string()),
            Self::BigDecimal(v) => serializer.serialize_str(&v.to_string()),
            Self::String(v) => serializer.serialize_str(v),
            Self::Type(t) => t.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Renders in the `{"key" => value}` notation used by management tooling.
impl fmt::Display for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::BigInteger(v) => write!(f, "big integer {v}"),
            Self::BigDecimal(v) => write!(f, "big decimal {v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Type(t) => write!(f, "{t}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?} => {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}
