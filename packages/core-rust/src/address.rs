//! Resource addresses in the management model.

use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;
use crate::model::ModelNode;

/// Element value that matches any name when used in a registration pattern.
pub const WILDCARD: &str = "*";

/// One `key=value` step of an address, e.g. `subsystem=threads`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    pub key: String,
    pub value: String,
}

impl PathElement {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates the `key=*` pattern element.
    #[must_use]
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Whether this (possibly wildcard) pattern element matches `other`.
    #[must_use]
    pub fn matches(&self, other: &PathElement) -> bool {
        self.key == other.key && (self.is_wildcard() || self.value == other.value)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered sequence of [`PathElement`]s from the model root.
///
/// The empty address denotes the root resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathAddress(Vec<PathElement>);

impl PathAddress {
    /// The root address.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(pairs.iter().map(|(k, v)| PathElement::new(*k, *v)).collect())
    }

    #[must_use]
    pub fn from_elements(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// Returns a new address with `element` appended.
    #[must_use]
    pub fn append(&self, element: PathElement) -> Self {
        let mut elements = self.0.clone();
        elements.push(element);
        Self(elements)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathElement> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// Address of the parent resource; the root is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut elements = self.0.clone();
        elements.pop();
        Self(elements)
    }

    /// Splits off the last element, returning it with the parent address.
    #[must_use]
    pub fn split_last(&self) -> Option<(&PathElement, PathAddress)> {
        self.0
            .split_last()
            .map(|(last, rest)| (last, Self(rest.to_vec())))
    }

    #[must_use]
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    /// Reads an address from the `address` field of an operation node.
    ///
    /// Accepts a list of single-key objects (`[{"profile" => "test"}]`) or a
    /// flat list of alternating keys and values (`["profile", "test"]`).
    /// An undefined node is the root address.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidAddress`] for any other shape.
    pub fn from_model_node(node: &ModelNode) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidAddress {
            input: node.to_string(),
        };
        let items = match node {
            ModelNode::Undefined => return Ok(Self::root()),
            ModelNode::List(items) => items,
            _ => return Err(invalid()),
        };

        if items.iter().all(|item| matches!(item, ModelNode::String(_))) {
            if items.len() % 2 != 0 {
                return Err(invalid());
            }
            let elements = items
                .chunks(2)
                .map(|pair| match (&pair[0], &pair[1]) {
                    (ModelNode::String(k), ModelNode::String(v)) => Ok(PathElement::new(k, v)),
                    _ => Err(invalid()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self(elements));
        }

        let elements = items
            .iter()
            .map(|item| {
                let map = item.as_object().filter(|m| m.len() == 1).ok_or_else(invalid)?;
                let (key, value) = map.iter().next().ok_or_else(invalid)?;
                let value = value.as_str().ok_or_else(invalid)?;
                Ok(PathElement::new(key, value))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;
        Ok(Self(elements))
    }
}

impl<'a> IntoIterator for &'a PathAddress {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders as `key=value/key=value`; the root renders as `/`.
impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl FromStr for PathAddress {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('/')
            .map(|segment| {
                let (key, value) = segment.split_once('=').ok_or_else(|| ModelError::InvalidAddress {
                    input: s.to_string(),
                })?;
                if key.is_empty() || value.is_empty() {
                    return Err(ModelError::InvalidAddress {
                        input: s.to_string(),
                    });
                }
                Ok(PathElement::new(key.trim(), value.trim()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let address: PathAddress = "profile=test/subsystem=threads/thread-factory=f1".parse().unwrap();
        assert_eq!(address.len(), 3);
        assert_eq!(address.to_string(), "profile=test/subsystem=threads/thread-factory=f1");
        assert_eq!("/".parse::<PathAddress>().unwrap(), PathAddress::root());
    }

    #[test]
    fn parse_rejects_segments_without_value() {
        assert!("profile".parse::<PathAddress>().is_err());
        assert!("profile=/subsystem=x".parse::<PathAddress>().is_err());
    }

    #[test]
    fn wildcard_matches_any_value_with_same_key() {
        let pattern = PathElement::wildcard("profile");
        assert!(pattern.matches(&PathElement::new("profile", "test")));
        assert!(!pattern.matches(&PathElement::new("subsystem", "test")));
        assert!(!PathElement::new("profile", "a").matches(&PathElement::new("profile", "b")));
    }

    #[test]
    fn reads_flat_string_list() {
        let node = ModelNode::List(vec!["profile".into(), "test".into()]);
        let address = PathAddress::from_model_node(&node).unwrap();
        assert_eq!(address, PathAddress::from_pairs(&[("profile", "test")]));
    }

    #[test]
    fn reads_list_of_single_key_objects() {
        let original = PathAddress::from_pairs(&[("profile", "test"), ("subsystem", "threads")]);
        let node = ModelNode::from(&original);
        assert_eq!(PathAddress::from_model_node(&node).unwrap(), original);
    }

    #[test]
    fn rejects_odd_flat_list() {
        let node = ModelNode::List(vec!["profile".into()]);
        assert!(PathAddress::from_model_node(&node).is_err());
    }

    #[test]
    fn parent_and_split_last() {
        let address = PathAddress::from_pairs(&[("a", "1"), ("b", "2")]);
        assert_eq!(address.parent(), PathAddress::from_pairs(&[("a", "1")]));
        let (last, parent) = address.split_last().unwrap();
        assert_eq!(last, &PathElement::new("b", "2"));
        assert_eq!(parent.len(), 1);
        assert!(PathAddress::root().split_last().is_none());
    }
}
