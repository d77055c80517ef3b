//! Hierarchical service names.

use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Structural, hierarchical identifier of a service, e.g.
/// `jboss.host.controller.client`.
///
/// Equality, hashing and ordering compare the segment sequence, so
/// `"a.b"` and `"a/b"` name the same service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(Vec<String>);

impl ServiceName {
    /// Builds a name from segments; each must be non-empty and must not
    /// contain a separator.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidServiceName`] for empty input or bad segments.
    pub fn of<I, S>(segments: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty()
            || segments
                .iter()
                .any(|s| s.is_empty() || s.contains(['.', '/']))
        {
            return Err(ModelError::InvalidServiceName {
                input: segments.join("."),
            });
        }
        Ok(Self(segments))
    }

    /// Returns a child name with `segment` appended.
    ///
    /// # Errors
    ///
    /// Fails when `segment` is empty or contains a separator.
    pub fn append(&self, segment: &str) -> Result<Self, ModelError> {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self::of(segments)
    }

    /// The enclosing name, `None` for a single-segment name.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` equals or is nested beneath `other`.
    #[must_use]
    pub fn is_under(&self, other: &ServiceName) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl FromStr for ServiceName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::of(s.split(['.', '/']))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}
