use std::fmt;

use serde::{Deserialize, Serialize};

/// Type tags for model values and attribute descriptions.
///
/// `BigDecimal` and `BigInteger` are exact; `Type` only appears inside
/// descriptions where it names the type of another value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    String,
    Int,
    Long,
    BigDecimal,
    BigInteger,
    Boolean,
    List,
    Object,
    Type,
    Undefined,
}

impl ModelType {
    /// Returns true for the four numeric types.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Long | Self::BigDecimal | Self::BigInteger
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::BigDecimal => "BIG_DECIMAL",
            Self::BigInteger => "BIG_INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::List => "LIST",
            Self::Object => "OBJECT",
            Self::Type => "TYPE",
            Self::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
